//! Restartable fetch pipelines.
//!
//! The controller hands out a [`LoadTicket`] per volume request and the
//! catalog a [`ListingTicket`] per JSON request; a [`Loader`] runs them off
//! the interaction thread and queues completions that the host feeds back
//! on its next frame.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::decode::decode_volume;
use crate::error::{FetchError, LoadError};
use crate::volume::DecodedVolume;

/// Which volume slot a load fills.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Background,
    Map,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Background => write!(f, "background"),
            Role::Map => write!(f, "map"),
        }
    }
}

/// Which JSON listing of the search API a request fills.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Listing {
    Terms,
    Studies,
    RelatedTerms,
}

impl fmt::Display for Listing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Listing::Terms => write!(f, "terms"),
            Listing::Studies => write!(f, "studies"),
            Listing::RelatedTerms => write!(f, "related terms"),
        }
    }
}

/// Cancel flag shared between the controller and a running load.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One requested load. Only the ticket with the slot's current generation
/// may publish its result.
#[derive(Clone, Debug)]
pub struct LoadTicket {
    pub role: Role,
    pub generation: u64,
    pub url: String,
    pub cancel: CancelToken,
}

#[derive(Debug)]
pub struct Completion {
    pub ticket: LoadTicket,
    pub result: Result<DecodedVolume, LoadError>,
}

/// One requested JSON listing, superseded the same way as a [`LoadTicket`].
#[derive(Clone, Debug)]
pub struct ListingTicket {
    pub listing: Listing,
    pub generation: u64,
    pub url: String,
    pub cancel: CancelToken,
}

#[derive(Debug)]
pub struct ListingCompletion {
    pub ticket: ListingTicket,
    pub result: Result<String, FetchError>,
}

/// Blocking byte transport used by the native loader.
pub trait ByteSource: Send + Sync {
    fn fetch(&self, url: &str, cancel: &CancelToken) -> Result<Vec<u8>, FetchError>;
}

pub fn is_remote(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Reads volumes from disk. Relative paths resolve against `root`.
#[derive(Clone, Debug)]
pub struct FileSource {
    root: PathBuf,
}

impl FileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn resolve(&self, url: &str) -> Result<PathBuf, FetchError> {
        if is_remote(url) {
            return Err(FetchError::Transport {
                url: url.to_string(),
                reason: "not a local path".to_string(),
            });
        }
        let path = Path::new(url.strip_prefix("file://").unwrap_or(url));
        Ok(if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        })
    }
}

impl ByteSource for FileSource {
    fn fetch(&self, url: &str, cancel: &CancelToken) -> Result<Vec<u8>, FetchError> {
        let path = self.resolve(url)?;
        if cancel.is_cancelled() {
            return Err(FetchError::Aborted { url: url.to_string() });
        }
        std::fs::read(&path).map_err(|e| FetchError::Transport {
            url: url.to_string(),
            reason: format!("{}: {e}", path.display()),
        })
    }
}

/// Fetch and decode one ticket. A cancellation observed after either step
/// turns the result into [`FetchError::Aborted`].
pub fn load_volume(source: &dyn ByteSource, ticket: &LoadTicket) -> Result<DecodedVolume, LoadError> {
    let bytes = source.fetch(&ticket.url, &ticket.cancel)?;
    finish_load(&bytes, ticket)
}

fn finish_load(bytes: &[u8], ticket: &LoadTicket) -> Result<DecodedVolume, LoadError> {
    let aborted = || LoadError::Fetch(FetchError::Aborted { url: ticket.url.clone() });
    if ticket.cancel.is_cancelled() {
        return Err(aborted());
    }
    let volume = decode_volume(bytes).map_err(|source| LoadError::Decode {
        url: ticket.url.clone(),
        source,
    })?;
    if ticket.cancel.is_cancelled() {
        return Err(aborted());
    }
    Ok(volume)
}

/// Fetch one listing as text.
pub fn load_listing(source: &dyn ByteSource, ticket: &ListingTicket) -> Result<String, FetchError> {
    let bytes = source.fetch(&ticket.url, &ticket.cancel)?;
    finish_listing(bytes, ticket)
}

fn finish_listing(bytes: Vec<u8>, ticket: &ListingTicket) -> Result<String, FetchError> {
    if ticket.cancel.is_cancelled() {
        return Err(FetchError::Aborted { url: ticket.url.clone() });
    }
    String::from_utf8(bytes).map_err(|e| FetchError::Transport {
        url: ticket.url.clone(),
        reason: format!("response is not UTF-8: {e}"),
    })
}

#[cfg(not(target_arch = "wasm32"))]
pub use native::{HttpSource, Loader, NativeSource};
#[cfg(target_arch = "wasm32")]
pub use web::Loader;

#[cfg(not(target_arch = "wasm32"))]
mod native {
    use std::io::Read;
    use std::sync::mpsc::{channel, Receiver, Sender};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::{
        is_remote, load_listing, load_volume, ByteSource, CancelToken, Completion, FileSource, ListingCompletion,
        ListingTicket, LoadTicket,
    };
    use crate::error::{FetchError, LoadError};

    /// Blocking HTTP GET.
    #[derive(Clone)]
    pub struct HttpSource {
        agent: ureq::Agent,
    }

    impl Default for HttpSource {
        fn default() -> Self {
            Self::new()
        }
    }

    impl HttpSource {
        pub fn new() -> Self {
            Self {
                agent: ureq::AgentBuilder::new().build(),
            }
        }
    }

    impl ByteSource for HttpSource {
        fn fetch(&self, url: &str, cancel: &CancelToken) -> Result<Vec<u8>, FetchError> {
            if cancel.is_cancelled() {
                return Err(FetchError::Aborted { url: url.to_string() });
            }
            let transport = |reason: String| FetchError::Transport {
                url: url.to_string(),
                reason,
            };
            let response = match self.agent.get(url).call() {
                Ok(response) => response,
                Err(ureq::Error::Status(status, response)) => {
                    return Err(FetchError::Status {
                        url: url.to_string(),
                        status,
                        body: response.into_string().unwrap_or_default(),
                    });
                }
                Err(e) => return Err(transport(e.to_string())),
            };
            let mut bytes = Vec::new();
            response
                .into_reader()
                .read_to_end(&mut bytes)
                .map_err(|e| transport(e.to_string()))?;
            Ok(bytes)
        }
    }

    /// Sends `http(s)` URLs over the network and everything else to disk.
    #[derive(Clone)]
    pub struct NativeSource {
        files: FileSource,
        http: HttpSource,
    }

    impl NativeSource {
        pub fn new(files: FileSource) -> Self {
            Self {
                files,
                http: HttpSource::new(),
            }
        }
    }

    impl ByteSource for NativeSource {
        fn fetch(&self, url: &str, cancel: &CancelToken) -> Result<Vec<u8>, FetchError> {
            if is_remote(url) {
                self.http.fetch(url, cancel)
            } else {
                self.files.fetch(url, cancel)
            }
        }
    }

    /// Runs each ticket on its own worker thread and collects completions
    /// over channels polled once per frame.
    pub struct Loader {
        source: Arc<dyn ByteSource>,
        tx: Sender<Completion>,
        rx: Receiver<Completion>,
        listing_tx: Sender<ListingCompletion>,
        listing_rx: Receiver<ListingCompletion>,
    }

    impl Loader {
        pub fn new(source: Arc<dyn ByteSource>) -> Self {
            let (tx, rx) = channel();
            let (listing_tx, listing_rx) = channel();
            Self {
                source,
                tx,
                rx,
                listing_tx,
                listing_rx,
            }
        }

        pub fn spawn(&self, ticket: LoadTicket) {
            log::info!("loading {} from {}", ticket.role, ticket.url);
            let source = Arc::clone(&self.source);
            let tx = self.tx.clone();
            let worker_ticket = ticket.clone();
            let spawned = thread::Builder::new()
                .name(format!("load-{}", ticket.role))
                .spawn(move || {
                    let result = load_volume(source.as_ref(), &worker_ticket);
                    // The receiver only goes away with the loader itself.
                    let _ = tx.send(Completion {
                        ticket: worker_ticket,
                        result,
                    });
                });
            if let Err(e) = spawned {
                let url = ticket.url.clone();
                let _ = self.tx.send(Completion {
                    ticket,
                    result: Err(LoadError::Fetch(worker_failed(url, e))),
                });
            }
        }

        pub fn spawn_listing(&self, ticket: ListingTicket) {
            log::debug!("fetching {} from {}", ticket.listing, ticket.url);
            let source = Arc::clone(&self.source);
            let tx = self.listing_tx.clone();
            let worker_ticket = ticket.clone();
            let spawned = thread::Builder::new()
                .name("listing".to_string())
                .spawn(move || {
                    let result = load_listing(source.as_ref(), &worker_ticket);
                    let _ = tx.send(ListingCompletion {
                        ticket: worker_ticket,
                        result,
                    });
                });
            if let Err(e) = spawned {
                let url = ticket.url.clone();
                let _ = self.listing_tx.send(ListingCompletion {
                    ticket,
                    result: Err(worker_failed(url, e)),
                });
            }
        }

        /// Drain every completion that has arrived so far.
        pub fn poll(&self) -> Vec<Completion> {
            self.rx.try_iter().collect()
        }

        pub fn poll_listings(&self) -> Vec<ListingCompletion> {
            self.listing_rx.try_iter().collect()
        }

        /// Block until the next completion or `timeout`.
        pub fn wait(&self, timeout: Duration) -> Option<Completion> {
            self.rx.recv_timeout(timeout).ok()
        }

        pub fn wait_listing(&self, timeout: Duration) -> Option<ListingCompletion> {
            self.listing_rx.recv_timeout(timeout).ok()
        }
    }

    fn worker_failed(url: String, e: std::io::Error) -> FetchError {
        FetchError::Transport {
            url,
            reason: format!("could not start worker: {e}"),
        }
    }

    #[cfg(test)]
    mod tests {
        use std::io::{BufRead, BufReader, Write};
        use std::net::TcpListener;

        use super::*;
        use crate::fetch::Listing;

        /// Answer a single request on a local port with a canned response.
        fn serve_once(status: &'static str, body: &'static [u8]) -> String {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let addr = listener.local_addr().unwrap();
            thread::spawn(move || {
                let (mut stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut line = String::new();
                while reader.read_line(&mut line).unwrap() > 0 {
                    if line == "\r\n" {
                        break;
                    }
                    line.clear();
                }
                write!(
                    stream,
                    "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                )
                .unwrap();
                stream.write_all(body).unwrap();
            });
            format!("http://{addr}/query/pain/nii")
        }

        #[test]
        fn http_source_returns_body_bytes() {
            let url = serve_once("200 OK", b"\x1f\x8bpayload");
            let bytes = HttpSource::new().fetch(&url, &CancelToken::new()).unwrap();
            assert_eq!(bytes, b"\x1f\x8bpayload");
        }

        #[test]
        fn http_error_status_keeps_the_body() {
            let url = serve_once("404 Not Found", b"no such term");
            let err = HttpSource::new().fetch(&url, &CancelToken::new()).unwrap_err();
            assert_eq!(
                err,
                FetchError::Status {
                    url: url.clone(),
                    status: 404,
                    body: "no such term".to_string(),
                }
            );
        }

        #[test]
        fn native_source_routes_remote_urls_over_http() {
            let url = serve_once("200 OK", br#"{"terms": ["pain"]}"#);
            let dir = tempfile::tempdir().unwrap();
            let loader = Loader::new(Arc::new(NativeSource::new(FileSource::new(dir.path()))));
            loader.spawn_listing(ListingTicket {
                listing: Listing::Terms,
                generation: 1,
                url,
                cancel: CancelToken::new(),
            });
            let done = loader.wait_listing(Duration::from_secs(30)).unwrap();
            assert_eq!(done.result.unwrap(), r#"{"terms": ["pain"]}"#);
        }

        #[test]
        fn native_source_reads_local_paths_from_disk() {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("v.bin"), b"abc").unwrap();
            let source = NativeSource::new(FileSource::new(dir.path()));
            assert_eq!(source.fetch("v.bin", &CancelToken::new()).unwrap(), b"abc");
        }

        #[test]
        fn cancelled_request_is_not_sent() {
            let token = CancelToken::new();
            token.cancel();
            let err = HttpSource::new().fetch("http://127.0.0.1:9/x", &token).unwrap_err();
            assert!(matches!(err, FetchError::Aborted { .. }));
        }
    }
}

#[cfg(target_arch = "wasm32")]
mod web {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::hash::Hash;
    use std::rc::Rc;

    use wasm_bindgen::{JsCast, JsValue};
    use wasm_bindgen_futures::JsFuture;
    use web_sys::{AbortController, AbortSignal, RequestInit, Response};

    use super::{finish_listing, finish_load, Completion, Listing, ListingCompletion, ListingTicket, LoadTicket, Role};
    use crate::error::{FetchError, LoadError};

    /// Runs each ticket as a browser `fetch`. Starting a request aborts the
    /// previous one of the same role or listing.
    #[derive(Default)]
    pub struct Loader {
        queue: Rc<RefCell<Vec<Completion>>>,
        listing_queue: Rc<RefCell<Vec<ListingCompletion>>>,
        in_flight: RefCell<HashMap<Role, AbortController>>,
        listings_in_flight: RefCell<HashMap<Listing, AbortController>>,
    }

    impl Loader {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn spawn(&self, ticket: LoadTicket) {
            log::info!("loading {} from {}", ticket.role, ticket.url);
            let signal = match replace_controller(&self.in_flight, ticket.role) {
                Ok(signal) => signal,
                Err(e) => {
                    let url = ticket.url.clone();
                    self.queue.borrow_mut().push(Completion {
                        ticket,
                        result: Err(LoadError::Fetch(transport(&url, &e))),
                    });
                    return;
                }
            };
            let queue = Rc::clone(&self.queue);
            wasm_bindgen_futures::spawn_local(async move {
                let result = match fetch_bytes(&ticket.url, &signal).await {
                    Ok(bytes) => finish_load(&bytes, &ticket),
                    Err(e) => Err(LoadError::Fetch(e)),
                };
                queue.borrow_mut().push(Completion { ticket, result });
            });
        }

        pub fn spawn_listing(&self, ticket: ListingTicket) {
            log::debug!("fetching {} from {}", ticket.listing, ticket.url);
            let signal = match replace_controller(&self.listings_in_flight, ticket.listing) {
                Ok(signal) => signal,
                Err(e) => {
                    let url = ticket.url.clone();
                    self.listing_queue.borrow_mut().push(ListingCompletion {
                        ticket,
                        result: Err(transport(&url, &e)),
                    });
                    return;
                }
            };
            let queue = Rc::clone(&self.listing_queue);
            wasm_bindgen_futures::spawn_local(async move {
                let result = match fetch_bytes(&ticket.url, &signal).await {
                    Ok(bytes) => finish_listing(bytes, &ticket),
                    Err(e) => Err(e),
                };
                queue.borrow_mut().push(ListingCompletion { ticket, result });
            });
        }

        pub fn poll(&self) -> Vec<Completion> {
            std::mem::take(&mut *self.queue.borrow_mut())
        }

        pub fn poll_listings(&self) -> Vec<ListingCompletion> {
            std::mem::take(&mut *self.listing_queue.borrow_mut())
        }
    }

    /// Abort the request running under `key` and register a fresh controller.
    fn replace_controller<K: Hash + Eq>(
        in_flight: &RefCell<HashMap<K, AbortController>>,
        key: K,
    ) -> Result<AbortSignal, JsValue> {
        let mut in_flight = in_flight.borrow_mut();
        if let Some(previous) = in_flight.remove(&key) {
            previous.abort();
        }
        let controller = AbortController::new()?;
        let signal = controller.signal();
        in_flight.insert(key, controller);
        Ok(signal)
    }

    fn transport(url: &str, err: &JsValue) -> FetchError {
        FetchError::Transport {
            url: url.to_string(),
            reason: format!("{err:?}"),
        }
    }

    fn failure(url: &str, signal: &AbortSignal, err: JsValue) -> FetchError {
        if signal.aborted() {
            FetchError::Aborted { url: url.to_string() }
        } else {
            transport(url, &err)
        }
    }

    async fn fetch_bytes(url: &str, signal: &AbortSignal) -> Result<Vec<u8>, FetchError> {
        let window = web_sys::window().ok_or_else(|| FetchError::Transport {
            url: url.to_string(),
            reason: "no window".to_string(),
        })?;
        let init = RequestInit::new();
        init.set_method("GET");
        init.set_signal(Some(signal));

        let response = JsFuture::from(window.fetch_with_str_and_init(url, &init))
            .await
            .map_err(|e| failure(url, signal, e))?;
        let response: Response = response
            .dyn_into()
            .map_err(|e| transport(url, &e))?;

        if !response.ok() {
            let body = match response.text() {
                Ok(p) => JsFuture::from(p).await.ok().and_then(|v| v.as_string()),
                Err(_) => None,
            };
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status(),
                body: body.unwrap_or_default(),
            });
        }

        let buffer = response.array_buffer().map_err(|e| transport(url, &e))?;
        let buffer = JsFuture::from(buffer)
            .await
            .map_err(|e| failure(url, signal, e))?;
        Ok(js_sys::Uint8Array::new(&buffer).to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn ticket(url: &str) -> LoadTicket {
        LoadTicket {
            role: Role::Map,
            generation: 1,
            url: url.to_string(),
            cancel: CancelToken::new(),
        }
    }

    #[test]
    fn file_source_resolves_relative_paths_against_root() {
        let source = FileSource::new("/srv/static");
        assert_eq!(source.resolve("a/b.nii").unwrap(), PathBuf::from("/srv/static/a/b.nii"));
        assert_eq!(source.resolve("file:///tmp/x.nii").unwrap(), PathBuf::from("/tmp/x.nii"));
        assert!(matches!(
            source.resolve("https://host/x.nii"),
            Err(FetchError::Transport { .. })
        ));
    }

    #[test]
    fn file_source_reads_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join("v.bin")).unwrap();
        f.write_all(b"abc").unwrap();
        let source = FileSource::new(dir.path());
        assert_eq!(source.fetch("v.bin", &CancelToken::new()).unwrap(), b"abc");
        assert!(matches!(
            source.fetch("missing.bin", &CancelToken::new()),
            Err(FetchError::Transport { .. })
        ));
    }

    #[test]
    fn cancelled_ticket_is_aborted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("v.bin"), b"abc").unwrap();
        let t = ticket("v.bin");
        t.cancel.cancel();
        let err = load_volume(&FileSource::new(dir.path()), &t).unwrap_err();
        assert!(err.is_aborted());
    }

    #[test]
    fn undecodable_bytes_report_the_url() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("page.html"), "<html></html>".repeat(40)).unwrap();
        let err = load_volume(&FileSource::new(dir.path()), &ticket("page.html")).unwrap_err();
        assert!(matches!(err, LoadError::Decode { .. }));
        assert!(err.to_string().starts_with("page.html: not a NIfTI file"));
    }

    #[test]
    fn listing_text_must_be_utf8() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("terms.json"), [0xff, 0xfe]).unwrap();
        let t = ListingTicket {
            listing: Listing::Terms,
            generation: 1,
            url: "terms.json".to_string(),
            cancel: CancelToken::new(),
        };
        let err = load_listing(&FileSource::new(dir.path()), &t).unwrap_err();
        assert!(matches!(err, FetchError::Transport { .. }));
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
