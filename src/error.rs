//! Error types for fetching and decoding volumes.
//!
//! Every failure here is recoverable: the controller stores the rendered
//! message as per-role status text and keeps running.

use thiserror::Error;

/// Failure while turning NIfTI bytes into a [`DecodedVolume`](crate::DecodedVolume).
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The buffer looked gzip-compressed but could not be inflated.
    #[error("gzip decompression failed: {0}")]
    Compression(#[source] std::io::Error),

    /// Missing `n+1`/`ni1` magic or a buffer shorter than the header.
    #[error("not a NIfTI file: {0}")]
    Signature(String),

    /// The header reader rejected the fixed-size header.
    #[error("unreadable NIfTI header: {0}")]
    Header(String),

    /// Zero-valued or missing entries in the dimension triple.
    #[error("invalid dims: {0}")]
    InvalidDimensions(String),

    #[error("unsupported NIfTI datatype code {0}")]
    UnsupportedDatatype(i16),

    /// The image payload is truncated or could not be converted.
    #[error("image payload: {0}")]
    Payload(String),

    #[error("non-finite sample at linear index {index}")]
    NonFiniteSample { index: usize },
}

/// Transport failure for a single request.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    /// The server answered with a non-OK status.
    #[error("GET {url} -> {status} {body}")]
    Status { url: String, status: u16, body: String },

    /// The request never produced a response (network, missing file, bad scheme).
    #[error("GET {url} failed: {reason}")]
    Transport { url: String, reason: String },

    /// The request was superseded and its abort signal fired.
    #[error("GET {url} aborted")]
    Aborted { url: String },
}

/// Failure of one fetch+decode pipeline run.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("{url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: DecodeError,
    },
}

impl LoadError {
    pub fn is_aborted(&self) -> bool {
        matches!(self, LoadError::Fetch(FetchError::Aborted { .. }))
    }
}

/// Failure to interpret a JSON payload from the search API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("malformed API response: {0}")]
    Json(#[from] serde_json::Error),
}
