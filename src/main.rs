use lotus_viewer::app::ViewerApp;
use lotus_viewer::config::ViewerConfig;
use lotus_viewer::fetch::Loader;

#[cfg(not(target_arch = "wasm32"))]
mod cli {
    use std::path::PathBuf;

    use clap::Parser;
    use lotus_viewer::config::{DEFAULT_API_BASE, DEFAULT_BACKGROUND_URL};

    #[derive(Parser, Debug)]
    #[command(name = "lotus_viewer")]
    #[command(version, about = "Tri-planar NIfTI statistical map viewer")]
    pub struct Args {
        /// Base URL of the search API
        #[arg(long, default_value = DEFAULT_API_BASE)]
        pub api_base: String,

        /// Background volume, relative to --static-root unless absolute
        #[arg(long, default_value = DEFAULT_BACKGROUND_URL)]
        pub background: String,

        /// Directory relative volume paths are resolved against; http(s) URLs are fetched
        #[arg(long, default_value = ".")]
        pub static_root: PathBuf,

        /// Query to run at startup
        #[arg(long)]
        pub query: Option<String>,
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn main() -> anyhow::Result<()> {
    use std::sync::Arc;

    use clap::Parser;
    use eframe::egui;
    use lotus_viewer::fetch::{FileSource, NativeSource};

    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .env()
        .init()?;

    let args = cli::Args::parse();
    let config = ViewerConfig::default()
        .with_api_base(args.api_base)
        .with_background_url(args.background);
    log::info!("static root {}", args.static_root.display());
    let loader = Loader::new(Arc::new(NativeSource::new(FileSource::new(args.static_root))));
    let app = ViewerApp::new(config, loader, args.query.as_deref());

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default().with_inner_size([1000.0, 900.0]),
        ..Default::default()
    };
    eframe::run_native(
        "Lotus Tri-planar Viewer",
        native_options,
        Box::new(|_cc| Ok(Box::new(app))),
    )
    .map_err(|e| anyhow::anyhow!("{e}"))
}

#[cfg(target_arch = "wasm32")]
fn main() {
    use wasm_bindgen::JsCast;
    use web_sys::HtmlCanvasElement;

    console_error_panic_hook::set_once();
    wasm_logger::init(wasm_logger::Config::default());
    let app = ViewerApp::new(ViewerConfig::default(), Loader::new(), None);
    let web_options = eframe::WebOptions::default();
    let window = web_sys::window().expect("window not available");
    let document = window.document().expect("document not available");
    let canvas: HtmlCanvasElement = document
        .get_element_by_id("canvas_render")
        .expect("canvas not found")
        .dyn_into()
        .expect("canvas element");
    wasm_bindgen_futures::spawn_local(async move {
        eframe::WebRunner::new()
            .start(canvas, web_options, Box::new(|_cc| Ok(Box::new(app))))
            .await
            .expect("failed to start eframe web app");
    });
}
