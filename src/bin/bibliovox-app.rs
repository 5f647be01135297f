use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::response::Html;
use clap::Parser;
use tokio::sync::Semaphore;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use bibliovox::app::http::{AppState, api_router};
use bibliovox::app::library::LocalFsLibrary;
use bibliovox::progress::{LocalFsPrefsStore, LocalFsProgressStore};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct AppArgs {
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    #[arg(long, default_value = "workspace-app")]
    data_dir: PathBuf,

    /// Concurrent translation runs. The provider is rate sensitive; keep
    /// this at 1 unless you know better.
    #[arg(long, default_value_t = 1)]
    max_concurrency: usize,

    /// Web translation endpoint.
    #[arg(long, default_value = bibliovox::provider::DEFAULT_ENDPOINT_URL)]
    endpoint_url: String,

    /// Static web assets directory (serve if exists).
    #[arg(long, default_value = "web/dist")]
    web_dir: PathBuf,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    bibliovox::logging::init()?;

    let args = AppArgs::parse();
    tracing::info!(?args, "starting bibliovox-app");

    let state = AppState {
        base_dir: args.data_dir.clone(),
        library: Arc::new(LocalFsLibrary::new(&args.data_dir)),
        progress: Arc::new(LocalFsProgressStore::new(&args.data_dir)),
        prefs: LocalFsPrefsStore::new(&args.data_dir),
        endpoint_url: args.endpoint_url,
        jobs: Arc::new(Semaphore::new(args.max_concurrency.max(1))),
    };

    let mut app = api_router(state).layer(TraceLayer::new_for_http());

    let web_index = args.web_dir.join("index.html");
    if web_index.exists() {
        let static_files = ServeDir::new(args.web_dir).not_found_service(ServeFile::new(web_index));
        app = app.fallback_service(static_files);
    } else {
        app = app.fallback(|| async {
            Html(
                r#"<!doctype html>
<html>
  <head><meta charset="utf-8"><title>bibliovox</title></head>
  <body>
    <h1>bibliovox</h1>
    <p>web assets not found. Build the reader into <code>web/dist</code> or run a dev server.</p>
  </body>
</html>
"#,
            )
        });
    }

    let listener = tokio::net::TcpListener::bind(args.addr)
        .await
        .map_err(|err| anyhow::anyhow!("bind {}: {err}", args.addr))?;
    tracing::info!(addr = %args.addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
