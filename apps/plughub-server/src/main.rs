//! PlugHub Server
//!
//! HTTP front for the PlugHub processing engine. Requests are validated in
//! full before anything runs; valid ones are handed to the engine binary,
//! one subprocess per request, and the produced file is streamed back.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use clap::Parser;
use plughub_core::{ProcessingEngine, RequestLimits};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod api;
mod error;
mod process;
#[cfg(test)]
mod tests;

use api::{handle_health, handle_lock, handle_pdfservice, handle_split, handle_unlock};
use process::ProcessEngine;

/// Base64 inflates uploads by a third; leave room for several files per request
const BODY_LIMIT_FACTOR: usize = 4;

/// Command-line arguments for the PlugHub server
#[derive(Parser, Debug)]
#[command(name = "plughub-server")]
#[command(about = "PlugHub PDF processing server")]
struct Args {
    /// Host address to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "3000")]
    port: u16,

    /// Largest accepted file, in bytes
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value_t = plughub_core::bridge::DEFAULT_MAX_UPLOAD_BYTES)]
    max_upload_bytes: usize,

    /// Engine run limit in seconds
    #[arg(long, env = "ENGINE_TIMEOUT_SECS", default_value = "45")]
    engine_timeout_secs: u64,

    /// Path or name of the engine binary
    #[arg(long, env = "PLUGHUB_ENGINE", default_value = "plughub-engine")]
    engine_bin: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Shared application state
pub struct AppState {
    pub limits: RequestLimits,
    pub engine: Arc<dyn ProcessingEngine>,
}

/// Router with every route and layer, for `state`
pub fn app(state: Arc<AppState>) -> Router {
    let body_limit = state
        .limits
        .max_upload_bytes
        .saturating_mul(BODY_LIMIT_FACTOR);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/pdfservice", post(handle_pdfservice))
        .route("/lock", post(handle_lock))
        .route("/unlock", post(handle_unlock))
        .route("/split", post(handle_split))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let default_filter = if args.verbose {
        "plughub_server=debug,plughub_core=debug,tower_http=debug"
    } else {
        "plughub_server=info,tower_http=debug"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let timeout = Duration::from_secs(args.engine_timeout_secs);
    let state = Arc::new(AppState {
        limits: RequestLimits {
            max_upload_bytes: args.max_upload_bytes,
        },
        engine: Arc::new(ProcessEngine::new(&args.engine_bin, timeout)),
    });

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Server listening on http://{}", addr);
    info!("Engine: {} (timeout {}s)", args.engine_bin.display(), args.engine_timeout_secs);
    info!("Upload limit: {} bytes", args.max_upload_bytes);

    axum::serve(listener, app(state)).await?;

    Ok(())
}
