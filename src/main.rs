use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber;

use floodgate::config::ServiceConfig;
use floodgate::http::{guard, AdmissionState};
use floodgate::limit::{LimiterStore, RateLimitConfig};

/// Command-line arguments for the Floodgate service.
#[derive(Parser, Debug)]
#[command(name = "floodgate")]
#[command(about = "Fixed-window request admission control for HTTP APIs")]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Listen address, overriding the configuration file
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Max requests per window for the API route, when the config file
    /// defines no "api" limit
    #[arg(long, default_value_t = 60)]
    max_requests: u32,

    /// Window length in milliseconds for the API route
    #[arg(long, default_value_t = 60_000)]
    window_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .init();

    info!("Starting Floodgate Admission Control Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();

    // Load configuration, falling back to defaults
    let config = match &args.config {
        Some(path) => ServiceConfig::from_file(path)?,
        None => ServiceConfig::default(),
    };
    let listen_addr = args.listen.unwrap_or(config.server.listen_addr);
    let api_limit = config
        .limit_for("api")
        .unwrap_or(RateLimitConfig::new(args.max_requests, args.window_ms));
    info!(
        listen_addr = %listen_addr,
        max_requests = api_limit.max_requests,
        window_ms = api_limit.window_ms,
        "Configuration loaded"
    );

    // Initialize the limiter store
    let store = Arc::new(LimiterStore::new());
    info!("Limiter store initialized");

    let admission = AdmissionState::new(Arc::clone(&store), api_limit);
    let api = Router::new()
        .route("/api/echo", post(echo_handler))
        .route_layer(axum::middleware::from_fn_with_state(admission, guard));
    let app = Router::new().route("/health", get(health_handler)).merge(api);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    info!("Listening on http://{}", listen_addr);

    // Run the server with graceful shutdown on Ctrl+C
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Floodgate Admission Control Service stopped");
    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Demo guarded route: echoes the request body back.
async fn echo_handler(Json(body): Json<serde_json::Value>) -> impl IntoResponse {
    Json(body)
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
