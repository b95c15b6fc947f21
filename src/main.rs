//! Entry point: reads configuration from the environment, wires up the
//! single root dispatcher, and serves it until an interrupt signal or the
//! listener itself gives up.

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use relaycore::config::Config;
use relaycore::http;
use relaycore::state::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Arc::new(Config::from_env());
    tracing::info!(port = config.port, wspath = %config.wspath, "starting gateway");

    let state = AppState { config: config.clone() };

    let app = Router::new()
        .fallback(http::root_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(err) => {
            tracing::error!(%addr, %err, "failed to bind listener");
            std::process::exit(1);
        }
    };
    tracing::info!(%addr, "listening");

    ctrlc::set_handler(move || {
        tracing::info!("SIGINT received, shutting down");
        std::process::exit(0);
    })
    .expect("failed to install SIGINT handler");

    if let Err(err) = axum::serve(listener, app).await {
        tracing::error!(%err, "server exited with error");
        std::process::exit(1);
    }
}
