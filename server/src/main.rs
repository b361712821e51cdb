//! Storymill HTTP service: job API, extraction callbacks, trace queries,
//! and the background worker pool.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use storymill::config::load_config;
use storymill::worker::WorkerPool;

use storymill_server::{build_router, AppState};

fn init_tracing() {
    // Bridge `log` macros from the library into tracing.
    let _ = tracing_log::LogTracer::init();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,storymill=debug"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn config_path() -> Option<PathBuf> {
    if let Some(arg) = std::env::args().nth(1) {
        return Some(PathBuf::from(arg));
    }
    if let Ok(env) = std::env::var("STORYMILL_CONFIG") {
        return Some(PathBuf::from(env));
    }
    Some(PathBuf::from("storymill.yaml"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = load_config(config_path().as_deref())?;
    let bind_address = config.bind_address.clone();
    let worker_count = config.worker_count;
    let poll_interval = Duration::from_millis(config.poll_interval_ms);

    let state = AppState::from_config(config)?;

    let pool = WorkerPool::start(
        Arc::clone(&state.orchestrator),
        state.store.clone(),
        worker_count,
        poll_interval,
    );

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!("Listening on {}", bind_address);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.shutdown();
    pool.wait().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}
