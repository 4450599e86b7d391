//! Pi Cam server - supervised camera capture, HLS livestream, recordings.
//!
//! This is the main library crate for the Pi Cam server. It supervises the
//! capture -> transcode pipeline, keeps it alive with backoff restarts, and
//! serves the health/control/recordings API over HTTP.

pub mod config;
pub mod library;
pub mod pipeline;
pub mod server;
pub mod utils;

use config::{PipelineConfig, ServerConfig};
use pipeline::StreamSupervisor;
use server::AppState;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging, start the supervisor, and serve the API.
pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "picam_server=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Pi Cam server v{}", env!("CARGO_PKG_VERSION"));

    let pipeline_config = PipelineConfig::from_env();
    let server_config = ServerConfig::from_env();
    pipeline_config.ensure_directories()?;

    let supervisor = StreamSupervisor::new(pipeline_config.clone());

    // Bring the pipeline up at boot. A failure here (camera unplugged,
    // binary missing) leaves the API available so the operator can inspect
    // recordings and retry via /control/start.
    let startup = supervisor.clone();
    if let Err(err) = tokio::task::spawn_blocking(move || startup.start()).await? {
        tracing::warn!("Pipeline did not start at boot: {}", err);
    }

    let state = AppState {
        supervisor: supervisor.clone(),
        config: Arc::new(pipeline_config),
    };
    let app = server::router(state);

    let listener = tokio::net::TcpListener::bind(server_config.bind).await?;
    tracing::info!("Listening on {}", server_config.bind);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Best-effort teardown: no child processes survive the server.
    let teardown = supervisor.clone();
    tokio::task::spawn_blocking(move || teardown.stop()).await?;
    tracing::info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
}
