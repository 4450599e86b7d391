//! HTTP surface
//!
//! Thin veneer over the supervisor and the recording library: health and
//! control endpoints, recording CRUD with two pagination styles, thumbnail
//! lookup, and static mounts for the live playlist, recordings, and
//! snapshots.

pub mod routes;

use crate::config::PipelineConfig;
use crate::pipeline::StreamSupervisor;
use axum::routing::{delete, get, post, put};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub supervisor: StreamSupervisor,
    pub config: Arc<PipelineConfig>,
}

/// Build the application router.
///
/// The UI is served elsewhere, so CORS is wide open for it to reach this
/// server.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(routes::service_info))
        .route("/health", get(routes::health))
        .route("/control/start", post(routes::control_start))
        .route("/control/stop", post(routes::control_stop))
        .route("/recordings", get(routes::list_recordings))
        .route("/recordings/cursor", get(routes::list_recordings_cursor))
        .route("/recordings/{filename}", delete(routes::delete_recording))
        .route(
            "/recordings/{filename}/rename",
            put(routes::rename_recording),
        )
        .route(
            "/recordings/{filename}/thumbnail",
            get(routes::recording_thumbnail),
        )
        .nest_service("/live", ServeDir::new(&state.config.hls_dir))
        .nest_service("/videos", ServeDir::new(&state.config.video_root))
        .nest_service("/snapshots", ServeDir::new(&state.config.snapshot_dir))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
