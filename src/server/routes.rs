//! Request handlers
//!
//! Handlers stay thin: parameter handling here, all real work in the
//! pipeline and library modules. Process and filesystem operations block, so
//! they run on the blocking pool rather than the request tasks.

use super::AppState;
use crate::library::index::{self, RecordingEntry};
use crate::library::thumbnail;
use crate::library::{LibraryError, Page};
use crate::pipeline::SupervisorStatus;
use crate::utils::error::{AppError, AppResult};
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::task;

const MAX_PAGE_SIZE: usize = 500;

fn default_page() -> usize {
    1
}

fn default_page_size() -> usize {
    50
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    pub start_after: Option<String>,
    pub start_before: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CursorQuery {
    /// Return entries strictly earlier than this ISO8601 start time.
    pub after: Option<String>,
    #[serde(default = "default_page_size")]
    pub limit: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenamePayload {
    pub new_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlResponse {
    pub running: bool,
    pub status: SupervisorStatus,
}

pub async fn service_info() -> Json<Value> {
    Json(json!({
        "message": "Pi Cam server running.",
        "liveHls": "/live/live.m3u8",
        "recordingsApi": "/recordings",
        "snapshotsRoot": "/snapshots/",
        "health": "/health",
        "utcNow": Utc::now(),
    }))
}

pub async fn health(State(state): State<AppState>) -> AppResult<Json<SupervisorStatus>> {
    let supervisor = state.supervisor.clone();
    let status = task::spawn_blocking(move || supervisor.status())
        .await
        .map_err(join_error)?;
    Ok(Json(status))
}

pub async fn control_start(State(state): State<AppState>) -> AppResult<Json<ControlResponse>> {
    let supervisor = state.supervisor.clone();
    let (result, running, status) = task::spawn_blocking(move || {
        let result = supervisor.start();
        (result, supervisor.is_running(), supervisor.status())
    })
    .await
    .map_err(join_error)?;
    result?;
    Ok(Json(ControlResponse { running, status }))
}

pub async fn control_stop(State(state): State<AppState>) -> AppResult<Json<ControlResponse>> {
    let supervisor = state.supervisor.clone();
    let (running, status) = task::spawn_blocking(move || {
        supervisor.stop();
        (supervisor.is_running(), supervisor.status())
    })
    .await
    .map_err(join_error)?;
    Ok(Json(ControlResponse { running, status }))
}

pub async fn list_recordings(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Page<RecordingEntry>>> {
    let entries = scan_recordings(&state).await?;
    let filtered = index::filter_by_time(
        entries,
        query.start_after.as_deref(),
        query.start_before.as_deref(),
    );
    let page = query.page.max(1);
    let page_size = query.page_size.clamp(1, MAX_PAGE_SIZE);
    Ok(Json(index::paginate(filtered, page, page_size)))
}

pub async fn list_recordings_cursor(
    State(state): State<AppState>,
    Query(query): Query<CursorQuery>,
) -> AppResult<Json<Page<RecordingEntry>>> {
    let entries = scan_recordings(&state).await?;
    let limit = query.limit.clamp(1, MAX_PAGE_SIZE);
    Ok(Json(index::cursor_page(
        entries,
        query.after.as_deref(),
        limit,
    )))
}

pub async fn delete_recording(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> AppResult<Json<Value>> {
    let dir = state.config.video_root.clone();
    let name = filename.clone();
    task::spawn_blocking(move || index::delete_recording(&dir, &name))
        .await
        .map_err(join_error)??;
    tracing::info!("Deleted recording {}", filename);
    Ok(Json(json!({ "deleted": filename })))
}

pub async fn rename_recording(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    Json(payload): Json<RenamePayload>,
) -> AppResult<Json<Value>> {
    let dir = state.config.video_root.clone();
    let name = filename.clone();
    let new_name = payload.new_name.clone();
    task::spawn_blocking(move || index::rename_recording(&dir, &name, &new_name))
        .await
        .map_err(join_error)??;
    tracing::info!("Renamed recording {} -> {}", filename, payload.new_name);
    Ok(Json(json!({ "renamed": filename, "to": payload.new_name })))
}

pub async fn recording_thumbnail(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> AppResult<Response> {
    if !filename.to_ascii_lowercase().ends_with(".mp4") {
        return Err(LibraryError::InvalidName(filename).into());
    }
    let Some(start) = index::parse_start_time(&filename) else {
        return Err(LibraryError::NotFound(filename).into());
    };

    let dir = state.config.snapshot_dir.clone();
    let snapshot = task::spawn_blocking(move || thumbnail::find_snapshot(&dir, start))
        .await
        .map_err(join_error)?;
    let Some(path) = snapshot else {
        return Err(LibraryError::NotFound(filename).into());
    };
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| LibraryError::NotFound(filename))?;
    Ok(([(header::CONTENT_TYPE, "image/jpeg")], bytes).into_response())
}

async fn scan_recordings(state: &AppState) -> AppResult<Vec<RecordingEntry>> {
    let dir = state.config.video_root.clone();
    let segment_seconds = state.config.segment_seconds;
    let entries = task::spawn_blocking(move || index::list_recordings(&dir, segment_seconds))
        .await
        .map_err(join_error)??;
    Ok(entries)
}

fn join_error(err: task::JoinError) -> AppError {
    AppError::Internal(err.to_string())
}
