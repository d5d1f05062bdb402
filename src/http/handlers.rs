use super::state::AppState;
use crate::events::Stream;
use crate::manager::TeardownReport;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{error, info};

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct EndLiveResponse {
    pub room_id: String,
    /// Set when the room was already empty and got torn down
    pub teardown: Option<TeardownReport>,
}

#[derive(Debug, Serialize)]
pub struct SnapshotResponse {
    pub room_id: String,
    pub path: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn room_not_found(room_id: &str) -> axum::response::Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: format!("Room {} not found", room_id),
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /rooms
/// Status of every active room
pub async fn list_rooms(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.manager.rooms().await)).into_response()
}

/// GET /rooms/:room_id
/// Presence, liveness, recording and event counts for one room
pub async fn get_room_status(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> impl IntoResponse {
    match state.manager.room_status(&room_id).await {
        Some(status) => (StatusCode::OK, Json(status)).into_response(),
        None => room_not_found(&room_id),
    }
}

/// POST /rooms/:room_id/end
/// End the live session; an empty room is torn down before responding
pub async fn end_live(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> impl IntoResponse {
    if state.manager.presence(&room_id).is_none() {
        return room_not_found(&room_id);
    }

    info!("Ending live session for room: {}", room_id);

    let teardown = match state.manager.end_live_session(&room_id) {
        Some(handle) => match handle.await {
            Ok(report) => Some(report),
            Err(e) => {
                error!("Teardown task for {} failed: {}", room_id, e);
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse {
                        error: format!("Teardown failed: {}", e),
                    }),
                )
                    .into_response();
            }
        },
        None => None,
    };

    (StatusCode::OK, Json(EndLiveResponse { room_id, teardown })).into_response()
}

/// PUT /rooms/:room_id/episode/:episode_id
/// Name the room's artifacts after an episode
pub async fn associate_episode(
    State(state): State<AppState>,
    Path((room_id, episode_id)): Path<(String, String)>,
) -> impl IntoResponse {
    if state.manager.presence(&room_id).is_none() {
        return room_not_found(&room_id);
    }

    state.manager.associate_episode(&room_id, &episode_id);
    match state.manager.room_status(&room_id).await {
        Some(status) => (StatusCode::OK, Json(status)).into_response(),
        None => room_not_found(&room_id),
    }
}

/// POST /rooms/:room_id/recording/snapshot
/// Transcode what has been recorded so far without stopping
pub async fn snapshot_recording(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> impl IntoResponse {
    match state.manager.snapshot_recording(&room_id).await {
        Ok(Some(path)) => (StatusCode::OK, Json(SnapshotResponse { room_id, path })).into_response(),
        Ok(None) => (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: format!("Room {} is not recording", room_id),
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to snapshot recording for {}: {}", room_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: format!("Failed to snapshot recording: {}", e),
                }),
            )
                .into_response()
        }
    }
}

/// GET /episodes/:episode_id/logs/:stream
/// Latest flushed speech, session or chat (`comments`) log of an episode
pub async fn get_episode_log(
    State(state): State<AppState>,
    Path((episode_id, stream)): Path<(String, Stream)>,
) -> impl IntoResponse {
    match state.manager.flushed_log(&episode_id, stream).await {
        Ok(Some(document)) => (StatusCode::OK, Json(document)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("No {:?} log found for episode {}", stream, episode_id),
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to read {:?} log for {}: {:#}", stream, episode_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: format!("Failed to read log: {}", e),
                }),
            )
                .into_response()
        }
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
