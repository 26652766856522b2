use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde_json::json;
use tracing::info;

use crate::errors::AppError;
use crate::state::AppState;

/// GET /api/scheduler/stats
pub async fn get_stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    let now = Utc::now();
    Json(json!({
        "scheduler": state.scheduler.stats().await,
        "timestamp": {
            "unix": now.timestamp(),
            "format": now.to_rfc3339(),
        },
    }))
}

/// GET /api/scheduler/status
pub async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "running": state.scheduler.is_running().await,
        "stats": state.scheduler.stats().await,
    }))
}

/// POST /api/scheduler/start
pub async fn start(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.scheduler.start().await;
    Json(json!({
        "message": "Scheduler service started successfully",
    }))
}

/// POST /api/scheduler/stop
pub async fn stop(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.scheduler.stop().await;
    Json(json!({
        "message": "Scheduler service stopped successfully",
    }))
}

/// POST /api/scheduler/video-delete/:id
///
/// The identifier must resolve through the catalog; the enqueued payload
/// is the resolved absolute path, never the raw parameter.
pub async fn add_video_deletion(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
) -> Response {
    let video = match state.catalog.resolve(&video_id) {
        Ok(video) => video,
        Err(e) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({
                    "error": "Video not found",
                    "video_id": video_id,
                    "details": e.to_string(),
                    "timestamp": Utc::now().timestamp(),
                })),
            )
                .into_response();
        }
    };

    let path = video.path.to_string_lossy();
    match state.scheduler.add_video_deletion(&path) {
        Ok(task) => {
            info!("scheduled deletion of {} as task {}", video.id, task.id);
            Json(json!({
                "message": "Video deletion scheduled successfully",
                "video_id": video.id,
                "task_id": task.id,
            }))
            .into_response()
        }
        Err(e) => AppError::internal("Failed to schedule video deletion")
            .with_details(e.to_string())
            .into_response(),
    }
}
