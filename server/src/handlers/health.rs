use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde_json::json;

use crate::state::AppState;
use crate::{APP_NAME, APP_VERSION};

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let video_stats = state.catalog.stats();

    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().timestamp(),
        "version": APP_VERSION,
        "uptime_seconds": state.uptime_seconds(),
        "server": {
            "port": state.config.server.port,
            "max_connections": state.config.server.max_connections,
            "active_connections": state.request_gate.active(),
        },
        "video": video_stats,
    }))
}

/// GET /ping
pub async fn ping() -> Json<serde_json::Value> {
    Json(json!({
        "message": "pong",
        "timestamp": Utc::now().timestamp(),
    }))
}

/// GET /ready returns 503 until at least one enabled root exists.
pub async fn ready(State(state): State<AppState>) -> Response {
    let enabled = state.catalog.enabled_roots().count();
    if enabled == 0 {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not ready",
                "reason": "no enabled video directories",
            })),
        )
            .into_response();
    }

    Json(json!({
        "status": "ready",
        "enabled_directories": enabled,
    }))
    .into_response()
}

/// GET /live
pub async fn live() -> Json<serde_json::Value> {
    Json(json!({
        "status": "alive",
        "timestamp": Utc::now().timestamp(),
    }))
}

/// GET /api/info
pub async fn info(State(state): State<AppState>) -> Json<serde_json::Value> {
    let directories = state.catalog.directories_info(false);
    let streaming = &state.config.video.streaming;

    Json(json!({
        "service": APP_NAME,
        "version": APP_VERSION,
        "endpoints": {
            "GET /health": "Health check and server status",
            "GET /api/info": "API information and capabilities",
            "GET /api/videos": "List all videos from all directories",
            "GET /api/videos/:directory": "List videos from specific directory",
            "GET /api/directories": "List all video directories",
            "GET /api/search?q=term": "Search videos by name",
            "GET /api/video/:id": "Video details",
            "GET /api/video/:id/validate": "Validate a video file",
            "GET /stream/:id": "Stream video (supports range requests)",
            "GET /stream/:directory/*path": "Stream video by directory path",
            "POST /upload/:directory/:id": "Upload video to specific directory",
            "POST /upload/:directory/batch": "Upload multiple videos",
            "GET /api/streaming/stats": "Streaming flow-control statistics",
            "GET /api/scheduler/stats": "Background scheduler statistics",
        },
        "features": [
            "Multi-directory video management",
            "Range request support for seeking",
            "Connection limiting",
            "Token-bucket admission control",
            "Background video cleanup",
            "Graceful shutdown",
        ],
        "video": {
            "supported_formats": state.catalog.supported_formats(),
            "max_upload_size": state.catalog.max_upload_size(),
            "directories": directories,
            "streaming": {
                "range_support": streaming.range_support,
                "cache_control": streaming.cache_control,
                "buffer_size": streaming.buffer_size,
                "chunk_size": streaming.chunk_size,
            },
        },
    }))
}

/// GET /api/streaming/stats
pub async fn streaming_stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "flow_control": state.stream_gate.detailed_stats(),
        "timestamp": Utc::now().timestamp(),
    }))
}
