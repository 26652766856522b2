use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::errors::AppError;
use crate::state::AppState;

/// GET /api/videos
pub async fn list_all_videos(State(state): State<AppState>) -> Json<serde_json::Value> {
    let videos = state.catalog.list_all();
    let directories: Vec<&str> = state
        .catalog
        .enabled_roots()
        .map(|r| r.name.as_str())
        .collect();

    Json(json!({
        "videos": videos,
        "count": videos.len(),
        "directories": directories,
    }))
}

/// GET /api/videos/:directory
pub async fn list_videos_in_directory(
    State(state): State<AppState>,
    Path(directory): Path<String>,
) -> Response {
    match state.catalog.list_in(&directory) {
        Ok(videos) => Json(json!({
            "directory": directory,
            "videos": videos,
            "count": videos.len(),
        }))
        .into_response(),
        Err(e) => AppError::not_found(format!("Failed to list videos in directory: {directory}"))
            .with_details(e.to_string())
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct DirectoriesQuery {
    #[serde(default)]
    include_videos: bool,
}

/// GET /api/directories?include_videos=bool
pub async fn list_directories(
    State(state): State<AppState>,
    Query(query): Query<DirectoriesQuery>,
) -> Json<serde_json::Value> {
    let directories = state.catalog.directories_info(query.include_videos);
    let enabled_count = directories.iter().filter(|d| d.enabled).count();

    Json(json!({
        "directories": directories,
        "count": directories.len(),
        "enabled_count": enabled_count,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    q: Option<String>,
}

/// GET /api/search?q=term
pub async fn search_videos(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Response {
    let Some(term) = query.q.filter(|q| !q.is_empty()) else {
        return AppError::bad_request("Query parameter 'q' is required").into_response();
    };

    let total = state.catalog.list_all().len();
    let videos = state.catalog.search(&term);

    Json(json!({
        "query": term,
        "videos": videos,
        "count": videos.len(),
        "total": total,
    }))
    .into_response()
}

/// GET /api/video/:id returns a single record with probe-enriched metadata.
pub async fn get_video_info(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
) -> Response {
    match state.catalog.resolve(&video_id) {
        Ok(mut video) => {
            state.catalog.enrich(&mut video);
            Json(video).into_response()
        }
        Err(e) => not_found_for(&video_id, &e),
    }
}

/// GET /api/video/:id/validate
pub async fn validate_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
) -> Response {
    let video = match state.catalog.resolve(&video_id) {
        Ok(video) => video,
        Err(e) => return not_found_for(&video_id, &e),
    };

    match state.catalog.validate_file(&video.path) {
        Ok(()) => Json(json!({
            "video_id": video_id,
            "valid": true,
            "message": "Video file is valid and ready for streaming",
            "video": video,
        }))
        .into_response(),
        Err(e) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({
                "error": "Video validation failed",
                "video_id": video_id,
                "details": e.to_string(),
                "valid": false,
                "timestamp": Utc::now().timestamp(),
            })),
        )
            .into_response(),
    }
}

fn not_found_for(video_id: &str, err: &vidgate_core::StreamError) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "Video not found",
            "video_id": video_id,
            "details": err.to_string(),
            "timestamp": Utc::now().timestamp(),
        })),
    )
        .into_response()
}
