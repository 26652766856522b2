use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::handlers::{health, scheduler, stream, upload, videos};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.video.max_upload_size as usize + 1024 * 1024;

    let api = Router::new()
        .route("/info", get(health::info))
        .route("/directories", get(videos::list_directories))
        .route("/videos", get(videos::list_all_videos))
        .route("/videos/:directory", get(videos::list_videos_in_directory))
        .route("/search", get(videos::search_videos))
        .route("/video/:id", get(videos::get_video_info))
        .route("/video/:id/validate", get(videos::validate_video))
        .route("/streaming/stats", get(health::streaming_stats))
        .route("/scheduler/stats", get(scheduler::get_stats))
        .route("/scheduler/status", get(scheduler::status))
        .route("/scheduler/start", post(scheduler::start))
        .route("/scheduler/stop", post(scheduler::stop))
        .route(
            "/scheduler/video-delete/:id",
            post(scheduler::add_video_deletion),
        );

    Router::new()
        .route("/health", get(health::health))
        .route("/ping", get(health::ping))
        .route("/ready", get(health::ready))
        .route("/live", get(health::live))
        .nest("/api", api)
        .route("/stream/:directory/*path", get(stream::stream_by_directory))
        .route("/stream/:id", get(stream::stream_video))
        .route("/upload/:directory/batch", post(upload::upload_batch))
        .route("/upload/:directory/:id", post(upload::upload_video))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            connection_gate,
        ))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Request-level connection cap over the whole surface. Streaming bodies
/// are additionally governed by the admission gate, which brackets body
/// transmission rather than handler execution.
async fn connection_gate(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if !state.request_gate.try_acquire() {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "error": "Server is at maximum capacity",
                "max_connections": state.request_gate.max(),
                "active_connections": state.request_gate.active(),
                "timestamp": Utc::now().timestamp(),
            })),
        )
            .into_response();
    }

    let response = next.run(request).await;
    state.request_gate.release();
    response
}
