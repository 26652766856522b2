use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_stream::StreamExt;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use vidgate_core::{AccessOutcome, VideoRecord};

use crate::state::AppState;

/// GET /stream/:id streams by opaque `dir:stem` identifier.
pub async fn stream_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let video = match state.catalog.resolve(&video_id) {
        Ok(video) => video,
        Err(e) => return video_not_found(&video_id, &e),
    };
    stream_video_file(&state, video, &headers).await
}

/// GET /stream/:directory/*path accepts a multi-segment stem, recomposed into the
/// canonical `dir:stem` identifier.
pub async fn stream_by_directory(
    State(state): State<AppState>,
    Path((directory, video_path)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let video_id = format!("{directory}:{video_path}");
    let video = match state.catalog.resolve(&video_id) {
        Ok(video) => video,
        Err(e) => return video_not_found(&video_id, &e),
    };
    stream_video_file(&state, video, &headers).await
}

fn video_not_found(video_id: &str, err: &vidgate_core::StreamError) -> Response {
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

/// Admission, header emission and body streaming shared by both stream
/// routes.
async fn stream_video_file(state: &AppState, video: VideoRecord, headers: &HeaderMap) -> Response {
    let guard = match state.stream_gate.check_access() {
        AccessOutcome::Accepted(guard) => guard,
        rejected => {
            let error = match rejected {
                AccessOutcome::RateLimited => "Rate limit exceeded",
                _ => "Too many concurrent connections",
            };
            return (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({
                    "error": error,
                    "reason": rejected.reason(),
                    "timestamp": Utc::now().timestamp(),
                })),
            )
                .into_response();
        }
    };

    let stat = match tokio::fs::metadata(&video.path).await {
        Ok(stat) => stat,
        Err(e) => {
            warn!("failed to stat {}: {e}", video.path.display());
            return stream_failure("Failed to get file information");
        }
    };
    let file_size = stat.len();
    let last_modified = stat
        .modified()
        .ok()
        .map(|t| DateTime::<Utc>::from(t).format("%a, %d %b %Y %H:%M:%S GMT").to_string());

    let settings = &state.config.video.streaming;

    let range_header = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .filter(|_| settings.range_support);

    if let Some(range_header) = range_header {
        let Some(range) = parse_range(range_header, file_size) else {
            return (
                StatusCode::RANGE_NOT_SATISFIABLE,
                [(header::CONTENT_RANGE, format!("bytes */{file_size}"))],
                Json(json!({
                    "error": "Invalid range",
                    "timestamp": Utc::now().timestamp(),
                })),
            )
                .into_response();
        };

        let mut file = match tokio::fs::File::open(&video.path).await {
            Ok(file) => file,
            Err(e) => {
                warn!("failed to open {}: {e}", video.path.display());
                return stream_failure("Failed to open video file");
            }
        };
        if let Err(e) = file.seek(std::io::SeekFrom::Start(range.start)).await {
            warn!("failed to seek in {}: {e}", video.path.display());
            return stream_failure("Failed to seek in file");
        }

        let content_length = range.end - range.start + 1;
        info!(
            "range request {}-{}/{} for {}",
            range.start, range.end, file_size, video.id
        );

        // The guard rides the stream: the slot frees when the body is
        // fully sent, the write fails, or the client goes away.
        let reader = file.take(content_length);
        let stream = ReaderStream::with_capacity(reader, settings.chunk_size)
            .map(move |chunk| {
                let _ = &guard;
                chunk
            });

        let mut builder = Response::builder()
            .status(StatusCode::PARTIAL_CONTENT)
            .header(header::CONTENT_TYPE, video.content_type.as_str())
            .header(header::ACCEPT_RANGES, "bytes")
            .header(header::CONTENT_LENGTH, content_length.to_string())
            .header(
                header::CONTENT_RANGE,
                format!("bytes {}-{}/{}", range.start, range.end, file_size),
            )
            .header(header::CACHE_CONTROL, settings.cache_control.as_str());
        if let Some(last_modified) = last_modified {
            builder = builder.header(header::LAST_MODIFIED, last_modified);
        }
        return match builder.body(Body::from_stream(stream)) {
            Ok(response) => response,
            Err(e) => {
                warn!("failed to build range response: {e}");
                stream_failure("Failed to emit response headers")
            }
        };
    }

    // Whole-file send.
    let file = match tokio::fs::File::open(&video.path).await {
        Ok(file) => file,
        Err(e) => {
            warn!("failed to open {}: {e}", video.path.display());
            return stream_failure("Failed to open video file");
        }
    };
    info!("streaming {} ({} bytes)", video.id, file_size);

    let stream = ReaderStream::with_capacity(file, settings.chunk_size).map(move |chunk| {
        let _ = &guard;
        chunk
    });

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, video.content_type.as_str())
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_LENGTH, file_size.to_string())
        .header(header::CACHE_CONTROL, settings.cache_control.as_str());
    if let Some(last_modified) = last_modified {
        builder = builder.header(header::LAST_MODIFIED, last_modified);
    }
    match builder.body(Body::from_stream(stream)) {
        Ok(response) => response,
        Err(e) => {
            warn!("failed to build stream response: {e}");
            stream_failure("Failed to emit response headers")
        }
    }
}

fn stream_failure(message: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": message,
            "timestamp": Utc::now().timestamp(),
        })),
    )
        .into_response()
}

#[derive(Debug, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

/// Parse a `bytes=S-E` header against the file size.
///
/// One range spec only; either side may be empty. An empty start is a
/// suffix range per RFC 7233 (`bytes=-N` means the last N bytes); an empty
/// end runs to the end of the file. Out-of-bound ends clamp to the last
/// byte; anything else invalid yields None and a 416.
pub fn parse_range(range_header: &str, file_size: u64) -> Option<ByteRange> {
    let spec = range_header.strip_prefix("bytes=")?;
    if spec.contains(',') {
        // Multi-range is not supported.
        return None;
    }
    let (start_part, end_part) = spec.split_once('-')?;
    if end_part.contains('-') {
        return None;
    }

    let start = if start_part.is_empty() {
        let suffix_len: u64 = end_part.parse().ok()?;
        let start = file_size.saturating_sub(suffix_len);
        return if suffix_len == 0 || file_size == 0 {
            None
        } else {
            Some(ByteRange {
                start,
                end: file_size - 1,
            })
        };
    } else {
        start_part.parse::<u64>().ok()?
    };

    let end = if end_part.is_empty() {
        file_size.checked_sub(1)?
    } else {
        end_part.parse::<u64>().ok()?.min(file_size.saturating_sub(1))
    };

    if start > end || start >= file_size {
        return None;
    }
    Some(ByteRange { start, end })
}
