use std::path::{Path as FsPath, PathBuf};

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};

use vidgate_core::MediaRoot;

use crate::errors::AppError;
use crate::state::AppState;

/// POST /upload/:directory/:id. Single file under the multipart field
/// `file`.
pub async fn upload_video(
    State(state): State<AppState>,
    Path((directory, video_id)): Path<(String, String)>,
    mut multipart: Multipart,
) -> Response {
    let mut upload: Option<(String, Vec<u8>)> = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() != Some("file") {
                    continue;
                }
                let filename = match field.file_name() {
                    Some(name) => name.to_string(),
                    None => {
                        return AppError::bad_request("Uploaded file must have a filename")
                            .into_response()
                    }
                };
                match field.bytes().await {
                    Ok(bytes) => {
                        upload = Some((filename, bytes.to_vec()));
                        break;
                    }
                    Err(e) => return multipart_failure(e),
                }
            }
            Ok(None) => break,
            Err(e) => return multipart_failure(e),
        }
    }

    let Some((filename, data)) = upload else {
        return AppError::bad_request("No file provided")
            .with_details("Use 'file' as the form field name")
            .into_response();
    };

    match save_upload(&state, &directory, &video_id, &filename, &data) {
        Ok(saved) => (StatusCode::CREATED, Json(saved)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /upload/:directory/batch. Any number of files under the
/// multipart field `files`; the stem of each filename becomes its id.
pub async fn upload_batch(
    State(state): State<AppState>,
    Path(directory): Path<String>,
    mut multipart: Multipart,
) -> Response {
    let mut results = Vec::new();
    let mut errors = Vec::new();
    let mut total = 0usize;

    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() != Some("files") {
                    continue;
                }
                let Some(filename) = field.file_name().map(str::to_string) else {
                    continue;
                };
                total += 1;
                let video_id = filename
                    .rsplit_once('.')
                    .map(|(stem, _)| stem.to_string())
                    .unwrap_or_else(|| filename.clone());

                match field.bytes().await {
                    Ok(bytes) => {
                        match save_upload(&state, &directory, &video_id, &filename, &bytes) {
                            Ok(saved) => results.push(saved),
                            Err(e) => errors.push(json!({
                                "filename": filename,
                                "error": e.message,
                            })),
                        }
                    }
                    Err(e) => errors.push(json!({
                        "filename": filename,
                        "error": e.to_string(),
                    })),
                }
            }
            Ok(None) => break,
            Err(e) => return multipart_failure(e),
        }
    }

    if total == 0 {
        return AppError::bad_request("No files provided")
            .with_details("Use 'files' as the form field name for multiple uploads")
            .into_response();
    }

    let status = if errors.is_empty() {
        StatusCode::CREATED
    } else if results.is_empty() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::PARTIAL_CONTENT
    };

    let mut body = json!({
        "message": format!(
            "Processed {} files, {} successful, {} failed",
            total,
            results.len(),
            errors.len()
        ),
        "directory": directory,
        "total_files": total,
        "successful": results.len(),
        "failed": errors.len(),
        "results": results,
    });
    if !errors.is_empty() {
        body["errors"] = json!(errors);
    }

    (status, Json(body)).into_response()
}

/// Shared validation and write path for both upload endpoints.
fn save_upload(
    state: &AppState,
    directory: &str,
    video_id: &str,
    filename: &str,
    data: &[u8],
) -> Result<Value, AppError> {
    if data.len() as u64 > state.catalog.max_upload_size() {
        return Err(AppError::too_large("File size exceeds limit").with_details(format!(
            "{} > {}",
            data.len(),
            state.catalog.max_upload_size()
        )));
    }

    let ext = extension_of(filename);
    if !state.catalog.is_supported(&ext) {
        return Err(AppError::bad_request("Unsupported file format")
            .with_details(format!("extension {ext:?} is not in the supported format list")));
    }

    if video_id.is_empty() || video_id.contains('/') || video_id.contains("..") {
        return Err(AppError::bad_request("Invalid video id"));
    }

    let root = find_enabled_root(state, directory)?;
    let target = root.path.join(format!("{video_id}{ext}"));
    if target.exists() {
        return Err(AppError::conflict("File already exists")
            .with_details(format!("{directory}:{video_id}")));
    }

    std::fs::create_dir_all(&root.path)
        .map_err(|e| AppError::internal("Failed to create target directory").with_details(e.to_string()))?;
    if let Err(e) = write_exact(&target, data) {
        // Never leave a partial file behind.
        let _ = std::fs::remove_file(&target);
        warn!("upload write failed for {}: {e}", target.display());
        return Err(AppError::internal("Failed to save file").with_details(e.to_string()));
    }

    info!("uploaded {}:{} ({} bytes)", directory, video_id, data.len());
    Ok(json!({
        "message": "Upload successful",
        "video_id": video_id,
        "directory": directory,
        "filename": format!("{video_id}{ext}"),
        "original_filename": filename,
        "size": data.len(),
        "content_type": vidgate_core::catalog::content_type_for(&ext),
    }))
}

fn write_exact(target: &PathBuf, data: &[u8]) -> std::io::Result<()> {
    std::fs::write(target, data)?;
    let written = std::fs::metadata(target)?.len();
    if written != data.len() as u64 {
        return Err(std::io::Error::other(format!(
            "file size mismatch: expected {}, wrote {written}",
            data.len()
        )));
    }
    Ok(())
}

fn find_enabled_root<'a>(state: &'a AppState, directory: &str) -> Result<&'a MediaRoot, AppError> {
    state
        .catalog
        .find_root(directory)
        .filter(|r| r.enabled)
        .ok_or_else(|| {
            AppError::not_found("Directory not found or disabled").with_details(directory.to_string())
        })
}

fn extension_of(filename: &str) -> String {
    FsPath::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default()
}

/// Multipart decode failures: the body-limit layer surfaces as 413,
/// everything else as 400.
fn multipart_failure(err: axum::extract::multipart::MultipartError) -> Response {
    let status = err.status();
    (
        status,
        Json(json!({
            "error": if status == StatusCode::PAYLOAD_TOO_LARGE {
                "File size exceeds limit"
            } else {
                "Failed to parse multipart form"
            },
            "details": err.to_string(),
            "timestamp": Utc::now().timestamp(),
        })),
    )
        .into_response()
}
