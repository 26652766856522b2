use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::{Config, MediaRoot};
use crate::error::{Result, StreamError};
use crate::metadata::{MetadataExtractor, VideoMetadata};

/// Maximum directory depth enumerated below a media root. Files deeper
/// than this are silently truncated from listings.
pub const MAX_SCAN_DEPTH: usize = 10;

/// A resolved video file. Derived on demand, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoRecord {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub modified: i64,
    pub content_type: String,
    pub directory: String,
    pub path: PathBuf,
    pub extension: String,
    pub stream_url: String,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<VideoMetadata>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectoryInfo {
    pub name: String,
    pub path: PathBuf,
    pub description: String,
    pub enabled: bool,
    pub video_count: usize,
    pub total_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub videos: Option<Vec<VideoRecord>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogStats {
    pub total_videos: usize,
    pub total_size: u64,
    pub enabled_directories: usize,
    pub total_directories: usize,
    pub supported_formats: Vec<String>,
    pub max_upload_size: u64,
}

/// Resolves opaque `dir:stem` identifiers against the configured media
/// roots. Configuration is read-only after startup; every lookup goes to
/// the filesystem, so records reflect the current on-disk state.
#[derive(Debug, Clone)]
pub struct Catalog {
    roots: Vec<MediaRoot>,
    formats: Vec<String>,
    max_upload_size: u64,
    extractor: MetadataExtractor,
}

impl Catalog {
    pub fn new(config: &Config) -> Self {
        Self {
            roots: config.video.directories.clone(),
            formats: config.video.supported_formats.clone(),
            max_upload_size: config.video.max_upload_size,
            extractor: MetadataExtractor::default(),
        }
    }

    pub fn roots(&self) -> &[MediaRoot] {
        &self.roots
    }

    pub fn enabled_roots(&self) -> impl Iterator<Item = &MediaRoot> {
        self.roots.iter().filter(|r| r.enabled)
    }

    pub fn supported_formats(&self) -> &[String] {
        &self.formats
    }

    pub fn max_upload_size(&self) -> u64 {
        self.max_upload_size
    }

    pub fn find_root(&self, name: &str) -> Option<&MediaRoot> {
        self.roots.iter().find(|r| r.name == name)
    }

    /// Union of `list_in` over every enabled root; a failing root is
    /// skipped, not fatal.
    pub fn list_all(&self) -> Vec<VideoRecord> {
        let mut all = Vec::new();
        for root in self.enabled_roots() {
            match self.list_in(&root.name) {
                Ok(videos) => all.extend(videos),
                Err(e) => debug!("skipping root {}: {}", root.name, e),
            }
        }
        all
    }

    /// Recursively enumerate one root.
    pub fn list_in(&self, name: &str) -> Result<Vec<VideoRecord>> {
        let root = self
            .find_root(name)
            .ok_or_else(|| StreamError::NotFound(format!("directory not found: {name}")))?;
        if !root.enabled {
            return Err(StreamError::NotFound(format!(
                "directory is disabled: {name}"
            )));
        }

        let mut videos = Vec::new();
        let walker = WalkDir::new(&root.path)
            .min_depth(1)
            .max_depth(MAX_SCAN_DEPTH)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0
                    || !e
                        .file_name()
                        .to_str()
                        .map(|s| s.starts_with('.'))
                        .unwrap_or(false)
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    // A permission-denied subtree must not poison the root.
                    debug!("walk error under {}: {}", root.path.display(), e);
                    continue;
                }
            };
            if entry.path_is_symlink() || entry.file_type().is_dir() {
                continue;
            }

            let path = entry.path();
            let ext = extension_of(path);
            if !self.is_supported(&ext) {
                continue;
            }

            let Some(stem) = relative_stem(&root.path, path) else {
                continue;
            };
            match self.build_record(root, &stem, path, &ext) {
                Ok(record) => videos.push(record),
                Err(e) => debug!("skipping {}: {}", path.display(), e),
            }
        }

        Ok(videos)
    }

    /// Resolve an identifier to a record.
    ///
    /// `dir:stem` looks up the named root and tries each supported
    /// extension in configured order; an identifier without `:` is tried
    /// as a stem against every enabled root.
    pub fn resolve(&self, identifier: &str) -> Result<VideoRecord> {
        if let Some((dir, stem)) = identifier.split_once(':') {
            let root = self
                .find_root(dir)
                .filter(|r| r.enabled)
                .ok_or_else(|| {
                    StreamError::NotFound(format!("directory not found or disabled: {dir}"))
                })?;
            sanitize_stem(stem)?;
            if let Some((path, ext)) = self.find_video_file(&root.path, stem) {
                return self.build_record(root, stem, &path, &ext);
            }
            return Err(StreamError::NotFound(format!(
                "video not found: {identifier}"
            )));
        }

        sanitize_stem(identifier)?;
        for root in self.enabled_roots() {
            if let Some((path, ext)) = self.find_video_file(&root.path, identifier) {
                return self.build_record(root, identifier, &path, &ext);
            }
        }
        Err(StreamError::NotFound(format!(
            "video not found: {identifier}"
        )))
    }

    /// Case-insensitive substring search over display names with the
    /// extension stripped.
    pub fn search(&self, query: &str) -> Vec<VideoRecord> {
        let needle = query.to_lowercase();
        self.list_all()
            .into_iter()
            .filter(|v| {
                let stem = v
                    .name
                    .rsplit_once('.')
                    .map(|(stem, _)| stem)
                    .unwrap_or(&v.name);
                stem.to_lowercase().contains(&needle)
            })
            .collect()
    }

    /// Existence, nonzero size, recognized extension, size within the
    /// upload limit.
    pub fn validate_file(&self, path: &Path) -> Result<()> {
        let stat = std::fs::metadata(path)
            .map_err(|e| StreamError::NotFound(format!("file not accessible: {e}")))?;
        let ext = extension_of(path);
        if !self.is_supported(&ext) {
            return Err(StreamError::InvalidMedia(format!(
                "unsupported video format: {ext}"
            )));
        }
        if stat.len() == 0 {
            return Err(StreamError::InvalidMedia("video file is empty".into()));
        }
        if stat.len() > self.max_upload_size {
            return Err(StreamError::InvalidMedia(format!(
                "video file exceeds size limit: {} > {}",
                stat.len(),
                self.max_upload_size
            )));
        }
        Ok(())
    }

    /// Per-root summaries, with counts and total bytes for enabled roots.
    pub fn directories_info(&self, include_videos: bool) -> Vec<DirectoryInfo> {
        self.roots
            .iter()
            .map(|root| {
                let mut info = DirectoryInfo {
                    name: root.name.clone(),
                    path: root.path.clone(),
                    description: root.description.clone(),
                    enabled: root.enabled,
                    video_count: 0,
                    total_size: 0,
                    videos: None,
                };
                if root.enabled {
                    if let Ok(videos) = self.list_in(&root.name) {
                        info.video_count = videos.len();
                        info.total_size = videos.iter().map(|v| v.size).sum();
                        if include_videos {
                            info.videos = Some(videos);
                        }
                    }
                }
                info
            })
            .collect()
    }

    /// Aggregate numbers for the health endpoint.
    pub fn stats(&self) -> CatalogStats {
        let mut total_videos = 0;
        let mut total_size = 0;
        let mut enabled = 0;
        for root in self.enabled_roots() {
            enabled += 1;
            if let Ok(videos) = self.list_in(&root.name) {
                total_videos += videos.len();
                total_size += videos.iter().map(|v| v.size).sum::<u64>();
            }
        }
        CatalogStats {
            total_videos,
            total_size,
            enabled_directories: enabled,
            total_directories: self.roots.len(),
            supported_formats: self.formats.clone(),
            max_upload_size: self.max_upload_size,
        }
    }

    /// Replace the record's listing-grade metadata with a probed block.
    /// Probe failures degrade back to the same defaults, never to an error.
    pub fn enrich(&self, record: &mut VideoRecord) {
        match self.extractor.extract(&record.path) {
            Ok(metadata) => record.metadata = Some(metadata),
            Err(e) => warn!("metadata probe failed for {}: {}", record.id, e),
        }
    }

    pub fn is_supported(&self, ext: &str) -> bool {
        self.formats.iter().any(|f| f == ext)
    }

    /// First existing `stem + extension` candidate in configured order.
    fn find_video_file(&self, root_path: &Path, stem: &str) -> Option<(PathBuf, String)> {
        for ext in &self.formats {
            let candidate = root_path.join(format!("{stem}{ext}"));
            if candidate.is_file() {
                return Some((candidate, ext.clone()));
            }
        }
        None
    }

    fn build_record(
        &self,
        root: &MediaRoot,
        stem: &str,
        path: &Path,
        ext: &str,
    ) -> Result<VideoRecord> {
        let stat = std::fs::metadata(path)?;
        let modified = stat
            .modified()
            .map(|t| DateTime::<Utc>::from(t).timestamp())
            .unwrap_or_default();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(stem)
            .to_string();
        let metadata = self.extractor.extract_basic(path).ok();

        Ok(VideoRecord {
            id: format!("{}:{}", root.name, stem),
            name,
            size: stat.len(),
            modified,
            content_type: content_type_for(ext).to_string(),
            directory: root.name.clone(),
            path: path.to_path_buf(),
            extension: ext.to_string(),
            stream_url: format!("/stream/{}/{}", root.name, stem),
            available: true,
            metadata,
        })
    }
}

/// Fixed extension → MIME mapping; unknown extensions default to mp4.
pub fn content_type_for(ext: &str) -> &'static str {
    match ext {
        ".mp4" | ".m4v" => "video/mp4",
        ".avi" => "video/avi",
        ".mov" => "video/quicktime",
        ".mkv" => "video/x-matroska",
        ".webm" => "video/webm",
        ".flv" => "video/x-flv",
        ".3gp" => "video/3gpp",
        _ => "video/mp4",
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default()
}

/// Relative path below the root with the extension removed, using forward
/// slashes regardless of platform.
fn relative_stem(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let stem = rel.with_extension("");
    let parts: Vec<&str> = stem
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Multi-segment stems are allowed, but must stay inside the root.
fn sanitize_stem(stem: &str) -> Result<()> {
    if stem.is_empty() {
        return Err(StreamError::InvalidMedia("empty video identifier".into()));
    }
    if stem.starts_with('/') || stem.split('/').any(|part| part == "..") {
        return Err(StreamError::NotFound(format!("video not found: {stem}")));
    }
    Ok(())
}
