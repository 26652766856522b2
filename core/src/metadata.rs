use std::path::Path;
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

/// Technical metadata attached to a video record.
///
/// Either probed from the file or estimated from the extension; consumers
/// cannot rely on probed accuracy and serving never depends on it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub duration_seconds: f64,
    pub duration: String,
    pub width: u32,
    pub height: u32,
    pub resolution: String,
    pub bitrate: i64,
    pub frame_rate: f64,
    pub video_codec: String,
    pub audio_codec: String,
    pub format: String,
    pub file_size: u64,
    pub aspect_ratio: String,
    pub has_audio: bool,
    pub has_video: bool,
}

/// Extracts video metadata via an external `ffprobe` binary, degrading to
/// extension-keyed defaults whenever the probe is unavailable or fails.
#[derive(Debug, Clone)]
pub struct MetadataExtractor {
    probe_enabled: bool,
}

impl Default for MetadataExtractor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl MetadataExtractor {
    pub fn new(probe_enabled: bool) -> Self {
        Self { probe_enabled }
    }

    /// Full extraction: ffprobe first, fallback on any failure.
    pub fn extract<P: AsRef<Path>>(&self, file_path: P) -> Result<VideoMetadata> {
        let file_path = file_path.as_ref();
        let mut metadata = self.stat_basics(file_path)?;

        if self.probe_enabled {
            match self.probe(file_path, &mut metadata) {
                Ok(()) => return Ok(metadata),
                Err(e) => {
                    debug!("ffprobe failed for {}: {}", file_path.display(), e);
                }
            }
        }

        apply_extension_defaults(&mut metadata, &extension_of(file_path));
        Ok(metadata)
    }

    /// Cheap extraction used on listing paths: no subprocess, extension
    /// defaults and size-based estimates only.
    pub fn extract_basic<P: AsRef<Path>>(&self, file_path: P) -> Result<VideoMetadata> {
        let file_path = file_path.as_ref();
        let mut metadata = self.stat_basics(file_path)?;
        apply_extension_defaults(&mut metadata, &extension_of(file_path));
        Ok(metadata)
    }

    fn stat_basics(&self, file_path: &Path) -> Result<VideoMetadata> {
        let stat = std::fs::metadata(file_path)?;
        Ok(VideoMetadata {
            file_size: stat.len(),
            format: extension_of(file_path).trim_start_matches('.').to_string(),
            ..VideoMetadata::default()
        })
    }

    fn probe(&self, file_path: &Path, metadata: &mut VideoMetadata) -> Result<()> {
        let output = Command::new("ffprobe")
            .args([
                "-v",
                "quiet",
                "-show_format",
                "-show_streams",
                "-print_format",
                "json",
            ])
            .arg(file_path)
            .output()?;

        if !output.status.success() {
            return Err(crate::error::StreamError::InvalidMedia(format!(
                "ffprobe exited with {}",
                output.status
            )));
        }

        let json = String::from_utf8_lossy(&output.stdout);
        parse_probe_output(&json, metadata)
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: Option<ProbeFormat>,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
}

/// Parse ffprobe's `-print_format json` output into the metadata block.
fn parse_probe_output(json: &str, metadata: &mut VideoMetadata) -> Result<()> {
    let probe: ProbeOutput = serde_json::from_str(json)?;

    if let Some(format) = probe.format {
        if let Some(duration) = format.duration.and_then(|d| d.parse::<f64>().ok()) {
            metadata.duration_seconds = duration;
            metadata.duration = format_duration(duration);
        }
        if let Some(bitrate) = format.bit_rate.and_then(|b| b.parse::<i64>().ok()) {
            metadata.bitrate = bitrate;
        }
    }

    for stream in &probe.streams {
        match stream.codec_type.as_deref() {
            Some("video") if !metadata.has_video => {
                metadata.has_video = true;
                metadata.width = stream.width.unwrap_or_default();
                metadata.height = stream.height.unwrap_or_default();
                if let Some(name) = &stream.codec_name {
                    metadata.video_codec = name.clone();
                }
                if metadata.width > 0 && metadata.height > 0 {
                    metadata.resolution = format!("{}x{}", metadata.width, metadata.height);
                    metadata.aspect_ratio = format!(
                        "{:.2}:1",
                        f64::from(metadata.width) / f64::from(metadata.height)
                    );
                }
                if let Some(rate) = stream.r_frame_rate.as_deref().and_then(parse_frame_rate) {
                    metadata.frame_rate = rate;
                }
            }
            Some("audio") if !metadata.has_audio => {
                metadata.has_audio = true;
                if let Some(name) = &stream.codec_name {
                    metadata.audio_codec = name.clone();
                }
            }
            _ => {}
        }
    }

    Ok(())
}

/// ffprobe reports frame rates as a rational string like "30000/1001".
fn parse_frame_rate(raw: &str) -> Option<f64> {
    let (num, den) = raw.split_once('/')?;
    let num: f64 = num.parse().ok()?;
    let den: f64 = den.parse().ok()?;
    if den == 0.0 {
        return None;
    }
    Some(num / den)
}

/// Fallback table keyed on extension, with size-based estimates.
fn apply_extension_defaults(metadata: &mut VideoMetadata, ext: &str) {
    let (video_codec, audio_codec) = match ext {
        ".mp4" | ".mov" | ".m4v" => ("H.264", "AAC"),
        ".webm" => ("VP8/VP9", "Vorbis/Opus"),
        ".mkv" => ("H.264", "AC3"),
        ".avi" => ("Various", "Various"),
        _ => ("Unknown", "Unknown"),
    };
    metadata.video_codec = video_codec.to_string();
    metadata.audio_codec = audio_codec.to_string();
    metadata.has_video = true;
    metadata.has_audio = true;

    // Assume roughly 1 Mbps to place a duration estimate.
    if metadata.duration_seconds == 0.0 && metadata.file_size > 0 {
        metadata.duration_seconds = metadata.file_size as f64 / (1024.0 * 1024.0 / 8.0);
        metadata.duration = format_duration(metadata.duration_seconds);
    }

    if metadata.width == 0 || metadata.height == 0 {
        let (w, h, aspect) = if metadata.file_size > 100 * 1024 * 1024 {
            (1920, 1080, "16:9")
        } else if metadata.file_size > 50 * 1024 * 1024 {
            (1280, 720, "16:9")
        } else {
            (640, 480, "4:3")
        };
        metadata.width = w;
        metadata.height = h;
        metadata.resolution = format!("{w}x{h}");
        metadata.aspect_ratio = aspect.to_string();
    }

    if metadata.bitrate == 0 && metadata.duration_seconds > 0.0 {
        metadata.bitrate = (metadata.file_size as f64 * 8.0 / metadata.duration_seconds) as i64;
    }

    if metadata.frame_rate == 0.0 {
        metadata.frame_rate = 25.0;
    }
}

fn format_duration(seconds: f64) -> String {
    if seconds <= 0.0 {
        return "00:00:00".to_string();
    }
    let total = seconds as u64;
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}
