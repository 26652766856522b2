use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StreamError};

/// Complete server configuration.
///
/// Loaded from an optional YAML file plus `VIDGATE_*` environment
/// overrides; every section carries defaults so a bare install works.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub video: VideoConfig,
    pub logging: LoggingConfig,
    pub tasks: TaskConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,
    pub max_connections: usize,
    /// Token refill rate for the streaming admission bucket.
    /// 0 means `max_connections / 4`.
    pub tokens_per_second: usize,
    #[serde(with = "humantime_serde")]
    pub graceful_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 9000,
            host: "0.0.0.0".to_string(),
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            max_connections: 100,
            tokens_per_second: 0,
            graceful_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// Effective refill rate, applying the `max_connections / 4` fallback.
    pub fn effective_tokens_per_second(&self) -> usize {
        if self.tokens_per_second > 0 {
            self.tokens_per_second
        } else {
            (self.max_connections / 4).max(1)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub directories: Vec<MediaRoot>,
    pub max_upload_size: u64,
    /// Dotted, lowercase extensions in resolution priority order.
    pub supported_formats: Vec<String>,
    pub streaming: StreamSettings,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            directories: vec![MediaRoot {
                name: "default".to_string(),
                path: PathBuf::from("./videos"),
                description: "Default video directory".to_string(),
                enabled: true,
            }],
            max_upload_size: 100 * 1024 * 1024,
            supported_formats: [".mp4", ".avi", ".mov", ".mkv", ".webm", ".flv", ".m4v", ".3gp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            streaming: StreamSettings::default(),
        }
    }
}

/// A named media source directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaRoot {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    pub cache_control: String,
    pub buffer_size: usize,
    pub range_support: bool,
    pub chunk_size: usize,
    #[serde(with = "humantime_serde")]
    pub connection_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            cache_control: "public, max-age=3600".to_string(),
            buffer_size: 32 * 1024,
            range_support: true,
            chunk_size: 1024 * 1024,
            connection_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "json" or "pretty"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Directory holding one file per persisted task record.
    pub data_dir: PathBuf,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/tasks"),
        }
    }
}

impl Config {
    /// Load configuration with priority: environment > file > defaults.
    pub fn load(config_file: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            } else {
                return Err(StreamError::Config(format!(
                    "config file not found: {path}"
                )));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("VIDGATE")
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder
            .build()
            .map_err(|e| StreamError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| StreamError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Startup validation. Failures here are fatal.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(StreamError::Config("server.port must be nonzero".into()));
        }
        if self.server.max_connections == 0 {
            return Err(StreamError::Config(
                "server.max_connections must be positive".into(),
            ));
        }
        if self.video.directories.is_empty() {
            return Err(StreamError::Config(
                "at least one video directory must be configured".into(),
            ));
        }
        let mut enabled = 0;
        for dir in &self.video.directories {
            if dir.enabled {
                enabled += 1;
                if dir.path.as_os_str().is_empty() {
                    return Err(StreamError::Config(format!(
                        "video directory path cannot be empty for directory: {}",
                        dir.name
                    )));
                }
            }
        }
        if enabled == 0 {
            return Err(StreamError::Config(
                "at least one video directory must be enabled".into(),
            ));
        }
        if self.video.max_upload_size == 0 {
            return Err(StreamError::Config(
                "video.max_upload_size must be positive".into(),
            ));
        }
        if self.video.supported_formats.is_empty() {
            return Err(StreamError::Config(
                "video.supported_formats must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Create enabled media roots if missing and resolve them to absolute
    /// paths so identifiers stay stable regardless of the working directory.
    pub fn ensure_directories(&mut self) -> Result<()> {
        for dir in &mut self.video.directories {
            if !dir.enabled {
                continue;
            }
            std::fs::create_dir_all(&dir.path)?;
            dir.path = dir.path.canonicalize()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.max_connections, 100);
        assert!(config.video.streaming.range_support);
        assert_eq!(config.video.streaming.chunk_size, 1024 * 1024);
    }

    #[test]
    fn tokens_per_second_fallback() {
        let mut server = ServerConfig::default();
        assert_eq!(server.effective_tokens_per_second(), 25);

        server.tokens_per_second = 10;
        assert_eq!(server.effective_tokens_per_second(), 10);

        server.tokens_per_second = 0;
        server.max_connections = 2;
        assert_eq!(server.effective_tokens_per_second(), 1);
    }

    #[test]
    fn rejects_no_enabled_directories() {
        let mut config = Config::default();
        config.video.directories[0].enabled = false;
        assert!(matches!(config.validate(), Err(StreamError::Config(_))));
    }

    #[test]
    fn rejects_zero_upload_limit() {
        let mut config = Config::default();
        config.video.max_upload_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            r#"
server:
  port: 9100
  max_connections: 7
  read_timeout: 10s
video:
  directories:
    - name: movies
      path: ./m
      description: Movie collection
  max_upload_size: 1048576
"#,
        )
        .unwrap();

        let config = Config::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.max_connections, 7);
        assert_eq!(config.server.read_timeout, Duration::from_secs(10));
        assert_eq!(config.video.directories[0].name, "movies");
        assert!(config.video.directories[0].enabled);
        assert_eq!(config.video.max_upload_size, 1048576);
        // Untouched sections keep their defaults.
        assert_eq!(config.video.streaming.buffer_size, 32 * 1024);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(Config::load(Some("/definitely/not/here.yaml")).is_err());
    }
}
