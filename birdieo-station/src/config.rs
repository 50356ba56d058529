//! Station configuration.
//!
//! Stored as a JSON file; every field has a default so a partial or empty
//! file is valid. Command-line flags override file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use birdieo_shared::{ApiClient, ClientError, StreamClient};
use clap::Args;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frame::DEFAULT_JPEG_QUALITY;
use crate::frame_source::{FrameSource, RetryPolicy, SourceMode};
use crate::media::{Facing, QualityHint};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid service URL: {0}")]
    Client(#[from] ClientError),
}

/// One live stream proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSourceConfig {
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub mode: SourceMode,
    /// Poll `/analyze` for this source
    #[serde(default = "default_true")]
    pub detections: bool,
}

impl StreamSourceConfig {
    pub fn client(&self) -> Result<StreamClient, ClientError> {
        StreamClient::new(&self.base_url)
    }

    pub fn frame_source(&self) -> Result<FrameSource, ClientError> {
        Ok(FrameSource::new(self.mode, self.client()?))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    pub api_url: String,
    pub streams: Vec<StreamSourceConfig>,
    pub health_interval_ms: u64,
    pub detection_interval_ms: u64,
    pub countdown_seconds: u32,
    pub settle_delay_ms: u64,
    pub jpeg_quality: u8,
    pub ready_timeout_ms: u64,
    pub facing: Facing,
    pub quality: QualityHint,
    pub frame_retry: RetryPolicy,
    /// Replace analysis results with a fixed fabricated layout
    pub demo_detections: bool,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8001/api".to_string(),
            streams: vec![StreamSourceConfig {
                name: "tee".to_string(),
                base_url: "http://localhost:8003".to_string(),
                mode: SourceMode::StillImage,
                detections: true,
            }],
            health_interval_ms: 2_000,
            detection_interval_ms: 2_000,
            countdown_seconds: 3,
            settle_delay_ms: 100,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            ready_timeout_ms: 20_000,
            facing: Facing::Front,
            quality: QualityHint::High,
            frame_retry: RetryPolicy::default(),
            demo_detections: false,
        }
    }
}

impl StationConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the config as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source: std::io::Error| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(io_err)
    }

    pub fn api_client(&self) -> Result<ApiClient, ClientError> {
        ApiClient::new(&self.api_url)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms.max(1))
    }

    pub fn detection_interval(&self) -> Duration {
        Duration::from_millis(self.detection_interval_ms.max(1))
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

fn default_true() -> bool {
    true
}

/// Flags shared by every `station` subcommand.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Path to a JSON config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Backend API base URL (overrides the config file)
    #[arg(long)]
    pub api_url: Option<String>,

    /// Bearer token for the backend API
    #[arg(long, env = "BIRDIEO_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Use fabricated detections instead of analysis results
    #[arg(long)]
    pub demo_detections: bool,
}

impl CommonArgs {
    /// Load the config file (or defaults) and apply flag overrides.
    pub fn resolve(&self) -> Result<StationConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => StationConfig::load(path)?,
            None => StationConfig::default(),
        };
        if let Some(url) = &self.api_url {
            config.api_url = url.clone();
        }
        if self.demo_detections {
            config.demo_detections = true;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: StationConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, StationConfig::default());
        assert_eq!(config.health_interval(), Duration::from_secs(2));
        assert_eq!(config.jpeg_quality, 85);
        assert!(!config.demo_detections);
    }

    #[test]
    fn test_partial_stream_entry() {
        let config: StationConfig = serde_json::from_str(
            r#"{"streams": [{"name": "range", "base_url": "http://cam:9000", "mode": "embedded_page"}]}"#,
        )
        .unwrap();
        let stream = &config.streams[0];
        assert_eq!(stream.mode, SourceMode::EmbeddedPage);
        assert!(stream.detections);
        assert_eq!(stream.frame_source().unwrap().mode(), SourceMode::EmbeddedPage);
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("station.json");

        let config = StationConfig {
            countdown_seconds: 5,
            demo_detections: true,
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(StationConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file() {
        let err = StationConfig::load(Path::new("/nonexistent/station.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_flag_overrides() {
        let args = CommonArgs {
            config: None,
            api_url: Some("http://backend:8001/api".into()),
            token: None,
            demo_detections: true,
        };
        let config = args.resolve().unwrap();
        assert_eq!(config.api_url, "http://backend:8001/api");
        assert!(config.demo_detections);
    }
}
