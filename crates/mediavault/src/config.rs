//! Ingestion policy configuration.
//!
//! All thresholds here are tunable policy, not contract: the stuck-job
//! timeout and the terminal-state eviction grace in particular are expected
//! to be adjusted per deployment.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Vision analysis service settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisConfig {
    /// Endpoint accepting `POST {"url": "..."}`.
    pub endpoint: String,
    /// Optional bearer token.
    pub api_key: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8090/v1/analyze".to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IngestConfig {
    /// Per-file upload ceiling in bytes.
    pub max_file_bytes: u64,
    /// Longest edge of generated thumbnails, in pixels.
    pub thumbnail_max_dim: u32,
    /// Age (from creation) after which a non-terminal job is force-failed.
    pub stuck_timeout_secs: u64,
    /// Synchronizer reconciliation interval while jobs are active.
    pub poll_interval_ms: u64,
    /// How long a terminal job stays visible before eviction.
    pub eviction_grace_ms: u64,
    /// TTL requested for artifact read URLs handed to the analysis service.
    pub read_url_ttl_secs: u64,
    pub analysis: AnalysisConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: 10 * 1024 * 1024,
            thumbnail_max_dim: 320,
            stuck_timeout_secs: 300,
            poll_interval_ms: 2000,
            eviction_grace_ms: 5000,
            read_url_ttl_secs: 600,
            analysis: AnalysisConfig::default(),
        }
    }
}

impl IngestConfig {
    /// Loads configuration from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::load_from_str(&content)
    }

    pub fn load_from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_file_bytes == 0 {
            return Err(ConfigError::Validation {
                message: "maxFileBytes must be greater than zero".to_string(),
            });
        }
        if self.thumbnail_max_dim == 0 {
            return Err(ConfigError::Validation {
                message: "thumbnailMaxDim must be greater than zero".to_string(),
            });
        }
        if self.stuck_timeout_secs == 0 {
            return Err(ConfigError::Validation {
                message: "stuckTimeoutSecs must be greater than zero".to_string(),
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Validation {
                message: "pollIntervalMs must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn stuck_timeout(&self) -> Duration {
        Duration::from_secs(self.stuck_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn eviction_grace(&self) -> Duration {
        Duration::from_millis(self.eviction_grace_ms)
    }

    pub fn read_url_ttl(&self) -> Duration {
        Duration::from_secs(self.read_url_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = IngestConfig::default();
        assert_eq!(config.max_file_bytes, 10 * 1024 * 1024);
        assert_eq!(config.thumbnail_max_dim, 320);
        assert_eq!(config.stuck_timeout(), Duration::from_secs(300));
        assert_eq!(config.poll_interval(), Duration::from_millis(2000));
        assert_eq!(config.eviction_grace(), Duration::from_millis(5000));
    }

    #[test]
    fn test_load_partial_overrides() {
        let config = IngestConfig::load_from_str(
            r#"{"maxFileBytes": 1048576, "stuckTimeoutSecs": 60}"#,
        )
        .unwrap();
        assert_eq!(config.max_file_bytes, 1048576);
        assert_eq!(config.stuck_timeout_secs, 60);
        // Untouched fields keep their defaults.
        assert_eq!(config.thumbnail_max_dim, 320);
    }

    #[test]
    fn test_load_analysis_section() {
        let config = IngestConfig::load_from_str(
            r#"{"analysis": {"endpoint": "https://vision.example/analyze", "apiKey": "k"}}"#,
        )
        .unwrap();
        assert_eq!(config.analysis.endpoint, "https://vision.example/analyze");
        assert_eq!(config.analysis.api_key.as_deref(), Some("k"));
        assert_eq!(config.analysis.timeout_secs, 30);
    }

    #[test]
    fn test_rejects_zero_ceiling() {
        let result = IngestConfig::load_from_str(r#"{"maxFileBytes": 0}"#);
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_rejects_invalid_json() {
        let result = IngestConfig::load_from_str("not json");
        assert!(matches!(result, Err(ConfigError::ParseJson(_))));
    }
}
