// src/utils/config.rs
//! Streaming core configuration
//!
//! All knobs have working defaults; deployments override them through an
//! optional `lablink.toml` next to the binary and `LABLINK_*` environment
//! variables (nested keys separated by `__`, e.g.
//! `LABLINK_BACKPRESSURE__MAX_QUEUE_SIZE=500`).

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::recording::recorder::RecordingConfig;
use crate::streaming::backpressure::BackpressureConfig;
use crate::streaming::rate_limiter::RateLimitConfig;
use crate::utils::errors::{Result, StreamError};

/// Top-level configuration for the streaming core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Per-connection admission control
    pub backpressure: BackpressureConfig,

    /// Per-connection send cadence
    pub rate_limit: RateLimitConfig,

    /// Recording sessions
    pub recording: RecordingConfig,

    /// Send loop fallback wait when idle or rate-limited (milliseconds)
    pub idle_wait_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            backpressure: BackpressureConfig::default(),
            rate_limit: RateLimitConfig::default(),
            recording: RecordingConfig::default(),
            idle_wait_ms: 10,
        }
    }
}

impl StreamConfig {
    /// Load configuration from `lablink.toml` (optional) plus environment
    pub fn load() -> Result<Self> {
        Self::load_from("lablink")
    }

    /// Load configuration from a named file (optional) plus environment
    pub fn load_from(name: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::with_name(name).required(false))
            .add_source(
                Environment::with_prefix("LABLINK")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| {
                StreamError::ConfigFailed(format!("failed to read configuration: {}", e))
            })?;

        settings.try_deserialize().map_err(|e| {
            StreamError::ConfigFailed(format!("invalid configuration: {}", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::recorder::RecordingFormat;

    #[test]
    fn test_defaults() {
        let config = StreamConfig::default();

        assert!(config.backpressure.enabled);
        assert_eq!(config.backpressure.max_queue_size, 1000);
        assert!(config.rate_limit.enabled);
        assert_eq!(config.recording.format, RecordingFormat::Jsonl);
        assert_eq!(config.idle_wait_ms, 10);
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = StreamConfig::load_from("definitely_missing_config").unwrap();
        assert_eq!(config.backpressure.max_queue_size, 1000);
    }

    #[test]
    fn test_roundtrips_through_serde() {
        let config = StreamConfig::default();
        let text = serde_json::to_string(&config).unwrap();
        let back: StreamConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back.backpressure.max_queue_size, config.backpressure.max_queue_size);
        assert_eq!(back.recording.format, config.recording.format);
    }
}
