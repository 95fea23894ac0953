//! # Configuration
//!
//! Engine-level settings: store location, default reply timeout and the
//! store polling cadence. Loadable from a YAML file or constructed directly
//! by the hosting process. Per-listener settings (scope, start step, timeout
//! callback) live on `ListenerProps` instead.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Engine configuration. All fields have defaults so a host can start from
/// `EngineConfig::default()` and override what it needs.
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Connection URL for the Redis-backed store (`redis` feature).
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// Default timeout for every awaited reply. `0` means wait forever.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Cadence of the store poll that backs pending replies.
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            request_timeout_ms: default_request_timeout_ms(),
            polling_interval_ms: default_polling_interval_ms(),
        }
    }
}

impl EngineConfig {
    /// Loads the configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read {}", path.as_ref().display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.as_ref().display()))
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms.max(1))
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_polling_interval_ms() -> u64 {
    200
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.request_timeout_ms, 30_000);
        assert_eq!(config.polling_interval_ms, 200);
        assert_eq!(config.redis_url, "redis://localhost:6379");
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let config: EngineConfig = serde_yaml::from_str("request_timeout_ms: 5000").unwrap();
        assert_eq!(config.request_timeout_ms, 5000);
        assert_eq!(config.polling_interval_ms, 200);
    }
}
