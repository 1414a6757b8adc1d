//! Agent configuration

use crate::error::AgentError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Reconnection backoff policy.
///
/// The delay doubles after every failed attempt and is clamped at the
/// configured maximum; a successful connection resets it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first retry, in milliseconds
    pub initial_ms: u64,
    /// Upper bound for the retry delay, in milliseconds
    pub max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 500,
            max_ms: 30_000,
        }
    }
}

impl BackoffConfig {
    /// Delay before the first retry
    pub fn initial(&self) -> Duration {
        Duration::from_millis(self.initial_ms)
    }

    /// Delay to use after another failed attempt
    pub fn next(&self, current: Duration) -> Duration {
        (current * 2).min(Duration::from_millis(self.max_ms))
    }
}

/// Agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Controller host
    pub host: String,
    /// Controller port
    pub port: u16,
    /// Reconnection backoff policy
    pub backoff: BackoffConfig,
    /// Maximum accepted frame payload size in bytes
    pub max_frame_size: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            backoff: BackoffConfig::default(),
            max_frame_size: tether_proto::MAX_FRAME_SIZE,
        }
    }
}

impl AgentConfig {
    /// Controller address in `host:port` form
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Load configuration from a JSON file.
    ///
    /// A missing file yields the defaults; a present but malformed file is
    /// an error.
    pub fn load(path: &Path) -> Result<Self, AgentError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(path)
            .map_err(|e| AgentError::Config(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&data)
            .map_err(|e| AgentError::Config(format!("{}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.server_addr(), "127.0.0.1:8080");
        assert_eq!(config.backoff.initial(), Duration::from_millis(500));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let backoff = BackoffConfig {
            initial_ms: 100,
            max_ms: 350,
        };

        let mut delay = backoff.initial();
        delay = backoff.next(delay);
        assert_eq!(delay, Duration::from_millis(200));
        delay = backoff.next(delay);
        assert_eq!(delay, Duration::from_millis(350));
        delay = backoff.next(delay);
        assert_eq!(delay, Duration::from_millis(350));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AgentConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tether.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, r#"{{"host": "203.0.113.9", "port": 9000}}"#).unwrap();

        let config = AgentConfig::load(&path).unwrap();
        assert_eq!(config.server_addr(), "203.0.113.9:9000");
        assert_eq!(config.backoff.max_ms, 30_000);
    }

    #[test]
    fn test_load_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tether.json");
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(
            AgentConfig::load(&path),
            Err(AgentError::Config(_))
        ));
    }
}
