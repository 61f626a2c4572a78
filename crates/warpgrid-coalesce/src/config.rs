//! Coalescing client configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use warpgrid_fanout::FanoutConfig;

use crate::error::{CoalesceError, CoalesceResult};

/// Configuration for a [`CoalescingClient`](crate::CoalescingClient).
///
/// ```toml
/// wait_timeout_ms = 5000
///
/// [fanout]
/// chunk_size = 4096
/// notify_capacity = 1
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Default deadline for `send`, in milliseconds. `None` waits forever.
    pub wait_timeout_ms: Option<u64>,
    /// Body replication settings.
    pub fanout: FanoutConfig,
}

impl ClientConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CoalesceResult<()> {
        if self.wait_timeout_ms == Some(0) {
            return Err(CoalesceError::Config(
                "wait_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.fanout.chunk_size == 0 {
            return Err(CoalesceError::Config(
                "fanout.chunk_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_uses_defaults() {
        let config = ClientConfig::from_toml_str("").unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.wait_timeout(), None);
        assert_eq!(config.fanout.chunk_size, 1024);
        assert_eq!(config.fanout.notify_capacity, 1);
    }

    #[test]
    fn parses_nested_fanout_table() {
        let config = ClientConfig::from_toml_str(
            r#"
wait_timeout_ms = 2500

[fanout]
chunk_size = 8192
"#,
        )
        .unwrap();
        assert_eq!(config.wait_timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(config.fanout.chunk_size, 8192);
        assert_eq!(config.fanout.notify_capacity, 1);
    }

    #[test]
    fn rejects_zero_timeout() {
        let err = ClientConfig::from_toml_str("wait_timeout_ms = 0").unwrap_err();
        assert!(err.to_string().contains("wait_timeout_ms"));
    }

    #[test]
    fn rejects_zero_chunk_size() {
        let config = ClientConfig {
            fanout: FanoutConfig {
                chunk_size: 0,
                ..FanoutConfig::default()
            },
            ..ClientConfig::default()
        };
        assert!(matches!(config.validate(), Err(CoalesceError::Config(_))));
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(ClientConfig::from_toml_str("wait_timeout_ms = \"soon\"").is_err());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "wait_timeout_ms = 100").unwrap();
        writeln!(file, "[fanout]").unwrap();
        writeln!(file, "notify_capacity = 4").unwrap();

        let config = ClientConfig::from_file(file.path()).unwrap();
        assert_eq!(config.wait_timeout(), Some(Duration::from_millis(100)));
        assert_eq!(config.fanout.notify_capacity, 4);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(ClientConfig::from_file(Path::new("/nonexistent/coalesce.toml")).is_err());
    }
}
