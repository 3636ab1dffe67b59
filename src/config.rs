//! Registry configuration.
//!
//! Every field has a default, so an empty JSON object is a valid
//! configuration. Durations are milliseconds.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::CompatibilityMode;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Compacted topic holding every registry record.
    pub topic_name: String,
    /// Coordination group the writer is elected in.
    pub group_id: String,
    /// Advertised host and port; together they identify this node.
    pub host: String,
    pub port: u16,
    /// Whether this node may become the writer.
    pub master_eligibility: bool,
    /// Compatibility mode until a global one is set.
    pub compatibility: CompatibilityMode,
    pub replication_timeout_ms: u64,
    pub session_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub poll_timeout_ms: u64,
    pub max_records_on_startup: usize,
    pub max_records_after_startup: usize,
    pub reconnect_backoff_ms: u64,
    pub reconnect_backoff_max_ms: u64,
    /// Records between store checkpoints; 0 disables checkpointing.
    pub checkpoint_interval: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            topic_name: "_schemas".to_string(),
            group_id: "schema-registry".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8081,
            master_eligibility: true,
            compatibility: CompatibilityMode::Backward,
            replication_timeout_ms: 10_000,
            session_timeout_ms: 10_000,
            heartbeat_interval_ms: 3_000,
            poll_timeout_ms: 100,
            max_records_on_startup: 1_000,
            max_records_after_startup: 1,
            reconnect_backoff_ms: 100,
            reconnect_backoff_max_ms: 5_000,
            checkpoint_interval: 0,
        }
    }
}

impl RegistryConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Collects every problem instead of stopping at the first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.topic_name.trim().is_empty() {
            errors.push("topic_name must not be empty".to_string());
        }
        if self.group_id.trim().is_empty() {
            errors.push("group_id must not be empty".to_string());
        }
        if self.host.trim().is_empty() {
            errors.push("host must not be empty".to_string());
        }
        for (name, value) in [
            ("replication_timeout_ms", self.replication_timeout_ms),
            ("session_timeout_ms", self.session_timeout_ms),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("poll_timeout_ms", self.poll_timeout_ms),
            ("reconnect_backoff_ms", self.reconnect_backoff_ms),
        ] {
            if value == 0 {
                errors.push(format!("{} must be greater than zero", name));
            }
        }
        if self.max_records_on_startup == 0 || self.max_records_after_startup == 0 {
            errors.push("max_records_* must be greater than zero".to_string());
        }
        if self.heartbeat_interval_ms >= self.session_timeout_ms {
            errors.push(format!(
                "heartbeat_interval_ms ({}) must be below session_timeout_ms ({})",
                self.heartbeat_interval_ms, self.session_timeout_ms
            ));
        }
        if self.reconnect_backoff_max_ms < self.reconnect_backoff_ms {
            errors.push("reconnect_backoff_max_ms must be at least reconnect_backoff_ms".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    /// `host:port`, the identity this node joins the group with.
    pub fn node_url(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn replication_timeout(&self) -> Duration {
        Duration::from_millis(self.replication_timeout_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}
