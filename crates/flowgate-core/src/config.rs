//! flowgate.toml configuration parser.
//!
//! Every field has a default so an empty file (or no file at all) yields a
//! working single-node setup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FlowgateConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub events: EventsConfig,
    pub picker: PickerConfig,
    pub jobs: JobsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// Upper bound for every HTTP-triggered operation.
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8480,
            request_timeout_ms: 5_000,
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/flowgate"),
        }
    }
}

impl StorageConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("flowgate.redb")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EventsConfig {
    /// Capacity of every subscriber queue.
    pub queue_capacity: usize,
    /// Events older than this are removed by the retention job.
    pub retention_days: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            retention_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PickerConfig {
    pub correlation_ttl_secs: u64,
}

impl Default for PickerConfig {
    fn default() -> Self {
        Self {
            correlation_ttl_secs: 24 * 60 * 60,
        }
    }
}

impl PickerConfig {
    pub fn correlation_ttl(&self) -> Duration {
        Duration::from_secs(self.correlation_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JobsConfig {
    /// Owner name used for advisory job locks. Must differ between instances.
    pub instance_id: String,
    pub correlation_cleanup_secs: u64,
    pub event_retention_secs: u64,
    pub rollout_tick_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            instance_id: "flowgate-0".to_string(),
            correlation_cleanup_secs: 60 * 60,
            event_retention_secs: 24 * 60 * 60,
            rollout_tick_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            filter: "info,flowgated=debug,flowgate=debug".to_string(),
        }
    }
}

impl FlowgateConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FlowgateConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall or spin the daemon.
    pub fn validate(&self) -> anyhow::Result<()> {
        let positive = [
            ("server.request_timeout_ms", self.server.request_timeout_ms),
            ("events.queue_capacity", self.events.queue_capacity as u64),
            ("jobs.correlation_cleanup_secs", self.jobs.correlation_cleanup_secs),
            ("jobs.event_retention_secs", self.jobs.event_retention_secs),
            ("jobs.rollout_tick_secs", self.jobs.rollout_tick_secs),
        ];
        for (key, value) in positive {
            if value == 0 {
                anyhow::bail!("{key} must be positive");
            }
        }
        if self.jobs.instance_id.trim().is_empty() {
            anyhow::bail!("jobs.instance_id must not be empty");
        }
        Ok(())
    }

    /// Load `path` if given, otherwise fall back to defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
