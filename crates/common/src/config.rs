//! Configuration structures for Uplink
//!
//! This module defines all configuration types used by the coordinator and
//! workers. Values are layered: built-in defaults, then an optional YAML
//! file, then `UPLINK_`-prefixed environment variables (nested keys use a
//! double underscore, e.g. `UPLINK_COORDINATOR__NOTIFY_TIMEOUT_MS`).
//! Binaries apply their command line flags on top.

use crate::error::{Result, UplinkError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uplink_proto::task::validate_resource_id;
use uplink_proto::Task;

/// Default listen/connect host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default listen/connect port
pub const DEFAULT_PORT: u16 = 65265;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "UPLINK";

/// Process role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Ground station
    Coordinator,

    /// Satellite
    Worker,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Coordinator
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Coordinator => write!(f, "coordinator"),
            Mode::Worker => write!(f, "worker"),
        }
    }
}

/// Top-level configuration for Uplink components
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UplinkConfig {
    /// Mode: either "coordinator" or "worker"
    #[serde(default)]
    pub mode: Mode,

    /// Host the coordinator listens on, or the worker connects to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port the coordinator listens on, or the worker connects to
    #[serde(default = "default_port")]
    pub port: u16,

    /// Coordinator-specific configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinator: Option<CoordinatorConfig>,

    /// Worker-specific configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerConfig>,

    /// Observability configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observability: Option<ObservabilityConfig>,
}

/// Coordinator-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Upper bound on a single write to a worker, in milliseconds
    #[serde(default = "default_notify_timeout")]
    pub notify_timeout_ms: u64,

    /// Messages buffered per session before a notify counts as failed
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,

    /// Consecutive malformed messages tolerated before a session is closed
    #[serde(default = "default_max_protocol_errors")]
    pub max_protocol_errors: u32,

    /// Maximum number of pending tasks
    #[serde(default = "default_max_pending_tasks")]
    pub max_pending_tasks: usize,

    /// Size of the per-read buffer
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,

    /// Tasks enqueued at startup
    #[serde(default)]
    pub tasks: Vec<Task>,
}

/// Worker-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Optional human-readable worker name, used in logs
    #[serde(default)]
    pub name: Option<String>,

    /// Resource ids this worker supplies
    #[serde(default)]
    pub resources: Vec<String>,

    /// Upper bound on each handshake reply, in milliseconds
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,

    /// Size of the per-read buffer
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable Prometheus metrics
    #[serde(default = "default_metrics")]
    pub enable_metrics: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            notify_timeout_ms: default_notify_timeout(),
            outbox_capacity: default_outbox_capacity(),
            max_protocol_errors: default_max_protocol_errors(),
            max_pending_tasks: default_max_pending_tasks(),
            read_buffer_size: default_read_buffer_size(),
            tasks: Vec::new(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: None,
            resources: Vec::new(),
            handshake_timeout_ms: default_handshake_timeout(),
            read_buffer_size: default_read_buffer_size(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            enable_metrics: default_metrics(),
        }
    }
}

impl Default for UplinkConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            host: default_host(),
            port: default_port(),
            coordinator: None,
            worker: None,
            observability: None,
        }
    }
}

/// Default value functions
fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_notify_timeout() -> u64 {
    2000
}

fn default_outbox_capacity() -> usize {
    64
}

fn default_max_protocol_errors() -> u32 {
    3
}

fn default_max_pending_tasks() -> usize {
    10_000
}

fn default_read_buffer_size() -> usize {
    uplink_proto::DEFAULT_READ_BUFFER_SIZE
}

fn default_handshake_timeout() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics() -> bool {
    true
}

impl UplinkConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            UplinkError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: UplinkConfig = serde_yaml::from_str(&content).map_err(|e| {
            UplinkError::Config(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load layered configuration
    ///
    /// Reads the optional YAML file, then applies `UPLINK_*` environment
    /// overrides. The result is not validated, so callers can still apply
    /// command line flags before calling [`UplinkConfig::validate`].
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("host", DEFAULT_HOST)?
            .set_default("port", i64::from(DEFAULT_PORT))?;

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: UplinkConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(UplinkError::config("Host must not be empty"));
        }
        if self.port == 0 {
            return Err(UplinkError::config("Port must be non-zero"));
        }

        match self.mode {
            Mode::Coordinator => {
                let coordinator = self.coordinator_config();
                if coordinator.outbox_capacity == 0 {
                    return Err(UplinkError::config("outbox_capacity must be non-zero"));
                }
                if coordinator.read_buffer_size == 0 {
                    return Err(UplinkError::config("read_buffer_size must be non-zero"));
                }
                if coordinator.max_pending_tasks == 0 {
                    return Err(UplinkError::config("max_pending_tasks must be non-zero"));
                }
                if coordinator.tasks.len() > coordinator.max_pending_tasks {
                    return Err(UplinkError::config(format!(
                        "{} seed tasks exceed max_pending_tasks ({})",
                        coordinator.tasks.len(),
                        coordinator.max_pending_tasks
                    )));
                }
            }
            Mode::Worker => {
                let worker = self
                    .worker
                    .as_ref()
                    .ok_or_else(|| UplinkError::config("Worker config required for worker mode"))?;
                if worker.resources.is_empty() {
                    return Err(UplinkError::config("Worker must declare at least one resource"));
                }
                for resource in &worker.resources {
                    validate_resource_id(resource).map_err(|e| {
                        UplinkError::config(format!("Invalid worker resource: {}", e))
                    })?;
                }
                if worker.read_buffer_size == 0 {
                    return Err(UplinkError::config("read_buffer_size must be non-zero"));
                }
            }
        }
        Ok(())
    }

    /// `host:port` address string
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Coordinator section, or its defaults when absent
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        self.coordinator.clone().unwrap_or_default()
    }

    /// Worker section, or its defaults when absent
    pub fn worker_config(&self) -> WorkerConfig {
        self.worker.clone().unwrap_or_default()
    }

    /// Observability section, or its defaults when absent
    pub fn observability_config(&self) -> ObservabilityConfig {
        self.observability.clone().unwrap_or_default()
    }
}

impl CoordinatorConfig {
    /// Get notify timeout as Duration
    pub fn notify_timeout(&self) -> Duration {
        Duration::from_millis(self.notify_timeout_ms)
    }
}

impl WorkerConfig {
    /// Get handshake timeout as Duration
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = UplinkConfig::default();
        assert_eq!(config.mode, Mode::Coordinator);
        assert_eq!(config.address(), "127.0.0.1:65265");
        assert!(config.validate().is_ok());

        let coordinator = config.coordinator_config();
        assert_eq!(coordinator.read_buffer_size, 1024);
        assert_eq!(coordinator.notify_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_config_validation_missing_worker() {
        let config = UplinkConfig {
            mode: Mode::Worker,
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_worker_resources() {
        let mut config = UplinkConfig {
            mode: Mode::Worker,
            worker: Some(WorkerConfig {
                resources: vec!["1".to_string(), "2".to_string()],
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        config.worker.as_mut().unwrap().resources = vec!["a,b".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_with_seed_tasks() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
mode: coordinator
host: 0.0.0.0
port: 7000
coordinator:
  notify_timeout_ms: 500
  tasks:
    - name: t1
      payoff: 10
      resources: "1,2,3"
    - name: t2
      payoff: 20
      resources: ["2", "3", "4"]
"#
        )
        .unwrap();

        let config = UplinkConfig::from_file(file.path()).unwrap();
        assert_eq!(config.port, 7000);
        let coordinator = config.coordinator_config();
        assert_eq!(coordinator.notify_timeout_ms, 500);
        assert_eq!(coordinator.outbox_capacity, 64);
        assert_eq!(coordinator.tasks.len(), 2);
        assert_eq!(coordinator.tasks[0].name(), "t1");
    }

    #[test]
    fn test_from_file_rejects_invalid_task() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "coordinator:\n  tasks:\n    - name: t1\n      payoff: 10\n      resources: []\n"
        )
        .unwrap();

        assert!(UplinkConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_load_layered_yaml() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "mode: worker\nworker:\n  name: s1\n  resources: [\"1\", \"2\"]\n"
        )
        .unwrap();

        let config = UplinkConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.mode, Mode::Worker);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.worker_config().resources, vec!["1", "2"]);
        assert!(config.validate().is_ok());
    }
}
