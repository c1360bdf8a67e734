//! Uplink common library
//!
//! This crate contains shared code used by the ground station and its
//! satellites: errors, configuration and metrics.

pub mod config;
pub mod error;
pub mod metrics;

// Re-export commonly used types
pub use config::{CoordinatorConfig, Mode, ObservabilityConfig, UplinkConfig, WorkerConfig};
pub use error::{Result, UplinkError};
pub use metrics::{MetricsRegistry, METRICS};

/// Identity of one worker session on the coordinator
///
/// Ids are handed out in connection order and never reused within a
/// coordinator process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerId(pub u64);

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}
