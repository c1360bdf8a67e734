//! What a satellite does with an accepted task
//!
//! Task execution itself is opaque to the protocol. The client calls an
//! [`ExecutionHook`] once the [`ResourceLedger`](crate::ledger::ResourceLedger)
//! has accepted a task; the default hook only logs it.

use tracing::info;
use uplink_common::error::Result;
use uplink_proto::Task;

/// Executes accepted tasks
pub trait ExecutionHook: Send {
    /// Run `task`. An error is logged by the caller; the task stays accepted.
    fn execute(&mut self, task: &Task) -> Result<()>;
}

/// Logs each task and does nothing else
#[derive(Debug, Default, Clone)]
pub struct LoggingHook {
    label: String,
}

impl LoggingHook {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl ExecutionHook for LoggingHook {
    fn execute(&mut self, task: &Task) -> Result<()> {
        info!(
            "{}: executing task '{}' with payoff '{}'",
            self.label,
            task.name(),
            task.payoff()
        );
        Ok(())
    }
}

impl<F> ExecutionHook for F
where
    F: FnMut(&Task) -> Result<()> + Send,
{
    fn execute(&mut self, task: &Task) -> Result<()> {
        self(task)
    }
}
