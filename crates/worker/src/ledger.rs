//! Local record of the satellite's resources
//!
//! The coordinator already refuses to hand out a resource twice, but the
//! satellite keeps its own books: a task is accepted only if every resource
//! it needs is still available here, and accepted tasks consume those
//! resources for good.

use std::collections::BTreeSet;
use tracing::debug;
use uplink_common::error::{Result, UplinkError};
use uplink_common::METRICS;
use uplink_proto::Task;

/// Declared, available and consumed resources of one satellite
#[derive(Debug, Clone)]
pub struct ResourceLedger {
    /// Resources in declaration order, without duplicates
    declared: Vec<String>,

    /// Resources not consumed by an accepted task
    available: BTreeSet<String>,

    /// Accepted tasks, oldest first
    executed: Vec<Task>,
}

impl ResourceLedger {
    /// Create a ledger where every declared resource is available
    pub fn new<I, S>(resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut declared = Vec::new();
        let mut available = BTreeSet::new();
        for resource in resources {
            let resource = resource.into();
            if available.insert(resource.clone()) {
                declared.push(resource);
            }
        }

        METRICS.worker.resources_available.set(available.len() as i64);
        Self {
            declared,
            available,
            executed: Vec::new(),
        }
    }

    /// Accept `task` and consume its resources
    ///
    /// Fails without changing the ledger if a task with the same name was
    /// already accepted or any required resource is unavailable.
    pub fn accept(&mut self, task: &Task) -> Result<()> {
        if self.executed.iter().any(|t| t.name() == task.name()) {
            return Err(UplinkError::DuplicateTask(task.name().to_string()));
        }

        let missing: Vec<&str> = task
            .resources()
            .iter()
            .filter(|r| !self.available.contains(*r))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(UplinkError::invalid_task(format!(
                "task {} needs unavailable resource(s) {}",
                task.name(),
                missing.join(",")
            )));
        }

        for resource in task.resources() {
            self.available.remove(resource);
        }
        self.executed.push(task.clone());
        METRICS.worker.resources_available.set(self.available.len() as i64);

        debug!("Available resources: {:?}", self.available);
        Ok(())
    }

    /// Declared resources in declaration order
    pub fn declared(&self) -> &[String] {
        &self.declared
    }

    pub fn available(&self) -> &BTreeSet<String> {
        &self.available
    }

    pub fn is_available(&self, resource: &str) -> bool {
        self.available.contains(resource)
    }

    /// Accepted tasks, oldest first
    pub fn executed(&self) -> &[Task] {
        &self.executed
    }

    /// Sum of the payoff of every accepted task, saturating at `u64::MAX`
    pub fn total_payoff(&self) -> u64 {
        self.executed
            .iter()
            .fold(0u64, |total, task| total.saturating_add(task.payoff()))
    }
}
