//! Task value type shared by coordinator and workers
//!
//! A task carries a payoff and the set of resource ids a worker must hold
//! to execute it. Tasks are validated on construction, so a `Task` value
//! always has a usable name and at least one resource.

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Separator between fields of a task assignment
pub const FIELD_SEPARATOR: &str = "::";

/// Characters that cannot appear inside a resource id
const RESERVED_CHARS: [char; 5] = [',', '\'', '"', '[', ']'];

/// A unit of work with a payoff and required resources
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTask")]
pub struct Task {
    name: String,
    payoff: u64,
    resources: BTreeSet<String>,
}

impl Task {
    /// Create a validated task
    pub fn new<I, S>(name: impl Into<String>, payoff: u64, resources: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ProtocolError::InvalidTask("task name is empty".to_string()));
        }
        if name.contains(FIELD_SEPARATOR) {
            return Err(ProtocolError::InvalidTask(format!(
                "task name {:?} contains {:?}",
                name, FIELD_SEPARATOR
            )));
        }

        let mut set = BTreeSet::new();
        for resource in resources {
            let resource = resource.into();
            validate_resource_id(&resource)?;
            set.insert(resource);
        }

        if set.is_empty() {
            return Err(ProtocolError::InvalidTask(format!(
                "task {:?} requires no resources",
                name
            )));
        }

        Ok(Self {
            name,
            payoff,
            resources: set,
        })
    }

    /// Build a task from raw producer input
    ///
    /// `payoff` must be a non-negative integer and `resources` a
    /// comma-separated list of ids.
    pub fn parse(name: &str, payoff: &str, resources: &str) -> Result<Self> {
        let payoff = parse_payoff(payoff)?;
        let resources = parse_resource_csv(resources)?;
        Self::new(name.trim(), payoff, resources)
    }

    /// Task name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Task payoff
    pub fn payoff(&self) -> u64 {
        self.payoff
    }

    /// Required resource ids
    pub fn resources(&self) -> &BTreeSet<String> {
        &self.resources
    }

    /// Greedy priority key: payoff per required resource
    pub fn score(&self) -> f64 {
        // `resources` is never empty, see `Task::new`
        self.payoff as f64 / self.resources.len() as f64
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let resources: Vec<&str> = self.resources.iter().map(String::as_str).collect();
        write!(
            f,
            "Task(name={}, payoff={}, resources={})",
            self.name,
            self.payoff,
            resources.join(",")
        )
    }
}

/// Check that a resource id is usable on the wire
pub fn validate_resource_id(resource: &str) -> Result<()> {
    if resource.is_empty() {
        return Err(ProtocolError::InvalidTask("empty resource id".to_string()));
    }
    if resource.contains(FIELD_SEPARATOR)
        || resource.chars().any(|c| c.is_whitespace() || RESERVED_CHARS.contains(&c))
    {
        return Err(ProtocolError::InvalidTask(format!(
            "resource id {:?} contains reserved characters",
            resource
        )));
    }
    Ok(())
}

/// Parse a payoff value
pub fn parse_payoff(payoff: &str) -> Result<u64> {
    payoff
        .trim()
        .parse::<u64>()
        .map_err(|_| ProtocolError::InvalidPayoff(payoff.to_string()))
}

/// Parse a comma-separated list of resource ids
///
/// Blank entries are skipped; a list with no ids at all is an error.
pub fn parse_resource_csv(csv: &str) -> Result<Vec<String>> {
    let mut resources = Vec::new();
    for id in csv.split(',').map(str::trim).filter(|id| !id.is_empty()) {
        validate_resource_id(id)?;
        resources.push(id.to_string());
    }

    if resources.is_empty() {
        return Err(ProtocolError::EmptyResources);
    }
    Ok(resources)
}

/// Serde shape accepted for tasks in configuration files
#[derive(Deserialize)]
struct RawTask {
    name: String,
    payoff: u64,
    resources: RawResources,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawResources {
    List(Vec<String>),
    Csv(String),
}

impl TryFrom<RawTask> for Task {
    type Error = ProtocolError;

    fn try_from(raw: RawTask) -> Result<Self> {
        let resources = match raw.resources {
            RawResources::List(list) => list,
            RawResources::Csv(csv) => parse_resource_csv(&csv)?,
        };
        Task::new(raw.name, raw.payoff, resources)
    }
}
