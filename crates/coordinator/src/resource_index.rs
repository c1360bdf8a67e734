//! Index of unallocated resource supply
//!
//! Maps each resource id to the workers that still offer it. A worker is
//! listed under a resource iff it declared that resource and no assignment
//! has consumed it since. Consumed units are never returned to the index.

use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;
use uplink_common::WorkerId;

/// Resource id -> workers currently offering it unallocated
#[derive(Debug, Default, Clone)]
pub struct ResourceIndex {
    entries: BTreeMap<String, BTreeSet<WorkerId>>,
}

impl ResourceIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer each of `resources` from `worker`
    pub fn register<'a, I>(&mut self, worker: WorkerId, resources: I)
    where
        I: IntoIterator<Item = &'a String>,
    {
        for resource in resources {
            self.entries
                .entry(resource.clone())
                .or_default()
                .insert(worker);
        }
        trace!("Index after registering {}: {:?}", worker, self.entries);
    }

    /// Drop every offer made by `worker`
    ///
    /// Returns the number of entries the worker was removed from.
    pub fn remove_worker(&mut self, worker: WorkerId) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, workers| {
            if workers.remove(&worker) {
                removed += 1;
            }
            !workers.is_empty()
        });
        removed
    }

    /// Workers that offer every one of `resources`
    ///
    /// A resource nobody offers makes the result empty. An empty
    /// requirement also yields no candidates.
    pub fn candidates<'a, I>(&self, resources: I) -> BTreeSet<WorkerId>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut resources = resources.into_iter();
        let Some(first) = resources.next() else {
            return BTreeSet::new();
        };

        let mut candidates = match self.entries.get(first) {
            Some(workers) => workers.clone(),
            None => return BTreeSet::new(),
        };

        for resource in resources {
            match self.entries.get(resource) {
                Some(workers) => candidates.retain(|w| workers.contains(w)),
                None => return BTreeSet::new(),
            }
            if candidates.is_empty() {
                break;
            }
        }
        candidates
    }

    /// Consume `worker`'s units of `resources`
    pub fn consume<'a, I>(&mut self, worker: WorkerId, resources: I)
    where
        I: IntoIterator<Item = &'a String>,
    {
        for resource in resources {
            if let Some(workers) = self.entries.get_mut(resource) {
                workers.remove(&worker);
                if workers.is_empty() {
                    self.entries.remove(resource);
                }
            }
        }
    }

    /// Workers offering `resource`
    pub fn offers(&self, resource: &str) -> Option<&BTreeSet<WorkerId>> {
        self.entries.get(resource)
    }

    /// Whether `worker` still offers `resource`
    pub fn contains(&self, resource: &str, worker: WorkerId) -> bool {
        self.entries
            .get(resource)
            .is_some_and(|workers| workers.contains(&worker))
    }

    /// Copy of the whole index
    pub fn snapshot(&self) -> BTreeMap<String, BTreeSet<WorkerId>> {
        self.entries.clone()
    }

    /// Number of resource ids with at least one offer
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no resource is offered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
