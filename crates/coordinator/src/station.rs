//! Shared ground station state
//!
//! The worker map, the resource index and the task queue live behind one
//! mutex. Every registration, disconnect, task submission and whole dispatch
//! pass holds that lock for its full read-modify-write, so a registration is
//! either entirely visible to a pass or not at all, and two passes never
//! interleave their consumption decisions.
//!
//! Nothing inside the lock awaits: task notifications are queued on each
//! session's bounded outbox with `try_send` and written by the session.

use crate::dispatch::{self, DispatchReport, Notifier};
use crate::resource_index::ResourceIndex;
use crate::task_queue::TaskQueue;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};
use uplink_common::config::CoordinatorConfig;
use uplink_common::error::{Result, UplinkError};
use uplink_common::metrics::LatencyTimer;
use uplink_common::{WorkerId, METRICS};
use uplink_proto::{Message, ProtocolError, Task};

/// Lifecycle of a worker session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, no resources declared yet
    Connected,

    /// Resources declared and offered in the index
    Registered,

    /// Session over
    Disconnected,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Connected => write!(f, "connected"),
            SessionState::Registered => write!(f, "registered"),
            SessionState::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Handles a session keeps for talking to the station
#[derive(Debug, Clone)]
pub struct SessionLink {
    /// Outbox drained by the session writer
    pub outbox: mpsc::Sender<Message>,

    /// Signalled when the station gives up on the session
    pub close: Arc<Notify>,
}

impl SessionLink {
    /// Create a link and the receiving end of its outbox
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (outbox, rx) = mpsc::channel(capacity);
        (
            Self {
                outbox,
                close: Arc::new(Notify::new()),
            },
            rx,
        )
    }
}

/// Worker entry in the station's worker map
#[derive(Debug)]
struct WorkerEntry {
    address: SocketAddr,
    state: SessionState,
    declared_resources: BTreeSet<String>,
    assigned_tasks: Vec<Task>,
    link: SessionLink,
    connected_at: Instant,
}

/// Read-only view of a connected worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSummary {
    /// Worker id
    pub id: WorkerId,

    /// Peer address
    pub address: SocketAddr,

    /// Session state
    pub state: SessionState,

    /// Resources declared at registration
    pub declared_resources: BTreeSet<String>,

    /// Tasks assigned while connected, oldest first
    pub assigned_tasks: Vec<Task>,
}

impl WorkerSummary {
    fn from_entry(id: WorkerId, entry: &WorkerEntry) -> Self {
        Self {
            id,
            address: entry.address,
            state: entry.state,
            declared_resources: entry.declared_resources.clone(),
            assigned_tasks: entry.assigned_tasks.clone(),
        }
    }
}

#[derive(Debug)]
struct StationState {
    workers: BTreeMap<WorkerId, WorkerEntry>,
    index: ResourceIndex,
    queue: TaskQueue,
    next_worker_id: u64,
}

/// Sends assignments through the sessions' outboxes
struct OutboxNotifier<'a> {
    workers: &'a BTreeMap<WorkerId, WorkerEntry>,
}

impl Notifier for OutboxNotifier<'_> {
    fn notify(&mut self, worker: WorkerId, task: &Task) -> Result<()> {
        let entry = self
            .workers
            .get(&worker)
            .ok_or(UplinkError::UnknownWorker(worker))?;

        entry
            .link
            .outbox
            .try_send(Message::Assign(task.clone()))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => UplinkError::WorkerBusy(worker),
                mpsc::error::TrySendError::Closed(_) => {
                    UplinkError::connection(format!("session of {} is closed", worker))
                }
            })
    }
}

/// The coordinator: worker map, resource index and task queue
pub struct GroundStation {
    state: Mutex<StationState>,
    config: CoordinatorConfig,
}

impl GroundStation {
    /// Create a station and enqueue the configured seed tasks
    pub fn new(config: CoordinatorConfig) -> Result<Self> {
        let mut queue = TaskQueue::new(config.max_pending_tasks);
        for task in &config.tasks {
            queue.push(task.clone())?;
        }
        METRICS.coordinator.tasks_pending.set(queue.len() as i64);

        Ok(Self {
            state: Mutex::new(StationState {
                workers: BTreeMap::new(),
                index: ResourceIndex::new(),
                queue,
                next_worker_id: 1,
            }),
            config,
        })
    }

    /// Station configuration
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Add a freshly connected worker with no resources
    pub fn connect(&self, address: SocketAddr, link: SessionLink) -> WorkerId {
        let mut state = self.state.lock();
        let id = WorkerId(state.next_worker_id);
        state.next_worker_id += 1;

        state.workers.insert(
            id,
            WorkerEntry {
                address,
                state: SessionState::Connected,
                declared_resources: BTreeSet::new(),
                assigned_tasks: Vec::new(),
                link,
                connected_at: Instant::now(),
            },
        );
        METRICS.coordinator.sessions_active.inc();

        info!("New worker {} from {}", id, address);
        debug!("Connected workers: {}", state.workers.len());
        id
    }

    /// Record the resources a worker declares and offer them in the index
    ///
    /// Registering again replaces the previous declaration and clears the
    /// worker's assignment list.
    pub fn register(&self, id: WorkerId, resources: Vec<String>) -> Result<()> {
        if resources.is_empty() {
            return Err(ProtocolError::EmptyResources.into());
        }

        let mut guard = self.state.lock();
        let StationState { workers, index, .. } = &mut *guard;
        let entry = workers.get_mut(&id).ok_or(UplinkError::UnknownWorker(id))?;

        match entry.state {
            SessionState::Registered => {
                let dropped = index.remove_worker(id);
                info!("{} re-registering, dropped {} stale offer(s)", id, dropped);
            }
            SessionState::Connected => METRICS.coordinator.workers_registered.inc(),
            SessionState::Disconnected => return Err(UplinkError::UnknownWorker(id)),
        }

        entry.declared_resources = resources.into_iter().collect();
        entry.assigned_tasks.clear();
        entry.state = SessionState::Registered;
        index.register(id, &entry.declared_resources);
        METRICS.coordinator.registrations_total.inc();

        info!(
            "{} registered resources {:?}",
            id, entry.declared_resources
        );
        Ok(())
    }

    /// Remove a worker from the worker map and the resource index
    ///
    /// Returns false if the worker was already gone.
    pub fn disconnect(&self, id: WorkerId) -> bool {
        let mut guard = self.state.lock();
        let StationState { workers, index, .. } = &mut *guard;

        let Some(mut entry) = workers.remove(&id) else {
            return false;
        };
        if entry.state == SessionState::Registered {
            METRICS.coordinator.workers_registered.dec();
        }
        entry.state = SessionState::Disconnected;
        let dropped = index.remove_worker(id);
        METRICS.coordinator.sessions_active.dec();

        info!(
            "Disconnected {} ({}) after {:?}, {} task(s) assigned, {} offer(s) withdrawn",
            id,
            entry.address,
            entry.connected_at.elapsed(),
            entry.assigned_tasks.len(),
            dropped
        );
        debug!("Connected workers: {}", workers.len());
        true
    }

    /// Append a task to the pending queue
    pub fn submit_task(&self, task: Task) -> Result<()> {
        let mut state = self.state.lock();
        state.queue.push(task)?;
        METRICS.coordinator.tasks_pending.set(state.queue.len() as i64);
        Ok(())
    }

    /// Pending tasks in submission order
    pub fn pending_tasks(&self) -> Vec<Task> {
        self.state.lock().queue.pending().to_vec()
    }

    /// Connected workers ordered by id
    pub fn workers(&self) -> Vec<WorkerSummary> {
        let state = self.state.lock();
        state
            .workers
            .iter()
            .map(|(id, entry)| WorkerSummary::from_entry(*id, entry))
            .collect()
    }

    /// One connected worker
    pub fn worker(&self, id: WorkerId) -> Option<WorkerSummary> {
        let state = self.state.lock();
        state
            .workers
            .get(&id)
            .map(|entry| WorkerSummary::from_entry(id, entry))
    }

    /// Copy of the resource index
    pub fn resource_snapshot(&self) -> BTreeMap<String, BTreeSet<WorkerId>> {
        self.state.lock().index.snapshot()
    }

    /// Run one dispatch pass over every pending task
    ///
    /// Assigned tasks leave the queue and are appended to their worker's
    /// assignment list; misses stay pending. Workers whose outbox is closed
    /// are dropped from the station and their session is told to close. A
    /// full outbox only skips that worker for the rest of the pass.
    pub fn dispatch(&self) -> DispatchReport {
        METRICS.coordinator.dispatch_duration.time(|| {
            let mut guard = self.state.lock();
            let StationState {
                workers,
                index,
                queue,
                ..
            } = &mut *guard;

            let report = {
                let mut notifier = OutboxNotifier { workers: &*workers };
                dispatch::dispatch(queue.pending(), index, &mut notifier)
            };

            for assignment in &report.assignments {
                if let Some(entry) = workers.get_mut(&assignment.worker) {
                    entry.assigned_tasks.push(assignment.task.clone());
                }
            }
            queue.remove_all(report.assignments.iter().map(|a| a.task.name()));

            for id in &report.unreachable {
                if let Some(entry) = workers.remove(id) {
                    warn!("Dropping unreachable {} ({})", id, entry.address);
                    if entry.state == SessionState::Registered {
                        METRICS.coordinator.workers_registered.dec();
                    }
                    METRICS.coordinator.sessions_active.dec();
                    entry.link.close.notify_one();
                }
            }

            METRICS
                .coordinator
                .tasks_assigned_total
                .inc_by(report.assignments.len() as u64);
            METRICS
                .coordinator
                .tasks_unassigned_total
                .inc_by(report.unassigned.len() as u64);
            METRICS
                .coordinator
                .notify_failures_total
                .inc_by(report.unreachable.len() as u64);
            METRICS.coordinator.payoff_total.inc_by(report.total_payoff);
            METRICS.coordinator.tasks_pending.set(queue.len() as i64);

            info!(
                "Dispatch pass: {} assigned, {} pending, total payoff {}",
                report.assignments.len(),
                report.unassigned.len(),
                report.total_payoff
            );
            debug!("Resources available: {:?}", report.residual);
            report
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn station() -> GroundStation {
        GroundStation::new(CoordinatorConfig::default()).unwrap()
    }

    fn connect(station: &GroundStation, port: u16) -> (WorkerId, mpsc::Receiver<Message>) {
        let (link, rx) = SessionLink::channel(8);
        (station.connect(addr(port), link), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Message>) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    #[test]
    fn test_registration_populates_index() {
        let station = station();
        let (w1, _rx) = connect(&station, 5001);

        station.register(w1, ids(&["1", "2", "3"])).unwrap();

        let snapshot = station.resource_snapshot();
        assert_eq!(snapshot.len(), 3);
        for resource in ["1", "2", "3"] {
            assert_eq!(snapshot[resource], BTreeSet::from([w1]));
        }
        assert_eq!(station.worker(w1).unwrap().state, SessionState::Registered);
    }

    #[test]
    fn test_register_unknown_worker() {
        let station = station();
        assert!(matches!(
            station.register(WorkerId(99), ids(&["1"])),
            Err(UplinkError::UnknownWorker(WorkerId(99)))
        ));
    }

    #[test]
    fn test_reregistration_replaces_offers() {
        let station = station();
        let (w1, _rx) = connect(&station, 5001);

        station.register(w1, ids(&["1", "2"])).unwrap();
        station.register(w1, ids(&["3"])).unwrap();

        let snapshot = station.resource_snapshot();
        assert_eq!(snapshot.keys().collect::<Vec<_>>(), vec!["3"]);
        assert_eq!(
            station.worker(w1).unwrap().declared_resources,
            BTreeSet::from(["3".to_string()])
        );
    }

    #[test]
    fn test_disconnect_clears_index() {
        let station = station();
        let (w1, _rx1) = connect(&station, 5001);
        let (w2, _rx2) = connect(&station, 5002);
        station.register(w1, ids(&["1", "2"])).unwrap();
        station.register(w2, ids(&["2"])).unwrap();

        assert!(station.disconnect(w1));
        assert!(!station.disconnect(w1));

        let snapshot = station.resource_snapshot();
        assert!(!snapshot.contains_key("1"));
        assert_eq!(snapshot["2"], BTreeSet::from([w2]));
        assert!(station.worker(w1).is_none());
    }

    #[test]
    fn test_dispatch_notifies_and_updates_state() {
        let station = station();
        let (w1, mut rx1) = connect(&station, 5001);
        let (w2, mut rx2) = connect(&station, 5002);
        station.register(w1, ids(&["1", "2", "3", "5"])).unwrap();
        station.register(w2, ids(&["2", "3", "4", "9"])).unwrap();

        let t1 = Task::new("t1", 10, ["1", "2", "3"]).unwrap();
        let t2 = Task::new("t2", 20, ["2", "3", "4"]).unwrap();
        let t3 = Task::new("t3", 20, ["3", "4", "5"]).unwrap();
        for task in [&t1, &t2, &t3] {
            station.submit_task(task.clone()).unwrap();
        }

        let report = station.dispatch();
        assert_eq!(report.total_payoff, 30);
        assert_eq!(report.assigned_to("t1"), Some(w1));
        assert_eq!(report.assigned_to("t2"), Some(w2));

        assert_eq!(drain(&mut rx1), vec![Message::Assign(t1.clone())]);
        assert_eq!(drain(&mut rx2), vec![Message::Assign(t2.clone())]);
        assert_eq!(station.worker(w1).unwrap().assigned_tasks, vec![t1]);
        assert_eq!(station.worker(w2).unwrap().assigned_tasks, vec![t2]);

        // t3 stays pending for the next pass
        assert_eq!(station.pending_tasks(), vec![t3]);
    }

    #[test]
    fn test_dispatch_with_no_match_leaves_queue_unchanged() {
        let station = station();
        let (w1, mut rx) = connect(&station, 5001);
        station.register(w1, ids(&["1"])).unwrap();
        station
            .submit_task(Task::new("t1", 10, ["2"]).unwrap())
            .unwrap();
        station
            .submit_task(Task::new("t2", 5, ["1", "3"]).unwrap())
            .unwrap();
        let before = station.pending_tasks();

        let report = station.dispatch();

        assert!(report.is_empty());
        assert_eq!(station.pending_tasks(), before);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_unregistered_workers_are_not_candidates() {
        let station = station();
        let (_w1, mut rx) = connect(&station, 5001);
        station
            .submit_task(Task::new("t1", 10, ["1"]).unwrap())
            .unwrap();

        let report = station.dispatch();
        assert!(report.is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_closed_outbox_drops_worker() {
        let station = station();
        let (w1, rx1) = connect(&station, 5001);
        let (w2, mut rx2) = connect(&station, 5002);
        station.register(w1, ids(&["1"])).unwrap();
        station.register(w2, ids(&["1"])).unwrap();
        drop(rx1);

        station
            .submit_task(Task::new("t1", 10, ["1"]).unwrap())
            .unwrap();
        let report = station.dispatch();

        assert_eq!(report.assigned_to("t1"), Some(w2));
        assert_eq!(report.unreachable, vec![w1]);
        assert!(station.worker(w1).is_none());
        assert_eq!(drain(&mut rx2).len(), 1);
    }

    #[test]
    fn test_full_outbox_keeps_worker() {
        let station = station();
        let (link, mut rx) = SessionLink::channel(4);
        let w1 = station.connect(addr(5001), link);
        let resources: Vec<String> = (0..6).map(|i| format!("r{}", i)).collect();
        station.register(w1, resources.clone()).unwrap();
        for (i, resource) in resources.iter().enumerate() {
            station
                .submit_task(Task::new(format!("t{}", i), 1, [resource.as_str()]).unwrap())
                .unwrap();
        }

        let report = station.dispatch();
        assert_eq!(report.assignments.len(), 4);
        assert_eq!(report.unassigned.len(), 2);
        assert!(report.unreachable.is_empty());
        assert_eq!(station.worker(w1).unwrap().assigned_tasks.len(), 4);
        assert_eq!(station.pending_tasks().len(), 2);
        assert_eq!(station.resource_snapshot().len(), 2);

        // Once the session drains its outbox the rest goes out
        assert_eq!(drain(&mut rx).len(), 4);
        let report = station.dispatch();
        assert_eq!(report.assignments.len(), 2);
        assert!(station.pending_tasks().is_empty());
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[test]
    fn test_seed_tasks_and_duplicates() {
        let config = CoordinatorConfig {
            tasks: vec![Task::new("seed", 1, ["1"]).unwrap()],
            ..Default::default()
        };
        let station = GroundStation::new(config).unwrap();
        assert_eq!(station.pending_tasks().len(), 1);

        assert!(matches!(
            station.submit_task(Task::new("seed", 2, ["2"]).unwrap()),
            Err(UplinkError::DuplicateTask(_))
        ));
    }
}
