//! Greedy task allocation
//!
//! One dispatch pass orders the pending tasks by score (payoff per required
//! resource, highest first, submission order on ties) and hands each task to
//! a worker that still offers every resource it needs. The chosen worker's
//! units of those resources are consumed, so no unit backs two assignments.
//!
//! Among several qualifying workers the one with the lowest [`WorkerId`]
//! wins, which is the earliest connected session.

use crate::resource_index::ResourceIndex;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};
use uplink_common::error::{Result, UplinkError};
use uplink_common::WorkerId;
use uplink_proto::Task;

/// Delivers an assigned task to its worker
pub trait Notifier {
    /// Hand `task` to `worker`
    ///
    /// Must not block on I/O. [`UplinkError::WorkerBusy`] means the worker
    /// cannot take more work right now; any other error means it is
    /// unreachable.
    fn notify(&mut self, worker: WorkerId, task: &Task) -> Result<()>;
}

/// One task handed to one worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    /// Assigned task
    pub task: Task,

    /// Worker that received it
    pub worker: WorkerId,
}

/// Outcome of a dispatch pass
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    /// Assignments in the order they were made
    pub assignments: Vec<Assignment>,

    /// Tasks no worker could take, in processing order
    pub unassigned: Vec<Task>,

    /// Workers dropped from the index because a notification failed
    pub unreachable: Vec<WorkerId>,

    /// Resource index after the pass
    pub residual: BTreeMap<String, BTreeSet<WorkerId>>,

    /// Sum of the payoff of every assigned task
    pub total_payoff: u64,
}

impl DispatchReport {
    /// Task name -> assigned worker
    pub fn assignment_map(&self) -> BTreeMap<String, WorkerId> {
        self.assignments
            .iter()
            .map(|a| (a.task.name().to_string(), a.worker))
            .collect()
    }

    /// Worker that received the task called `name`
    pub fn assigned_to(&self, name: &str) -> Option<WorkerId> {
        self.assignments
            .iter()
            .find(|a| a.task.name() == name)
            .map(|a| a.worker)
    }

    /// Whether nothing was assigned
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}

/// Tasks in processing order
///
/// Sorted by descending score; the sort is stable so equal scores keep
/// their submission order.
pub fn order_by_score(tasks: &[Task]) -> Vec<&Task> {
    let mut ordered: Vec<&Task> = tasks.iter().collect();
    ordered.sort_by(|a, b| b.score().total_cmp(&a.score()));
    ordered
}

/// Run one allocation pass over `tasks`
///
/// Task names are expected to be unique within the batch. Allocation misses
/// are per-task soft failures: they are logged, recorded in the report and
/// consume nothing. A worker whose notification fails is removed from the
/// index and the next candidate is tried for the same task. A worker that
/// reports [`UplinkError::WorkerBusy`] keeps its offers but is skipped for
/// the rest of the pass.
pub fn dispatch<N>(tasks: &[Task], index: &mut ResourceIndex, notifier: &mut N) -> DispatchReport
where
    N: Notifier + ?Sized,
{
    let mut report = DispatchReport::default();
    let mut busy = BTreeSet::new();

    for task in order_by_score(tasks) {
        let mut candidates = index.candidates(task.resources());
        candidates.retain(|worker| !busy.contains(worker));
        debug!(
            "Task {} (score {:.3}) has {} candidate(s)",
            task.name(),
            task.score(),
            candidates.len()
        );

        let mut assigned = None;
        while let Some(worker) = candidates.pop_first() {
            match notifier.notify(worker, task) {
                Ok(()) => {
                    assigned = Some(worker);
                    break;
                }
                Err(UplinkError::WorkerBusy(_)) => {
                    debug!("{} cannot take more tasks this pass", worker);
                    busy.insert(worker);
                }
                Err(e) => {
                    warn!("Failed to notify {} of task {}: {}", worker, task.name(), e);
                    index.remove_worker(worker);
                    report.unreachable.push(worker);
                }
            }
        }

        match assigned {
            Some(worker) => {
                index.consume(worker, task.resources());
                report.total_payoff = report.total_payoff.saturating_add(task.payoff());
                info!("Task {} assigned to {}", task.name(), worker);
                report.assignments.push(Assignment {
                    task: task.clone(),
                    worker,
                });
            }
            None => {
                warn!("There's no available worker to process task {}", task.name());
                report.unassigned.push(task.clone());
            }
        }
    }

    report.residual = index.snapshot();
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use uplink_common::UplinkError;

    /// Records every notification; fails for the listed workers
    #[derive(Default)]
    struct RecordingNotifier {
        sent: Vec<(WorkerId, String)>,
        unreachable: BTreeSet<WorkerId>,
        busy: BTreeSet<WorkerId>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&mut self, worker: WorkerId, task: &Task) -> Result<()> {
            if self.unreachable.contains(&worker) {
                return Err(UplinkError::connection("outbox closed"));
            }
            if self.busy.contains(&worker) {
                return Err(UplinkError::WorkerBusy(worker));
            }
            self.sent.push((worker, task.name().to_string()));
            Ok(())
        }
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn task(name: &str, payoff: u64, resources: &[&str]) -> Task {
        Task::new(name, payoff, resources.iter().copied()).unwrap()
    }

    fn two_worker_index() -> ResourceIndex {
        let mut index = ResourceIndex::new();
        index.register(WorkerId(1), &ids(&["1", "2", "3", "5"]));
        index.register(WorkerId(2), &ids(&["2", "3", "4", "9"]));
        index
    }

    #[test]
    fn test_reference_scenario() {
        let mut index = two_worker_index();
        let mut notifier = RecordingNotifier::default();
        let tasks = vec![
            task("t1", 10, &["1", "2", "3"]),
            task("t2", 20, &["2", "3", "4"]),
            task("t3", 20, &["3", "4", "5"]),
        ];

        let report = dispatch(&tasks, &mut index, &mut notifier);

        assert_eq!(report.assigned_to("t1"), Some(WorkerId(1)));
        assert_eq!(report.assigned_to("t2"), Some(WorkerId(2)));
        assert_eq!(report.assigned_to("t3"), None);
        assert_eq!(report.total_payoff, 30);
        assert_eq!(
            report.assignment_map(),
            BTreeMap::from([
                ("t1".to_string(), WorkerId(1)),
                ("t2".to_string(), WorkerId(2)),
            ])
        );
        assert_eq!(report.unassigned.len(), 1);
        assert_eq!(report.unassigned[0].name(), "t3");

        // Order of processing: t2 (6.67), t3 (6.67, miss), t1 (3.33)
        assert_eq!(
            notifier.sent,
            vec![(WorkerId(2), "t2".to_string()), (WorkerId(1), "t1".to_string())]
        );

        // Only the unconsumed units remain
        let residual: Vec<(String, Vec<WorkerId>)> = report
            .residual
            .iter()
            .map(|(r, w)| (r.clone(), w.iter().copied().collect()))
            .collect();
        assert_eq!(
            residual,
            vec![
                ("5".to_string(), vec![WorkerId(1)]),
                ("9".to_string(), vec![WorkerId(2)]),
            ]
        );
    }

    #[test]
    fn test_consumption_invariant() {
        let mut index = two_worker_index();
        let mut notifier = RecordingNotifier::default();
        let tasks = vec![task("t1", 10, &["2", "3"])];

        let report = dispatch(&tasks, &mut index, &mut notifier);
        let worker = report.assigned_to("t1").unwrap();

        for resource in tasks[0].resources() {
            assert!(!index.contains(resource, worker));
        }
    }

    #[test]
    fn test_higher_score_wins_contested_worker() {
        let mut index = ResourceIndex::new();
        index.register(WorkerId(7), &ids(&["a", "b"]));
        let mut notifier = RecordingNotifier::default();
        let tasks = vec![task("low", 5, &["a", "b"]), task("high", 50, &["a", "b"])];

        let report = dispatch(&tasks, &mut index, &mut notifier);

        assert_eq!(report.assigned_to("high"), Some(WorkerId(7)));
        assert_eq!(report.assigned_to("low"), None);
        assert_eq!(report.total_payoff, 50);
    }

    #[test]
    fn test_no_double_spend_within_pass() {
        let mut index = ResourceIndex::new();
        index.register(WorkerId(1), &ids(&["x"]));
        let mut notifier = RecordingNotifier::default();
        let tasks = vec![task("a", 1, &["x"]), task("b", 1, &["x"]), task("c", 1, &["x"])];

        let report = dispatch(&tasks, &mut index, &mut notifier);

        assert_eq!(report.assignments.len(), 1);
        assert_eq!(report.assigned_to("a"), Some(WorkerId(1)));
        assert_eq!(report.unassigned.len(), 2);
        assert!(index.is_empty());
    }

    #[test]
    fn test_tie_break_prefers_lowest_worker_id() {
        let mut index = ResourceIndex::new();
        index.register(WorkerId(9), &ids(&["r"]));
        index.register(WorkerId(3), &ids(&["r"]));
        index.register(WorkerId(5), &ids(&["r"]));
        let mut notifier = RecordingNotifier::default();

        let report = dispatch(&[task("t", 1, &["r"])], &mut index, &mut notifier);
        assert_eq!(report.assigned_to("t"), Some(WorkerId(3)));
    }

    #[test]
    fn test_equal_scores_keep_submission_order() {
        let tasks = vec![
            task("first", 10, &["1", "2"]),
            task("second", 5, &["1"]),
            task("third", 30, &["1", "2", "3"]),
        ];
        let names: Vec<&str> = order_by_score(&tasks).into_iter().map(Task::name).collect();
        assert_eq!(names, vec!["third", "first", "second"]);
    }

    #[test]
    fn test_miss_consumes_nothing() {
        let mut index = two_worker_index();
        let before = index.snapshot();
        let mut notifier = RecordingNotifier::default();
        let tasks = vec![task("t1", 10, &["1", "4"]), task("t2", 10, &["42"])];

        let report = dispatch(&tasks, &mut index, &mut notifier);

        assert!(report.is_empty());
        assert_eq!(report.unassigned.len(), 2);
        assert_eq!(report.total_payoff, 0);
        assert_eq!(index.snapshot(), before);
        assert!(notifier.sent.is_empty());
    }

    #[test]
    fn test_unreachable_worker_falls_back_to_next_candidate() {
        let mut index = ResourceIndex::new();
        index.register(WorkerId(1), &ids(&["r", "s"]));
        index.register(WorkerId(2), &ids(&["r"]));
        let mut notifier = RecordingNotifier {
            unreachable: [WorkerId(1)].into_iter().collect(),
            ..Default::default()
        };

        let report = dispatch(&[task("t", 4, &["r"])], &mut index, &mut notifier);

        assert_eq!(report.assigned_to("t"), Some(WorkerId(2)));
        assert_eq!(report.unreachable, vec![WorkerId(1)]);
        assert!(index.offers("s").is_none());
        assert!(index.is_empty());
    }

    #[test]
    fn test_busy_worker_keeps_offers() {
        let mut index = ResourceIndex::new();
        index.register(WorkerId(1), &ids(&["r", "s"]));
        index.register(WorkerId(2), &ids(&["r"]));
        let mut notifier = RecordingNotifier {
            busy: [WorkerId(1)].into_iter().collect(),
            ..Default::default()
        };
        let tasks = vec![task("t", 4, &["r"]), task("u", 1, &["s"])];

        let report = dispatch(&tasks, &mut index, &mut notifier);

        assert_eq!(report.assigned_to("t"), Some(WorkerId(2)));
        assert_eq!(report.assigned_to("u"), None);
        assert!(report.unreachable.is_empty());
        assert!(index.contains("r", WorkerId(1)));
        assert!(index.contains("s", WorkerId(1)));
    }

    #[test]
    fn test_total_payoff_saturates() {
        let mut index = ResourceIndex::new();
        index.register(WorkerId(1), &ids(&["a", "b"]));
        let mut notifier = RecordingNotifier::default();
        let tasks = vec![
            Task::parse("big1", "18446744073709551615", "a").unwrap(),
            Task::parse("big2", "18446744073709551615", "b").unwrap(),
        ];

        let report = dispatch(&tasks, &mut index, &mut notifier);

        assert_eq!(report.assignments.len(), 2);
        assert_eq!(report.total_payoff, u64::MAX);
    }
}
