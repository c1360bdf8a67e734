//! Pending tasks awaiting assignment
//!
//! Tasks keep their submission order. A task leaves the queue only when a
//! dispatch pass assigns it; misses stay pending for the next pass.

use tracing::debug;
use uplink_common::error::{Result, UplinkError};
use uplink_proto::Task;

/// Ordered collection of pending tasks
#[derive(Debug)]
pub struct TaskQueue {
    tasks: Vec<Task>,
    max_tasks: usize,
}

impl TaskQueue {
    /// Create an empty queue holding at most `max_tasks`
    pub fn new(max_tasks: usize) -> Self {
        Self {
            tasks: Vec::new(),
            max_tasks,
        }
    }

    /// Append a task
    ///
    /// Names are unique among pending tasks, so a dispatch report can key
    /// its assignments by name.
    pub fn push(&mut self, task: Task) -> Result<()> {
        if self.tasks.len() >= self.max_tasks {
            return Err(UplinkError::queue_full(format!(
                "{} tasks already pending",
                self.tasks.len()
            )));
        }
        if self.contains(task.name()) {
            return Err(UplinkError::DuplicateTask(task.name().to_string()));
        }

        debug!("Task queued: {}", task);
        self.tasks.push(task);
        Ok(())
    }

    /// Remove the pending task called `name`
    pub fn remove(&mut self, name: &str) -> Option<Task> {
        let position = self.tasks.iter().position(|t| t.name() == name)?;
        Some(self.tasks.remove(position))
    }

    /// Remove every task whose name is in `names`, keeping the order of the rest
    pub fn remove_all<'a, I>(&mut self, names: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let names: std::collections::HashSet<&str> = names.into_iter().collect();
        let before = self.tasks.len();
        self.tasks.retain(|t| !names.contains(t.name()));
        before - self.tasks.len()
    }

    /// Whether a task called `name` is pending
    pub fn contains(&self, name: &str) -> bool {
        self.tasks.iter().any(|t| t.name() == name)
    }

    /// Pending tasks in submission order
    pub fn pending(&self) -> &[Task] {
        &self.tasks
    }

    /// Number of pending tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(name: &str) -> Task {
        Task::new(name, 1, ["1"]).unwrap()
    }

    #[test]
    fn test_queue_keeps_submission_order() {
        let mut queue = TaskQueue::new(10);
        queue.push(task("b")).unwrap();
        queue.push(task("a")).unwrap();
        queue.push(task("c")).unwrap();

        let names: Vec<&str> = queue.pending().iter().map(Task::name).collect();
        assert_eq!(names, vec!["b", "a", "c"]);

        assert_eq!(queue.remove("a").unwrap().name(), "a");
        let names: Vec<&str> = queue.pending().iter().map(Task::name).collect();
        assert_eq!(names, vec!["b", "c"]);
        assert!(queue.remove("a").is_none());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut queue = TaskQueue::new(10);
        queue.push(task("t1")).unwrap();
        assert!(matches!(
            queue.push(task("t1")),
            Err(UplinkError::DuplicateTask(_))
        ));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_queue_backpressure() {
        let mut queue = TaskQueue::new(2);
        queue.push(task("t1")).unwrap();
        queue.push(task("t2")).unwrap();
        assert!(matches!(queue.push(task("t3")), Err(UplinkError::QueueFull(_))));
    }

    #[test]
    fn test_remove_all() {
        let mut queue = TaskQueue::new(10);
        for name in ["t1", "t2", "t3", "t4"] {
            queue.push(task(name)).unwrap();
        }
        assert_eq!(queue.remove_all(["t1", "t3", "missing"]), 2);
        let names: Vec<&str> = queue.pending().iter().map(Task::name).collect();
        assert_eq!(names, vec!["t2", "t4"]);
    }
}
