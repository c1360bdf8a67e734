//! Metrics collection for Uplink
//!
//! This module provides Prometheus metrics for the ground station and
//! satellites. Counters are updated inline by the code paths they describe;
//! [`MetricsRegistry::gather`] renders the text exposition format.

use lazy_static::lazy_static;
use prometheus::{Histogram, IntCounter, IntGauge, Registry};
use std::sync::Arc;

/// Metrics registry for Uplink
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub coordinator: CoordinatorMetrics,
    pub worker: WorkerMetrics,
}

/// Coordinator-specific metrics
#[derive(Debug, Clone)]
pub struct CoordinatorMetrics {
    /// Open worker sessions
    pub sessions_active: IntGauge,

    /// Workers that completed registration and are still connected
    pub workers_registered: IntGauge,

    /// Accepted registrations
    pub registrations_total: IntCounter,

    /// Malformed or unexpected messages received
    pub protocol_errors_total: IntCounter,

    /// Tasks waiting for assignment
    pub tasks_pending: IntGauge,

    /// Tasks assigned to a worker
    pub tasks_assigned_total: IntCounter,

    /// Per-pass allocation misses
    pub tasks_unassigned_total: IntCounter,

    /// Failed task notifications
    pub notify_failures_total: IntCounter,

    /// Payoff of all assigned tasks
    pub payoff_total: IntCounter,

    /// Dispatch pass duration
    pub dispatch_duration: Histogram,
}

/// Worker-specific metrics
#[derive(Debug, Clone)]
pub struct WorkerMetrics {
    /// Task assignments received
    pub tasks_received_total: IntCounter,

    /// Tasks executed
    pub tasks_executed_total: IntCounter,

    /// Tasks rejected by the local resource ledger or the hook
    pub tasks_rejected_total: IntCounter,

    /// Resources still available locally
    pub resources_available: IntGauge,
}

lazy_static! {
    /// Global metrics registry instance
    pub static ref METRICS: MetricsRegistry = MetricsRegistry::new();
}

fn int_counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("valid counter definition");
    registry
        .register(Box::new(counter.clone()))
        .expect("counter registered once");
    counter
}

fn int_gauge(registry: &Registry, name: &str, help: &str) -> IntGauge {
    let gauge = IntGauge::new(name, help).expect("valid gauge definition");
    registry
        .register(Box::new(gauge.clone()))
        .expect("gauge registered once");
    gauge
}

impl MetricsRegistry {
    /// Create a new metrics registry
    pub fn new() -> Self {
        let registry = Arc::new(Registry::new());

        // Coordinator metrics
        let dispatch_duration = Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "coordinator_dispatch_duration_seconds",
                "Duration of one dispatch pass in seconds",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        )
        .expect("valid histogram definition");
        registry
            .register(Box::new(dispatch_duration.clone()))
            .expect("histogram registered once");

        let coordinator = CoordinatorMetrics {
            sessions_active: int_gauge(
                &registry,
                "coordinator_sessions_active",
                "Current number of open worker sessions",
            ),
            workers_registered: int_gauge(
                &registry,
                "coordinator_workers_registered",
                "Current number of registered workers",
            ),
            registrations_total: int_counter(
                &registry,
                "coordinator_registrations_total",
                "Total number of accepted resource registrations",
            ),
            protocol_errors_total: int_counter(
                &registry,
                "coordinator_protocol_errors_total",
                "Total number of malformed or unexpected messages",
            ),
            tasks_pending: int_gauge(
                &registry,
                "coordinator_tasks_pending",
                "Current number of pending tasks",
            ),
            tasks_assigned_total: int_counter(
                &registry,
                "coordinator_tasks_assigned_total",
                "Total number of tasks assigned to workers",
            ),
            tasks_unassigned_total: int_counter(
                &registry,
                "coordinator_tasks_unassigned_total",
                "Total number of tasks left pending by a dispatch pass",
            ),
            notify_failures_total: int_counter(
                &registry,
                "coordinator_notify_failures_total",
                "Total number of failed task notifications",
            ),
            payoff_total: int_counter(
                &registry,
                "coordinator_payoff_total",
                "Total payoff of assigned tasks",
            ),
            dispatch_duration,
        };

        // Worker metrics
        let worker = WorkerMetrics {
            tasks_received_total: int_counter(
                &registry,
                "worker_tasks_received_total",
                "Total number of task assignments received",
            ),
            tasks_executed_total: int_counter(
                &registry,
                "worker_tasks_executed_total",
                "Total number of tasks executed",
            ),
            tasks_rejected_total: int_counter(
                &registry,
                "worker_tasks_rejected_total",
                "Total number of task assignments rejected",
            ),
            resources_available: int_gauge(
                &registry,
                "worker_resources_available",
                "Resources still available on this worker",
            ),
        };

        MetricsRegistry {
            registry,
            coordinator,
            worker,
        }
    }

    /// Gather all metrics as text
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            return format!("# failed to encode metrics: {}\n", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper trait for measuring latency
pub trait LatencyTimer {
    /// Observe the duration of a closure
    fn time<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R;
}

impl LatencyTimer for Histogram {
    fn time<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = std::time::Instant::now();
        let result = f();
        self.observe(start.elapsed().as_secs_f64());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registry() {
        let metrics = MetricsRegistry::new();

        metrics.coordinator.tasks_assigned_total.inc();
        metrics.coordinator.payoff_total.inc_by(30);
        metrics.worker.resources_available.set(4);

        let output = metrics.gather();
        assert!(output.contains("coordinator_tasks_assigned_total 1"));
        assert!(output.contains("coordinator_payoff_total 30"));
        assert!(output.contains("worker_resources_available 4"));
    }

    #[test]
    fn test_latency_timer() {
        let metrics = MetricsRegistry::new();
        let value = metrics.coordinator.dispatch_duration.time(|| 7);
        assert_eq!(value, 7);
        assert_eq!(metrics.coordinator.dispatch_duration.get_sample_count(), 1);
    }
}
