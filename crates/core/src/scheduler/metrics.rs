//! Prometheus metrics for the task scheduler

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;
use serde::Serialize;

pub(crate) struct SchedulerMetrics {
    registry: Registry,
    pub submitted: Counter,
    pub completed: Counter,
    pub failed: Counter,
    pub cancelled: Counter,
    pub queued: Gauge,
    pub delayed: Gauge,
    pub running: Gauge,
    pub execution_seconds: Histogram,
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("mirai_scheduler");

        let submitted = Counter::default();
        let completed = Counter::default();
        let failed = Counter::default();
        let cancelled = Counter::default();
        let queued = Gauge::default();
        let delayed = Gauge::default();
        let running = Gauge::default();
        // 100µs .. ~3.3s
        let execution_seconds = Histogram::new(exponential_buckets(0.0001, 2.0, 16));

        registry.register("tasks_submitted", "Tasks accepted by the scheduler", submitted.clone());
        registry.register("tasks_completed", "Tasks that finished successfully", completed.clone());
        registry.register("tasks_failed", "Tasks that returned an error or panicked", failed.clone());
        registry.register("tasks_cancelled", "Tasks cancelled before running", cancelled.clone());
        registry.register("queue_depth", "Tasks waiting for a worker", queued.clone());
        registry.register("delayed_tasks", "Tasks waiting for their deadline", delayed.clone());
        registry.register("running_tasks", "Tasks currently executing", running.clone());
        registry.register(
            "task_execution_seconds",
            "Wall time spent executing task bodies",
            execution_seconds.clone(),
        );

        Self {
            registry,
            submitted,
            completed,
            failed,
            cancelled,
            queued,
            delayed,
            running,
            execution_seconds,
        }
    }

    /// Render every metric in the Prometheus text exposition format
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }

    pub fn snapshot(&self, workers: usize, live: usize) -> SchedulerStats {
        SchedulerStats {
            workers,
            submitted: self.submitted.get(),
            completed: self.completed.get(),
            failed: self.failed.get(),
            cancelled: self.cancelled.get(),
            queued: self.queued.get().max(0) as u64,
            delayed: self.delayed.get().max(0) as u64,
            running: self.running.get().max(0) as u64,
            live: live as u64,
        }
    }
}

/// Point-in-time scheduler counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub workers: usize,
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub queued: u64,
    pub delayed: u64,
    pub running: u64,
    /// Tasks that have not yet been retired
    pub live: u64,
}

impl SchedulerStats {
    /// Tasks that reached a terminal state
    pub fn finished(&self) -> u64 {
        self.completed + self.failed + self.cancelled
    }
}
