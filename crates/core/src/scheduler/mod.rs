//! Shared task scheduler for CPU-bound background work
//!
//! Every subsystem and plugin submits work to the same pool of worker threads.
//! The pool is sized for throughput, so submitted work should be:
//!
//! - CPU-bound. Blocking I/O belongs on the async runtime, not here, or it will
//!   starve unrelated tasks.
//! - Coarse-grained. Many tiny tasks should be batched into one before
//!   submission to keep queueing overhead negligible.
//!
//! Execution order between tasks submitted concurrently is unspecified beyond
//! best-effort FIFO per submitting thread.

mod metrics;
mod task;
mod timer;

pub use metrics::SchedulerStats;
pub use task::{TaskError, TaskHandle, TaskId, TaskState};

use crate::config::{SchedulerConfig, ShutdownPolicy};
use crate::plugin::PluginId;
use crossbeam::channel::{self, Receiver, Sender};
use dashmap::DashMap;
use metrics::SchedulerMetrics;
use nohash_hasher::IntSet;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use task::{Cadence, OneShot, Periodic, Runnable, TaskCell, TaskControl};
use timer::Timer;
use tracing::{debug, info, warn};

/// Scheduler submission errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("Scheduler is shutting down")]
    ShuttingDown,
    #[error("Repeat interval must be greater than zero and within the representable time range")]
    InvalidInterval,
    #[error("Delay cannot be represented as a deadline")]
    InvalidDelay,
    #[error("Failed to spawn scheduler thread: {0}")]
    Spawn(String),
}

/// Horizon used for delays that overflow [`Instant`]
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Deadline `delay` from now, clamped to [`FAR_FUTURE`] when it overflows
fn deadline_after(delay: Duration) -> Result<Instant, SchedulerError> {
    let now = Instant::now();
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .ok_or(SchedulerError::InvalidDelay)
}

enum Message {
    Run(Box<dyn Runnable>),
    Stop,
}

/// State shared by the scheduler front-end, its workers and its timer
pub(crate) struct Shared {
    sender: Sender<Message>,
    /// Submissions hold a read guard until their job is queued, so shutdown
    /// cannot slip in between the check and the enqueue
    accepting: RwLock<bool>,
    timer: Timer,
    next_id: AtomicU64,
    live: DashMap<TaskId, Arc<dyn TaskControl>>,
    owned: DashMap<PluginId, IntSet<TaskId>>,
    metrics: SchedulerMetrics,
}

impl Shared {
    /// Push a job onto the worker queue; never blocks
    fn enqueue(&self, job: Box<dyn Runnable>) {
        self.metrics.queued.inc();
        if let Err(channel::SendError(message)) = self.sender.send(Message::Run(job)) {
            self.metrics.queued.dec();
            if let Message::Run(job) = message {
                job.abandon(self);
            }
        }
    }

    /// Run `job` at `deadline`, immediately when already due
    fn schedule_at(&self, deadline: Instant, job: Box<dyn Runnable>) {
        if deadline <= Instant::now() {
            self.enqueue(job);
            return;
        }

        self.metrics.delayed.inc();
        if let Err(job) = self.timer.schedule(deadline, job) {
            self.metrics.delayed.dec();
            job.abandon(self);
        }
    }

    fn track(&self, control: Arc<dyn TaskControl>) {
        let id = control.id();
        if let Some(owner) = control.owner() {
            self.owned.entry(owner.clone()).or_default().insert(id);
        }
        self.live.insert(id, control);
        self.metrics.submitted.inc();
    }

    /// Forget a task that will never run again and count its final state
    fn retire(&self, control: &dyn TaskControl) {
        let id = control.id();
        if self.live.remove(&id).is_none() {
            return;
        }

        if let Some(owner) = control.owner() {
            if let Some(mut ids) = self.owned.get_mut(owner) {
                ids.remove(&id);
            }
            self.owned.remove_if(owner, |_, ids| ids.is_empty());
        }

        match control.state() {
            TaskState::Completed => self.metrics.completed.inc(),
            TaskState::Failed => self.metrics.failed.inc(),
            _ => self.metrics.cancelled.inc(),
        };
    }

    /// Drop a cancelled task's job from the timer and retire it immediately
    ///
    /// A job already sitting in the worker queue is skipped when dequeued.
    pub(crate) fn withdraw(&self, control: &dyn TaskControl) {
        if let Some(job) = self.timer.remove(control.id()) {
            self.metrics.delayed.dec();
            drop(job);
        }
        self.retire(control);
    }
}

struct Threads {
    workers: Vec<JoinHandle<()>>,
    timer: JoinHandle<()>,
}

/// Worker pool with delayed and periodic execution
pub struct TaskScheduler {
    shared: Arc<Shared>,
    receiver: Receiver<Message>,
    threads: Mutex<Option<Threads>>,
    worker_count: usize,
    policy: ShutdownPolicy,
}

impl TaskScheduler {
    /// Start the worker threads and the timer thread
    pub fn new(config: &SchedulerConfig) -> Result<Self, SchedulerError> {
        let worker_count = config.resolved_worker_threads();
        let (sender, receiver) = channel::unbounded();

        let shared = Arc::new(Shared {
            sender,
            accepting: RwLock::new(true),
            timer: Timer::new(),
            next_id: AtomicU64::new(1),
            live: DashMap::new(),
            owned: DashMap::new(),
            metrics: SchedulerMetrics::new(),
        });

        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let worker_shared = Arc::clone(&shared);
            let receiver = receiver.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", config.thread_name, index))
                .spawn(move || worker_loop(index, &worker_shared, &receiver));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    abort_startup(&shared, workers);
                    return Err(SchedulerError::Spawn(e.to_string()));
                }
            }
        }

        let timer_shared = Arc::clone(&shared);
        let timer = match thread::Builder::new()
            .name(format!("{}-timer", config.thread_name))
            .spawn(move || timer_shared.timer.run(&timer_shared))
        {
            Ok(handle) => handle,
            Err(e) => {
                abort_startup(&shared, workers);
                return Err(SchedulerError::Spawn(e.to_string()));
            }
        };

        info!("Task scheduler started with {} worker threads", worker_count);

        Ok(Self {
            shared,
            receiver,
            threads: Mutex::new(Some(Threads { workers, timer })),
            worker_count,
            policy: config.shutdown_policy,
        })
    }

    /// Read guard on the accepting flag, or an error once shutdown started
    fn admit(&self) -> Result<RwLockReadGuard<'_, bool>, SchedulerError> {
        let accepting = self.shared.accepting.read();
        if !*accepting {
            return Err(SchedulerError::ShuttingDown);
        }
        Ok(accepting)
    }

    fn next_cell<T>(&self, owner: Option<PluginId>, periodic: bool) -> Arc<TaskCell<T>> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        Arc::new(TaskCell::new(id, owner, periodic, Arc::downgrade(&self.shared)))
    }

    fn spawn_once<F, T>(&self, owner: Option<PluginId>, delay: Duration, body: F) -> Result<TaskHandle<T>, SchedulerError>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let deadline = deadline_after(delay)?;
        let _admitted = self.admit()?;
        let cell = self.next_cell::<T>(owner, false);
        self.shared.track(cell.clone());

        let job = Box::new(OneShot {
            cell: Arc::clone(&cell),
            body,
        });
        debug!("Submitted task {} with delay {:?}", cell.id(), delay);
        self.shared.schedule_at(deadline, job);
        Ok(TaskHandle::new(cell))
    }

    fn spawn_repeating<F>(
        &self,
        owner: Option<PluginId>,
        delay: Duration,
        cadence: Cadence,
        body: F,
    ) -> Result<TaskHandle<()>, SchedulerError>
    where
        F: FnMut() -> anyhow::Result<()> + Send + 'static,
    {
        let interval = cadence.interval();
        let deadline = deadline_after(delay)?;
        if interval.is_zero() || deadline.checked_add(interval).is_none() {
            return Err(SchedulerError::InvalidInterval);
        }

        let _admitted = self.admit()?;
        let cell = self.next_cell::<()>(owner, true);
        self.shared.track(cell.clone());

        let job = Box::new(Periodic {
            cell: Arc::clone(&cell),
            body,
            cadence,
            deadline,
        });
        debug!("Submitted periodic task {} ({:?}) starting in {:?}", cell.id(), cadence, delay);
        self.shared.schedule_at(deadline, job);
        Ok(TaskHandle::new(cell))
    }

    /// Run `task` on a worker as soon as one is free
    pub fn submit<F, T>(&self, task: F) -> Result<TaskHandle<T>, SchedulerError>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.spawn_once(None, Duration::ZERO, task)
    }

    /// Run `task` once, no earlier than `delay` from now
    ///
    /// A delay past the range of [`Instant`] is clamped to a far-future
    /// deadline, so the task only runs if it is not cancelled first.
    pub fn submit_delayed<F, T>(&self, task: F, delay: Duration) -> Result<TaskHandle<T>, SchedulerError>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.spawn_once(None, delay, task)
    }

    /// Run `task` after `delay`, then at a fixed rate of `interval`
    ///
    /// A late run does not trigger a burst of catch-up runs.
    pub fn submit_periodic<F>(&self, task: F, delay: Duration, interval: Duration) -> Result<TaskHandle<()>, SchedulerError>
    where
        F: FnMut() -> anyhow::Result<()> + Send + 'static,
    {
        self.spawn_repeating(None, delay, Cadence::FixedRate(interval), task)
    }

    /// Run `task` after `delay`, then `interval` after each run finishes
    pub fn submit_with_fixed_delay<F>(
        &self,
        task: F,
        delay: Duration,
        interval: Duration,
    ) -> Result<TaskHandle<()>, SchedulerError>
    where
        F: FnMut() -> anyhow::Result<()> + Send + 'static,
    {
        self.spawn_repeating(None, delay, Cadence::FixedDelay(interval), task)
    }

    /// Same as [`TaskHandle::cancel`]
    pub fn cancel<T: Send>(&self, handle: &TaskHandle<T>) -> bool {
        handle.cancel()
    }

    /// Submission front-end that attributes tasks to `owner`
    pub fn owned(&self, owner: PluginId) -> OwnedScheduler<'_> {
        OwnedScheduler { scheduler: self, owner }
    }

    /// Cancel every live task submitted on behalf of `owner`
    pub fn cancel_owned(&self, owner: &PluginId) -> usize {
        let ids: Vec<TaskId> = self
            .shared
            .owned
            .get(owner)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();

        let cancelled = ids
            .into_iter()
            .filter_map(|id| self.shared.live.get(&id).map(|control| Arc::clone(control.value())))
            .filter(|control| control.cancel())
            .count();

        if cancelled > 0 {
            info!("Cancelled {} scheduled tasks owned by '{}'", cancelled, owner);
        }
        cancelled
    }

    /// Number of tasks submitted by `owner` that have not been retired
    pub fn owned_task_count(&self, owner: &PluginId) -> usize {
        self.shared.owned.get(owner).map(|ids| ids.len()).unwrap_or(0)
    }

    /// Number of worker threads, fixed at construction
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// True once [`TaskScheduler::shutdown`] has started
    pub fn is_shutdown(&self) -> bool {
        !*self.shared.accepting.read()
    }

    /// Snapshot of the task counters and gauges
    pub fn stats(&self) -> SchedulerStats {
        self.shared.metrics.snapshot(self.worker_count, self.shared.live.len())
    }

    /// Prometheus text rendering of the scheduler metrics
    pub fn encode_metrics(&self) -> Result<String, std::fmt::Error> {
        self.shared.metrics.encode()
    }

    /// Stop accepting work and join every scheduler thread
    ///
    /// Delayed and periodic tasks still waiting for their deadline are
    /// cancelled. Tasks already queued are run or cancelled according to the
    /// configured [`ShutdownPolicy`]; tasks already running always finish.
    /// Calling this more than once is harmless.
    pub fn shutdown(&self) {
        let Some(threads) = self.threads.lock().take() else {
            return;
        };

        info!("Shutting down task scheduler ({:?})", self.policy);
        // Waits for submissions in flight to finish queueing their job.
        *self.shared.accepting.write() = false;

        self.shared.timer.stop();
        if threads.timer.join().is_err() {
            warn!("Scheduler timer thread panicked");
        }

        if self.policy == ShutdownPolicy::Abandon {
            let abandoned = self.drain_queue();
            if abandoned > 0 {
                info!("Abandoned {} queued tasks", abandoned);
            }
        }

        for _ in 0..threads.workers.len() {
            let _ = self.shared.sender.send(Message::Stop);
        }
        let current = thread::current().id();
        for worker in threads.workers {
            // Dropping the last owner from inside a task must not self-join.
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                warn!("Scheduler worker thread panicked");
            }
        }

        // Anything that slipped in behind the stop messages.
        self.drain_queue();
        info!("Task scheduler stopped");
    }

    fn drain_queue(&self) -> usize {
        let mut abandoned = 0;
        for message in self.receiver.try_iter() {
            if let Message::Run(job) = message {
                self.shared.metrics.queued.dec();
                job.abandon(&self.shared);
                abandoned += 1;
            }
        }
        abandoned
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn abort_startup(shared: &Shared, workers: Vec<JoinHandle<()>>) {
    *shared.accepting.write() = false;
    shared.timer.stop();
    for _ in 0..workers.len() {
        let _ = shared.sender.send(Message::Stop);
    }
    for worker in workers {
        let _ = worker.join();
    }
}

fn worker_loop(index: usize, shared: &Shared, receiver: &Receiver<Message>) {
    debug!("Scheduler worker {} started", index);

    while let Ok(message) = receiver.recv() {
        let job = match message {
            Message::Run(job) => job,
            Message::Stop => break,
        };

        shared.metrics.queued.dec();
        shared.metrics.running.inc();
        let start = Instant::now();

        // Task bodies are isolated in `execute`; this only guards the bookkeeping.
        match panic::catch_unwind(AssertUnwindSafe(|| job.run(shared))) {
            Ok(true) => shared.metrics.execution_seconds.observe(start.elapsed().as_secs_f64()),
            Ok(false) => {}
            Err(_) => warn!("Scheduler worker {} recovered from a panic outside a task body", index),
        }
        shared.metrics.running.dec();
    }

    debug!("Scheduler worker {} stopped", index);
}

/// Scheduler view that tags every submission with an owning plugin
///
/// Tasks submitted through it are cancelled by [`TaskScheduler::cancel_owned`]
/// when the plugin unloads.
pub struct OwnedScheduler<'a> {
    scheduler: &'a TaskScheduler,
    owner: PluginId,
}

impl<'a> OwnedScheduler<'a> {
    pub fn owner(&self) -> &PluginId {
        &self.owner
    }

    /// See [`TaskScheduler::submit`]
    pub fn submit<F, T>(&self, task: F) -> Result<TaskHandle<T>, SchedulerError>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.scheduler.spawn_once(Some(self.owner.clone()), Duration::ZERO, task)
    }

    /// See [`TaskScheduler::submit_delayed`]
    pub fn submit_delayed<F, T>(&self, task: F, delay: Duration) -> Result<TaskHandle<T>, SchedulerError>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.scheduler.spawn_once(Some(self.owner.clone()), delay, task)
    }

    /// See [`TaskScheduler::submit_periodic`]
    pub fn submit_periodic<F>(&self, task: F, delay: Duration, interval: Duration) -> Result<TaskHandle<()>, SchedulerError>
    where
        F: FnMut() -> anyhow::Result<()> + Send + 'static,
    {
        self.scheduler
            .spawn_repeating(Some(self.owner.clone()), delay, Cadence::FixedRate(interval), task)
    }

    pub fn submit_with_fixed_delay<F>(
        &self,
        task: F,
        delay: Duration,
        interval: Duration,
    ) -> Result<TaskHandle<()>, SchedulerError>
    where
        F: FnMut() -> anyhow::Result<()> + Send + 'static,
    {
        self.scheduler
            .spawn_repeating(Some(self.owner.clone()), delay, Cadence::FixedDelay(interval), task)
    }

    /// Cancel every live task of this owner, returning how many were stopped
    pub fn cancel_all(&self) -> usize {
        self.scheduler.cancel_owned(&self.owner)
    }
}
