//! Task state, handles and the jobs that run on the worker pool

use super::Shared;
use crate::plugin::PluginId;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Unique id of a scheduled task within one scheduler
pub type TaskId = u64;

/// Lifecycle of a scheduled task
///
/// `Pending -> Running -> (Completed | Cancelled | Failed)`. Periodic tasks go
/// back to `Pending` after every successful run until they are cancelled or fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Running => write!(f, "Running"),
            Self::Completed => write!(f, "Completed"),
            Self::Cancelled => write!(f, "Cancelled"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Why a task did not produce a value
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("Task failed: {0}")]
    Failed(String),
    #[error("Task panicked: {0}")]
    Panicked(String),
    #[error("Task was cancelled")]
    Cancelled,
    #[error("Task result was already taken")]
    ResultTaken,
}

struct Slot<T> {
    state: TaskState,
    outcome: Option<Result<T, TaskError>>,
    cancel_requested: bool,
}

/// Shared state between a task's handle and the job carrying its body
pub(crate) struct TaskCell<T> {
    id: TaskId,
    owner: Option<PluginId>,
    periodic: bool,
    slot: Mutex<Slot<T>>,
    finished: Condvar,
    watch: watch::Sender<TaskState>,
    scheduler: Weak<Shared>,
}

impl<T> TaskCell<T> {
    pub fn new(id: TaskId, owner: Option<PluginId>, periodic: bool, scheduler: Weak<Shared>) -> Self {
        let (watch, _) = watch::channel(TaskState::Pending);
        Self {
            id,
            owner,
            periodic,
            scheduler,
            slot: Mutex::new(Slot {
                state: TaskState::Pending,
                outcome: None,
                cancel_requested: false,
            }),
            finished: Condvar::new(),
            watch,
        }
    }

    fn publish(&self, slot: &Slot<T>) {
        if slot.state.is_terminal() {
            self.finished.notify_all();
        }
        self.watch.send_replace(slot.state);
    }

    /// Move `Pending -> Running`; false when the task was cancelled meanwhile
    fn try_start(&self) -> bool {
        let mut slot = self.slot.lock();
        if slot.state != TaskState::Pending || slot.cancel_requested {
            return false;
        }
        slot.state = TaskState::Running;
        self.publish(&slot);
        true
    }

    fn complete(&self, result: Result<T, TaskError>) {
        let mut slot = self.slot.lock();
        slot.state = match result {
            Ok(_) => TaskState::Completed,
            Err(_) => TaskState::Failed,
        };
        slot.outcome = Some(result);
        self.publish(&slot);
    }

    fn cancel_inner(&self) -> Cancellation {
        let mut slot = self.slot.lock();
        match slot.state {
            TaskState::Pending => {
                slot.state = TaskState::Cancelled;
                slot.outcome = Some(Err(TaskError::Cancelled));
                self.publish(&slot);
                Cancellation::Settled
            }
            // A running periodic task finishes this run but is not rescheduled.
            TaskState::Running if self.periodic && !slot.cancel_requested => {
                slot.cancel_requested = true;
                Cancellation::Deferred
            }
            _ => Cancellation::Refused,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cancellation {
    /// Cancelled before running; nothing will ever run it again
    Settled,
    /// Stops after the run in progress
    Deferred,
    Refused,
}

impl<T: Send> TaskCell<T> {
    /// Cancel and, when nothing can run the task any more, hand it back to the
    /// scheduler right away so its body is dropped without waiting for the deadline
    fn cancel_and_withdraw(&self) -> bool {
        match self.cancel_inner() {
            Cancellation::Settled => {
                if let Some(shared) = self.scheduler.upgrade() {
                    shared.withdraw(self);
                }
                true
            }
            Cancellation::Deferred => true,
            Cancellation::Refused => false,
        }
    }
}

impl TaskCell<()> {
    /// Settle a periodic run; true when the task should run again
    fn settle_run(&self, result: Result<(), TaskError>) -> bool {
        let mut slot = self.slot.lock();
        let again = match result {
            Err(e) => {
                slot.state = TaskState::Failed;
                slot.outcome = Some(Err(e));
                false
            }
            Ok(()) if slot.cancel_requested => {
                slot.state = TaskState::Cancelled;
                slot.outcome = Some(Err(TaskError::Cancelled));
                false
            }
            Ok(()) => {
                slot.state = TaskState::Pending;
                true
            }
        };
        self.publish(&slot);
        again
    }
}

/// Type-erased control surface the scheduler keeps for every live task
pub(crate) trait TaskControl: Send + Sync {
    fn id(&self) -> TaskId;
    fn owner(&self) -> Option<&PluginId>;
    fn state(&self) -> TaskState;
    fn cancel(&self) -> bool;
}

impl<T: Send> TaskControl for TaskCell<T> {
    fn id(&self) -> TaskId {
        self.id
    }

    fn owner(&self) -> Option<&PluginId> {
        self.owner.as_ref()
    }

    fn state(&self) -> TaskState {
        self.slot.lock().state
    }

    fn cancel(&self) -> bool {
        self.cancel_and_withdraw()
    }
}

/// Caller-held reference to a scheduled task
///
/// Dropping the handle does not cancel the task. Once the task reaches a
/// terminal state the handle only reports; `cancel` becomes a no-op.
pub struct TaskHandle<T> {
    cell: Arc<TaskCell<T>>,
}

impl<T: Send> TaskHandle<T> {
    pub(crate) fn new(cell: Arc<TaskCell<T>>) -> Self {
        Self { cell }
    }

    pub fn id(&self) -> TaskId {
        self.cell.id
    }

    /// Plugin the task was submitted for, if any
    pub fn owner(&self) -> Option<&PluginId> {
        self.cell.owner.as_ref()
    }

    pub fn is_periodic(&self) -> bool {
        self.cell.periodic
    }

    /// Current state; may change right after it is read
    pub fn state(&self) -> TaskState {
        self.cell.slot.lock().state
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// Best-effort cancellation
    ///
    /// Returns true if this call prevented a future execution. A running
    /// one-shot task is never interrupted; a running periodic task completes
    /// its current run and then stops.
    pub fn cancel(&self) -> bool {
        self.cell.cancel_and_withdraw()
    }

    /// Block until the task is terminal or `timeout` elapses
    ///
    /// A timeout too large to express as a deadline waits without limit.
    pub fn wait(&self, timeout: Duration) -> TaskState {
        let deadline = Instant::now().checked_add(timeout);
        let mut slot = self.cell.slot.lock();
        while !slot.state.is_terminal() {
            match deadline {
                Some(deadline) => {
                    if self.cell.finished.wait_until(&mut slot, deadline).timed_out() {
                        break;
                    }
                }
                None => self.cell.finished.wait(&mut slot),
            }
        }
        slot.state
    }

    /// Wait asynchronously for a terminal state
    pub async fn finished(&self) -> TaskState {
        let mut rx = self.cell.watch.subscribe();
        let state = match rx.wait_for(|state| state.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        };
        state
    }

    /// Clone of the failure, if the task failed or was cancelled
    pub fn error(&self) -> Option<TaskError> {
        let slot = self.cell.slot.lock();
        match &slot.outcome {
            Some(Err(e)) => Some(e.clone()),
            _ => None,
        }
    }

    /// Take the outcome if the task is already terminal
    pub fn try_join(&self) -> Option<Result<T, TaskError>> {
        let mut slot = self.cell.slot.lock();
        if !slot.state.is_terminal() {
            return None;
        }
        Some(slot.outcome.take().unwrap_or(Err(TaskError::ResultTaken)))
    }

    /// Block until the task is terminal and take its outcome
    pub fn join(self) -> Result<T, TaskError> {
        let mut slot = self.cell.slot.lock();
        while !slot.state.is_terminal() {
            self.cell.finished.wait(&mut slot);
        }
        slot.outcome.take().unwrap_or(Err(TaskError::ResultTaken))
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.cell.id)
            .field("owner", &self.cell.owner)
            .field("state", &self.cell.slot.lock().state)
            .finish()
    }
}

/// Unit of work travelling through the timer and the worker queue
pub(crate) trait Runnable: Send {
    fn id(&self) -> TaskId;

    /// Execute on a worker; returns false when the task was skipped
    fn run(self: Box<Self>, shared: &Shared) -> bool;

    /// Drop without running, e.g. during shutdown
    fn abandon(self: Box<Self>, shared: &Shared);
}

pub(crate) struct OneShot<T, F> {
    pub cell: Arc<TaskCell<T>>,
    pub body: F,
}

impl<T, F> Runnable for OneShot<T, F>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    fn id(&self) -> TaskId {
        self.cell.id
    }

    fn run(self: Box<Self>, shared: &Shared) -> bool {
        let OneShot { cell, body } = *self;
        if !cell.try_start() {
            shared.retire(&*cell);
            return false;
        }

        let result = execute(cell.id, body);
        cell.complete(result);
        shared.retire(&*cell);
        true
    }

    fn abandon(self: Box<Self>, shared: &Shared) {
        self.cell.cancel_inner();
        shared.retire(&*self.cell);
    }
}

/// How the next deadline of a repeating task is derived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Cadence {
    /// Next run is one interval after the previous deadline
    FixedRate(Duration),
    /// Next run is one interval after the previous run finished
    FixedDelay(Duration),
}

impl Cadence {
    pub fn interval(self) -> Duration {
        match self {
            Self::FixedRate(interval) | Self::FixedDelay(interval) => interval,
        }
    }

    /// Deadline of the run after one due at `previous` that finished at `now`
    ///
    /// `None` when the result cannot be represented as an [`Instant`].
    pub fn next_deadline(self, previous: Instant, now: Instant) -> Option<Instant> {
        match self {
            Self::FixedRate(interval) => previous.checked_add(interval).map(|next| next.max(now)),
            Self::FixedDelay(interval) => now.checked_add(interval),
        }
    }
}

pub(crate) struct Periodic<F> {
    pub cell: Arc<TaskCell<()>>,
    pub body: F,
    pub cadence: Cadence,
    pub deadline: Instant,
}

impl<F> Runnable for Periodic<F>
where
    F: FnMut() -> anyhow::Result<()> + Send + 'static,
{
    fn id(&self) -> TaskId {
        self.cell.id
    }

    fn run(mut self: Box<Self>, shared: &Shared) -> bool {
        if !self.cell.try_start() {
            shared.retire(&*self.cell);
            return false;
        }

        let id = self.cell.id;
        let result = execute(id, &mut self.body);
        let next = self.cadence.next_deadline(self.deadline, Instant::now());
        let result = match (result, next) {
            (Ok(()), None) => {
                warn!("Task {} cannot be rescheduled: next deadline is out of range", id);
                Err(TaskError::Failed("next deadline is out of range".to_string()))
            }
            (result, _) => result,
        };

        let again = self.cell.settle_run(result);
        match next {
            Some(deadline) if again => {
                self.deadline = deadline;
                let cell = Arc::clone(&self.cell);
                shared.schedule_at(deadline, self);
                // Cancelled between settling and rescheduling.
                if cell.state() == TaskState::Cancelled {
                    shared.withdraw(&*cell);
                }
            }
            _ => shared.retire(&*self.cell),
        }
        true
    }

    fn abandon(self: Box<Self>, shared: &Shared) {
        // A periodic task caught between runs is Pending, so this cancels it.
        self.cell.cancel_inner();
        shared.retire(&*self.cell);
    }
}

/// Run a task body, converting errors and panics into [`TaskError`]
fn execute<T>(id: TaskId, body: impl FnOnce() -> anyhow::Result<T>) -> Result<T, TaskError> {
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(value)) => {
            debug!("Task {} completed", id);
            Ok(value)
        }
        Ok(Err(e)) => {
            warn!("Task {} failed: {:#}", id, e);
            Err(TaskError::Failed(format!("{:#}", e)))
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!("Task {} panicked: {}", id, message);
            Err(TaskError::Panicked(message))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
