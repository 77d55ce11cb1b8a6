//! Deadline heap feeding delayed and periodic tasks into the worker queue

use super::task::{Runnable, TaskId};
use super::Shared;
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;
use tracing::debug;

struct Scheduled {
    deadline: Instant,
    seq: u64,
    job: Box<dyn Runnable>,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    // Reversed so the earliest deadline sits on top of the max-heap.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct TimerState {
    heap: BinaryHeap<Scheduled>,
    seq: u64,
    stopped: bool,
}

pub(crate) struct Timer {
    state: Mutex<TimerState>,
    wakeup: Condvar,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TimerState {
                heap: BinaryHeap::new(),
                seq: 0,
                stopped: false,
            }),
            wakeup: Condvar::new(),
        }
    }

    /// Queue `job` for release at `deadline`; hands the job back once stopped
    pub fn schedule(&self, deadline: Instant, job: Box<dyn Runnable>) -> Result<(), Box<dyn Runnable>> {
        let mut state = self.state.lock();
        if state.stopped {
            return Err(job);
        }

        let seq = state.seq;
        state.seq += 1;
        state.heap.push(Scheduled { deadline, seq, job });
        self.wakeup.notify_one();
        Ok(())
    }

    /// Take the job of `task` out of the heap, if it is still waiting
    pub fn remove(&self, task: TaskId) -> Option<Box<dyn Runnable>> {
        let mut state = self.state.lock();
        if !state.heap.iter().any(|scheduled| scheduled.job.id() == task) {
            return None;
        }

        let (mut found, rest): (Vec<Scheduled>, Vec<Scheduled>) = std::mem::take(&mut state.heap)
            .into_vec()
            .into_iter()
            .partition(|scheduled| scheduled.job.id() == task);
        state.heap = BinaryHeap::from(rest);
        found.pop().map(|scheduled| scheduled.job)
    }

    pub fn stop(&self) {
        self.state.lock().stopped = true;
        self.wakeup.notify_all();
    }

    /// Timer thread body; returns once stopped, abandoning whatever is left
    pub fn run(&self, shared: &Shared) {
        debug!("Scheduler timer started");
        let mut state = self.state.lock();

        loop {
            if state.stopped {
                let leftover: Vec<Scheduled> = state.heap.drain().collect();
                drop(state);

                for scheduled in leftover {
                    shared.metrics.delayed.dec();
                    scheduled.job.abandon(shared);
                }
                break;
            }

            let now = Instant::now();
            let next = state.heap.peek().map(|scheduled| scheduled.deadline);
            match next {
                Some(deadline) if deadline <= now => {
                    if let Some(scheduled) = state.heap.pop() {
                        shared.metrics.delayed.dec();
                        shared.enqueue(scheduled.job);
                    }
                }
                Some(deadline) => {
                    self.wakeup.wait_until(&mut state, deadline);
                }
                None => {
                    self.wakeup.wait(&mut state);
                }
            }
        }

        debug!("Scheduler timer stopped");
    }
}
