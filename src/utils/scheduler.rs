//! Delayed one-shot task execution.
//!
//! The circuit breaker schedules its timer-driven transitions (the
//! sleep-window wakeup and the half-open conversion check) on a [`Scheduler`].
//! Tasks are messages on a channel consumed by a single worker thread, so a
//! task outstanding at the time its breaker is replaced can be cancelled
//! through its [`TaskHandle`] without touching the worker.

use crate::logging;
use crate::utils::curr_time_millis;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

// upper bound on idle waits so a worker with an empty heap still notices shutdown promptly
const IDLE_WAIT_MS: u64 = 1000;

/// Handle to a scheduled task. Cancellation is cooperative: the flag is
/// checked right before the task fires.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    cancelled: Arc<AtomicBool>,
}

impl TaskHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

struct ScheduledTask {
    deadline_ms: u64,
    seq: u64,
    cancelled: Arc<AtomicBool>,
    job: Box<dyn FnOnce() + Send>,
}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.deadline_ms == other.deadline_ms && self.seq == other.seq
    }
}

impl Eq for ScheduledTask {}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTask {
    // reversed so that `BinaryHeap` pops the earliest deadline first
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline_ms
            .cmp(&self.deadline_ms)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

enum Msg {
    Schedule(ScheduledTask),
    Shutdown,
}

/// Single-threaded delayed-task executor with cancellable one-shot tasks.
pub struct Scheduler {
    tx: Mutex<Sender<Msg>>,
    seq: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        let worker = std::thread::spawn(move || Self::run(rx));
        Scheduler {
            tx: Mutex::new(tx),
            seq: AtomicU64::new(0),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Schedules `job` to run once, `delay` from now. The returned handle
    /// cancels the task if it has not fired yet.
    pub fn schedule_once<F>(&self, delay: Duration, job: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        let task = ScheduledTask {
            deadline_ms: curr_time_millis() + delay.as_millis() as u64,
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            cancelled: Arc::clone(&cancelled),
            job: Box::new(job),
        };
        if self.tx.lock().unwrap().send(Msg::Schedule(task)).is_err() {
            logging::error!("[Scheduler] schedule_once() called on a shut down scheduler");
        }
        TaskHandle { cancelled }
    }

    /// Stops the worker thread. Tasks still pending are dropped unrun.
    pub fn shutdown(&self) {
        let _ = self.tx.lock().unwrap().send(Msg::Shutdown);
        if let Some(worker) = self.worker.lock().unwrap().take() {
            let _ = worker.join();
        }
    }

    fn run(rx: Receiver<Msg>) {
        let mut heap: BinaryHeap<ScheduledTask> = BinaryHeap::new();
        loop {
            let now = curr_time_millis();
            while heap
                .peek()
                .map(|task| task.deadline_ms <= now)
                .unwrap_or(false)
            {
                let task = heap.pop().unwrap();
                if !task.cancelled.load(Ordering::SeqCst) {
                    (task.job)();
                }
            }
            let wait = heap
                .peek()
                .map(|task| task.deadline_ms.saturating_sub(now))
                .unwrap_or(IDLE_WAIT_MS);
            match rx.recv_timeout(Duration::from_millis(wait.min(IDLE_WAIT_MS))) {
                Ok(Msg::Schedule(task)) => heap.push(task),
                Ok(Msg::Shutdown) => break,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
