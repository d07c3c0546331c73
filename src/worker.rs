//! Async Worker (C2): a minimal single-shot background job with a
//! non-blocking, idempotent poll. Jobs run on the process-wide rayon pool —
//! the same scheduling idiom the teacher crate uses to keep prefetch
//! dispatch off the caller thread (`TileScheduler::prefetch_for_viewport`'s
//! `par_iter().for_each`), generalized here to one job per handle instead of
//! a batch.
//!
//! Cancellation is not supported (§4.2): once started, a job runs to
//! completion regardless of whether anything still wants the result.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Pending,
    Done,
}

/// Handle to a single background job producing a `T`.
pub struct AsyncWorker<T> {
    done: Arc<AtomicBool>,
    slot: Arc<Mutex<Option<T>>>,
}

impl<T: Send + 'static> AsyncWorker<T> {
    /// Schedules `job` on the shared background pool. Returns immediately.
    pub fn start(job: impl FnOnce() -> T + Send + 'static) -> Self {
        let done = Arc::new(AtomicBool::new(false));
        let slot: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));
        let done_bg = Arc::clone(&done);
        let slot_bg = Arc::clone(&slot);
        rayon::spawn(move || {
            let result = job();
            *slot_bg.lock() = Some(result);
            // Release ordering: the result write must be visible to any
            // thread that observes `done == true`.
            done_bg.store(true, Ordering::Release);
        });
        Self { done, slot }
    }

    /// Non-blocking; may be called repeatedly. Returns `Done` exactly once
    /// the job has completed and keeps returning `Done` afterward.
    pub fn poll(&self) -> WorkerStatus {
        if self.done.load(Ordering::Acquire) {
            WorkerStatus::Done
        } else {
            WorkerStatus::Pending
        }
    }

    /// Takes the job's result. Only meaningful after `poll() == Done`;
    /// returns `None` before completion or on a second call.
    pub fn take(&self) -> Option<T> {
        self.slot.lock().take()
    }

    /// Test double: a worker that never signals completion, for exercising
    /// eviction-veto-while-loading behavior without a real background job.
    #[cfg(test)]
    pub fn never_complete() -> Self {
        Self {
            done: Arc::new(AtomicBool::new(false)),
            slot: Arc::new(Mutex::new(None)),
        }
    }
}
