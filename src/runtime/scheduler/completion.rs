//! Completion signal shared by every copy of a task node.
//!
//! A `Completion` is written once by the worker that finished the task and
//! read from any number of threads. Readers can poll it, block on it with an
//! optional timeout, or await it from async code.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct CompletionInner {
    /// Set exactly once, `false -> true`.
    done: AtomicBool,
    /// Guards the condvar handshake for blocking waiters.
    lock: Mutex<()>,
    cond: Condvar,
    /// Wakes async waiters.
    notify: Notify,
}

/// Single-writer, multi-reader completion cell.
///
/// Cloning shares the same cell.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    inner: Arc<CompletionInner>,
}

impl Completion {
    /// Create a fresh, unset completion.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking check.
    #[inline]
    pub fn is_done(&self) -> bool {
        self.inner.done.load(Ordering::Acquire)
    }

    /// Mark as done and wake every waiter.
    ///
    /// Returns `false` if the cell had already been set.
    pub(crate) fn complete(&self) -> bool {
        if self.inner.done.swap(true, Ordering::AcqRel) {
            return false;
        }

        {
            let _guard = self.inner.lock.lock();
            self.inner.cond.notify_all();
        }
        self.inner.notify.notify_waiters();
        true
    }

    /// Block the calling thread until the cell is set.
    pub fn wait(&self) {
        if self.is_done() {
            return;
        }
        let mut guard = self.inner.lock.lock();
        while !self.is_done() {
            self.inner.cond.wait(&mut guard);
        }
    }

    /// Block for at most `timeout`. Returns whether the cell is set.
    pub fn wait_timeout(
        &self,
        timeout: Duration,
    ) -> bool {
        if self.is_done() {
            return true;
        }
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.lock.lock();
        while !self.is_done() {
            if self
                .inner
                .cond
                .wait_until(&mut guard, deadline)
                .timed_out()
            {
                return self.is_done();
            }
        }
        true
    }

    /// Resolve once the cell is set.
    pub async fn done(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before re-checking so a concurrent `complete` cannot slip between.
            notified.as_mut().enable();
            if self.is_done() {
                return;
            }
            notified.await;
        }
    }

    /// Whether two completions share the same cell.
    #[inline]
    pub fn same_cell(
        &self,
        other: &Completion,
    ) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
