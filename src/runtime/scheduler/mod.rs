//! FIFO task scheduler
//!
//! Runs script-defined tasks on a pool of self-terminating worker threads.
//! Submissions append to a shared FIFO queue and start a new worker while
//! fewer than `max_workers` are alive; each worker drains the queue and exits
//! when it finds it empty.

pub mod completion;
pub mod node;
pub mod queue;
mod worker;

pub use completion::Completion;
pub use node::{
    ExecutionContext, ExecutionOutcome, NodeHandle, ScriptRef, TaskHandle, TaskId, TaskNode,
};
pub use queue::{FifoQueue, FifoState, RunningRegistry};
pub use worker::WorkerState;

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace};

use crate::runtime::host::{NativeHost, ScriptHost};
use crate::util::config::{self, ConcurrencyConfig};
use worker::Worker;

/// Process-wide scheduler over the global native host.
static GLOBAL: Lazy<Scheduler<NativeHost>> = Lazy::new(|| {
    Scheduler::with_config(
        NativeHost::global().clone(),
        config::platform().concurrency.clone(),
    )
});

/// Scheduler statistics.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    /// Tasks accepted by `start`.
    pub tasks_submitted: AtomicUsize,
    /// Tasks whose entry point returned normally.
    pub tasks_completed: AtomicUsize,
    /// Tasks that failed at script level.
    pub script_failures: AtomicUsize,
    /// Tasks whose worker could not obtain or keep a host instance.
    pub host_failures: AtomicUsize,
    /// Workers started over the scheduler's lifetime.
    pub workers_spawned: AtomicUsize,
    /// Highest number of simultaneously live workers.
    pub peak_workers: AtomicUsize,
}

impl SchedulerStats {
    #[inline]
    pub fn record_submitted(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub fn record_completed(
        &self,
        outcome: ExecutionOutcome,
    ) {
        match outcome {
            ExecutionOutcome::Completed => self.tasks_completed.fetch_add(1, Ordering::SeqCst),
            ExecutionOutcome::ScriptFailed => self.script_failures.fetch_add(1, Ordering::SeqCst),
        };
    }

    #[inline]
    pub fn record_host_failure(&self) {
        self.host_failures.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a new worker and raise the peak if `active` exceeds it.
    pub fn record_spawned(
        &self,
        active: usize,
    ) {
        self.workers_spawned.fetch_add(1, Ordering::SeqCst);
        loop {
            let peak = self.peak_workers.load(Ordering::SeqCst);
            if active <= peak {
                break;
            }
            if self
                .peak_workers
                .compare_exchange(peak, active, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                break;
            }
        }
    }

    /// Tasks that reached the end of execution, successfully or not.
    pub fn tasks_finished(&self) -> usize {
        self.tasks_completed.load(Ordering::SeqCst)
            + self.script_failures.load(Ordering::SeqCst)
            + self.host_failures.load(Ordering::SeqCst)
    }
}

/// Point-in-time view of the scheduler, serialized by [`Scheduler::inspect`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inspection {
    /// Snapshots of executing tasks, in dequeue order.
    pub running: Vec<String>,
    /// Tasks still waiting in the queue.
    pub queue: usize,
}

/// State shared by the scheduler handle and its workers.
pub(crate) struct Shared<H: ScriptHost> {
    pub(crate) state: Mutex<FifoState>,
    pub(crate) active: AtomicUsize,
    pub(crate) max_workers: AtomicUsize,
    pub(crate) worker_seq: AtomicUsize,
    pub(crate) stats: SchedulerStats,
    pub(crate) config: ConcurrencyConfig,
    pub(crate) host: H,
}

impl<H: ScriptHost> Shared<H> {
    /// Drop the registry entry, then flip the completion flag.
    pub(crate) fn complete(
        &self,
        node: &TaskNode,
    ) {
        self.state.lock().finish(&node.id());
        node.finish();
    }
}

/// FIFO scheduler with a bounded, self-scaling worker pool.
///
/// Cloning yields another handle to the same scheduler.
pub struct Scheduler<H: ScriptHost> {
    shared: Arc<Shared<H>>,
}

impl<H: ScriptHost> Scheduler<H> {
    /// Create a scheduler with the default configuration.
    #[inline]
    pub fn new(host: H) -> Self {
        Self::with_config(host, ConcurrencyConfig::default())
    }

    /// Create a scheduler; the max-concurrency setting starts at
    /// `config.max_workers`.
    pub fn with_config(
        host: H,
        config: ConcurrencyConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(FifoState::new()),
                active: AtomicUsize::new(0),
                max_workers: AtomicUsize::new(config.max_workers),
                worker_seq: AtomicUsize::new(0),
                stats: SchedulerStats::default(),
                config,
                host,
            }),
        }
    }

    /// Queue `script` with a fresh execution context.
    ///
    /// See [`start_with_context`](Self::start_with_context).
    pub fn start(
        &self,
        script: &str,
        params: &str,
        release: bool,
    ) -> TaskHandle {
        let context = ExecutionContext::new(self.shared.config.context_name.as_str());
        self.start_with_context(script, params, release, context)
    }

    /// Queue `script` to run with `params`, binding `context` into the host
    /// instance that runs it.
    ///
    /// `release` selects whether that instance is torn down afterwards or
    /// collected and kept warm. A worker is started if fewer than
    /// `max_workers` are alive. The script reference is not validated here;
    /// an unknown script surfaces as a diagnostic when the task runs.
    pub fn start_with_context(
        &self,
        script: &str,
        params: &str,
        release: bool,
        context: ExecutionContext,
    ) -> TaskHandle {
        let node = TaskNode::new(script, params, release, context);
        let handle = node.handle();
        {
            let mut fifo = self.shared.state.lock();
            fifo.queue.push(node);
        }
        self.shared.stats.record_submitted();
        debug!(task = %handle.id(), script, "task queued");

        self.spawn_worker();
        handle
    }

    fn spawn_worker(&self) {
        let Some(worker) = Worker::reserve(&self.shared) else {
            trace!("worker pool saturated");
            return;
        };
        if let Err(err) = worker.spawn() {
            error!("failed to spawn worker thread: {}", err);
        }
    }

    /// JSON snapshot: `{"running": [...], "queue": n}`.
    pub fn inspect(&self) -> String {
        serde_json::to_string(&self.inspection()).unwrap_or_default()
    }

    /// Typed form of [`inspect`](Self::inspect), taken under the queue lock.
    pub fn inspection(&self) -> Inspection {
        let fifo = self.shared.state.lock();
        Inspection {
            running: fifo.running.snapshots(),
            queue: fifo.queue.len(),
        }
    }

    /// Tasks waiting in the queue.
    pub fn queued(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Tasks currently executing.
    pub fn running(&self) -> usize {
        self.shared.state.lock().running.len()
    }

    /// Live workers.
    #[inline]
    pub fn active_workers(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn max_workers(&self) -> usize {
        self.shared.max_workers.load(Ordering::SeqCst)
    }

    /// Change the ceiling used by future spawn decisions. Running workers
    /// are not stopped. Returns the previous value.
    pub fn set_max_workers(
        &self,
        max: usize,
    ) -> usize {
        let previous = self.shared.max_workers.swap(max, Ordering::SeqCst);
        debug!(previous, max, "max workers changed");
        previous
    }

    #[inline]
    pub fn stats(&self) -> &SchedulerStats {
        &self.shared.stats
    }

    #[inline]
    pub fn host(&self) -> &H {
        &self.shared.host
    }

    #[inline]
    pub fn config(&self) -> &ConcurrencyConfig {
        &self.shared.config
    }
}

impl Scheduler<NativeHost> {
    /// The process-wide scheduler, built on first use from the platform
    /// configuration.
    pub fn global() -> &'static Self {
        &GLOBAL
    }
}

impl<H: ScriptHost> Clone for Scheduler<H> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<H: ScriptHost> fmt::Debug for Scheduler<H> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("active_workers", &self.active_workers())
            .field("max_workers", &self.max_workers())
            .field("queued", &self.queued())
            .field("running", &self.running())
            .finish()
    }
}

#[cfg(test)]
mod tests;
