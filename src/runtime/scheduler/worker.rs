//! Self-terminating FIFO workers.
//!
//! A worker drains the shared queue one node at a time and exits as soon as
//! it finds the queue empty. Workers are only created by the submission path,
//! which first reserves a slot under the max-concurrency ceiling.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Utc};
use tracing::{debug, debug_span, error, warn};
use uuid::Uuid;

use super::node::{ExecutionContext, TaskNode};
use super::Shared;
use crate::runtime::host::{panic_message, ScriptHost, DIAGNOSTIC_TARGET};

/// Worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Created, not yet fetching.
    Idle,
    /// Looking for the next node.
    Fetching,
    /// Running a node.
    Executing,
    /// Found the queue empty, or hit a host failure.
    Terminated,
}

pub(crate) struct Worker<H: ScriptHost> {
    id: Uuid,
    seq: usize,
    created_at: DateTime<Utc>,
    shared: Arc<Shared<H>>,
    /// Context of the node currently bound to this worker.
    context: ExecutionContext,
    state: WorkerState,
    /// Set once the slot has been given back under the queue lock.
    retired: bool,
}

impl<H: ScriptHost> Worker<H> {
    /// Claim a slot in the pool. Returns `None` when `active >= max`.
    pub(crate) fn reserve(shared: &Arc<Shared<H>>) -> Option<Self> {
        let mut active = shared.active.load(Ordering::SeqCst);
        loop {
            if active >= shared.max_workers.load(Ordering::SeqCst) {
                return None;
            }
            match shared.active.compare_exchange_weak(
                active,
                active + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => active = actual,
            }
        }
        shared.stats.record_spawned(active + 1);

        Some(Self {
            id: Uuid::new_v4(),
            seq: shared.worker_seq.fetch_add(1, Ordering::SeqCst),
            created_at: Utc::now(),
            shared: shared.clone(),
            context: ExecutionContext::new(shared.config.context_name.as_str()),
            state: WorkerState::Idle,
            retired: false,
        })
    }

    /// Start the worker on its own OS thread.
    ///
    /// On failure the worker is dropped and its slot is released.
    pub(crate) fn spawn(self) -> std::io::Result<()> {
        let mut builder =
            thread::Builder::new().name(format!("{}-{}", self.shared.config.thread_name, self.seq));
        if let Some(size) = self.shared.config.stack_size {
            builder = builder.stack_size(size);
        }
        builder.spawn(move || self.run()).map(|_| ())
    }

    fn run(mut self) {
        let span = debug_span!("fifo_worker", worker = self.seq);
        let _enter = span.enter();
        debug!(id = %self.id, created_at = %self.created_at, "worker started");

        while let Some(node) = self.fetch() {
            self.state = WorkerState::Executing;
            self.context = node.context().clone();

            let task_span = debug_span!("task", id = %node.id(), script = %node.script());
            let result = task_span.in_scope(|| {
                panic::catch_unwind(AssertUnwindSafe(|| {
                    node.execute(&self.shared.host, &self.shared.config)
                }))
            });

            // Stats first, so anyone woken by the completion flag sees them.
            let host_failure = match result {
                Ok(Ok(outcome)) => {
                    self.shared.stats.record_completed(outcome);
                    debug!(task = %node.id(), ?outcome, "task finished");
                    None
                }
                Ok(Err(err)) => {
                    self.shared.stats.record_host_failure();
                    Some(err.to_string())
                }
                Err(payload) => {
                    self.shared.stats.record_host_failure();
                    Some(format!("host panicked: {}", panic_message(payload.as_ref())))
                }
            };
            self.shared.complete(&node);

            if let Some(reason) = host_failure {
                error!(target: DIAGNOSTIC_TARGET, task = %node.id(), "{}", reason);
                break;
            }
        }

        self.state = WorkerState::Terminated;
        debug!(id = %self.id, context = self.context.name(), "worker exiting");
    }

    /// Pop the next node, or give the slot back if there is none.
    fn fetch(&mut self) -> Option<TaskNode> {
        self.state = WorkerState::Fetching;

        let shared = &self.shared;
        let mut fifo = shared.state.lock();
        if let Some(node) = fifo.dequeue() {
            return Some(node);
        }

        // Released while the queue is still locked: a submitter that pushes
        // after this point observes the free slot.
        shared.active.fetch_sub(1, Ordering::SeqCst);
        self.retired = true;
        None
    }
}

impl<H: ScriptHost> Drop for Worker<H> {
    fn drop(&mut self) {
        if !self.retired {
            self.shared.active.fetch_sub(1, Ordering::SeqCst);
            if self.state != WorkerState::Idle {
                warn!(id = %self.id, state = ?self.state, "worker exited before draining the queue");
            }
        }
    }
}
