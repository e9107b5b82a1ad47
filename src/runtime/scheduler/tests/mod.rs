//! Scheduler unit tests
//!
//! Task nodes, completion signalling and statistics. Queue and scheduler
//! behaviour live in the submodules.


use crate::runtime::scheduler::{
    Completion, ExecutionContext, ExecutionOutcome, SchedulerStats, ScriptRef, TaskNode,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Poll `cond` until it holds or `timeout` elapses.
pub(super) fn wait_until(
    timeout: Duration,
    mut cond: impl FnMut() -> bool,
) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// A latch scripts block on until the test opens it.
#[derive(Clone, Default)]
pub(super) struct Gate {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Gate {
    pub(super) fn new() -> Self {
        Self::default()
    }

    pub(super) fn open(&self) {
        let (lock, cond) = &*self.inner;
        *lock.lock() = true;
        cond.notify_all();
    }

    pub(super) fn pass(&self) {
        let (lock, cond) = &*self.inner;
        let mut open = lock.lock();
        while !*open {
            cond.wait(&mut open);
        }
    }
}

#[cfg(test)]
mod script_ref_tests {
    use super::*;

    #[test]
    fn test_file_by_extension() {
        assert_eq!(
            ScriptRef::parse("jobs/report.yx", "yx"),
            ScriptRef::File("jobs/report.yx".to_string())
        );
        assert_eq!(
            ScriptRef::parse("jobs/report.yx", ".yx"),
            ScriptRef::File("jobs/report.yx".to_string())
        );
    }

    #[test]
    fn test_module_otherwise() {
        assert_eq!(
            ScriptRef::parse("jobs.report", "yx"),
            ScriptRef::Module("jobs.report".to_string())
        );
        assert_eq!(
            ScriptRef::parse("jobs/reportyx", "yx"),
            ScriptRef::Module("jobs/reportyx".to_string())
        );
        assert_eq!(
            ScriptRef::parse(".yx", "yx"),
            ScriptRef::Module(".yx".to_string())
        );
        assert!(!ScriptRef::parse("jobs/report.yx", "").is_file());
    }

    #[test]
    fn test_display() {
        assert_eq!(ScriptRef::parse("a.yx", "yx").to_string(), "file:a.yx");
        assert_eq!(ScriptRef::parse("a.b", "yx").to_string(), "module:a.b");
        assert_eq!(ScriptRef::parse("a.b", "yx").as_str(), "a.b");
    }
}

#[cfg(test)]
mod task_node_tests {
    use super::*;

    fn node(script: &str) -> TaskNode {
        TaskNode::new(script, r#"{"k": 1}"#, true, ExecutionContext::new("test"))
    }

    #[test]
    fn test_task_node_new() {
        let node = node("jobs.a");
        assert_eq!(node.script(), "jobs.a");
        assert_eq!(node.params(), r#"{"k": 1}"#);
        assert!(node.release());
        assert!(!node.is_finished());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = node("jobs.a");
        let b = node("jobs.a");
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }

    #[test]
    fn test_completion_shared_by_clones() {
        let original = node("jobs.a");
        let copy = original.clone();
        let handle = original.handle();
        let script_side = original.node_handle();

        assert!(copy.finish());
        assert!(original.is_finished());
        assert!(handle.is_finished());
        assert!(script_side.is_finished());
        // Second transition is refused.
        assert!(!original.finish());
        assert!(original.is_finished());
    }

    #[test]
    fn test_context_shared_by_clones() {
        let original = node("jobs.a");
        let copy = original.clone();
        copy.context().set("answer", 42);
        assert_eq!(original.context().get("answer"), Some(42.into()));
        assert!(original.context().shares_state_with(copy.context()));
    }

    #[test]
    fn test_handles_expose_identity() {
        let node = node("jobs.a");
        let handle = node.handle();
        let script_side = node.node_handle();

        assert_eq!(handle.id(), node.id());
        assert_eq!(handle.script(), "jobs.a");
        assert_eq!(handle.created_at(), node.created_at());
        assert_eq!(script_side.id(), node.id());
        assert_eq!(script_side.tag(), "task.fifo.node");
    }

    #[test]
    fn test_describe() {
        let node = node("jobs.a");
        let snapshot: serde_json::Value = serde_json::from_str(&node.describe()).unwrap();
        assert_eq!(snapshot["id"], node.id().to_string());
        assert_eq!(snapshot["script"], "jobs.a");
        assert_eq!(snapshot["release"], true);
        assert_eq!(
            snapshot["created_at"].as_i64(),
            Some(node.created_at().timestamp_micros())
        );
    }
}

#[cfg(test)]
mod execution_context_tests {
    use super::*;

    #[test]
    fn test_get_set_remove() {
        let context = ExecutionContext::new("ctx");
        assert_eq!(context.name(), "ctx");
        assert!(context.is_empty());

        assert_eq!(context.set("a", "x"), None);
        assert_eq!(context.set("a", "y"), Some("x".into()));
        assert!(context.contains("a"));
        assert_eq!(context.len(), 1);

        assert_eq!(context.remove("a"), Some("y".into()));
        assert!(!context.contains("a"));
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let context = ExecutionContext::new("ctx");
        context.set("a", 1);
        let snapshot = context.snapshot();
        context.set("a", 2);
        assert_eq!(snapshot["a"], 1);
    }

    #[test]
    fn test_separate_contexts_do_not_share() {
        let a = ExecutionContext::new("same");
        let b = ExecutionContext::new("same");
        assert!(!a.shares_state_with(&b));
    }
}

#[cfg(test)]
mod completion_tests {
    use super::*;

    #[test]
    fn test_starts_unset() {
        let completion = Completion::new();
        assert!(!completion.is_done());
        assert!(!completion.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_complete_once() {
        let completion = Completion::new();
        assert!(completion.complete());
        assert!(!completion.complete());
        assert!(completion.is_done());
        assert!(completion.wait_timeout(Duration::ZERO));
    }

    #[test]
    fn test_wait_wakes_other_thread() {
        let completion = Completion::new();
        let waiter = {
            let completion = completion.clone();
            thread::spawn(move || {
                completion.wait();
                completion.is_done()
            })
        };

        thread::sleep(Duration::from_millis(20));
        completion.complete();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_same_cell() {
        let a = Completion::new();
        let b = a.clone();
        let c = Completion::new();
        assert!(a.same_cell(&b));
        assert!(!a.same_cell(&c));
    }

    #[tokio::test]
    async fn test_async_done() {
        let completion = Completion::new();
        let setter = completion.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            setter.complete();
        });

        tokio::time::timeout(Duration::from_secs(5), completion.done())
            .await
            .expect("completion never resolved");
        assert!(completion.is_done());
    }

    #[tokio::test]
    async fn test_async_done_when_already_set() {
        let completion = Completion::new();
        completion.complete();
        completion.done().await;
    }
}

#[cfg(test)]
mod scheduler_stats_tests {
    use super::*;

    #[test]
    fn test_peak_only_rises() {
        let stats = SchedulerStats::default();
        stats.record_spawned(1);
        stats.record_spawned(3);
        stats.record_spawned(2);
        assert_eq!(stats.peak_workers.load(Ordering::SeqCst), 3);
        assert_eq!(stats.workers_spawned.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_finished_counts_every_outcome() {
        let stats = SchedulerStats::default();
        stats.record_completed(ExecutionOutcome::Completed);
        stats.record_completed(ExecutionOutcome::ScriptFailed);
        stats.record_host_failure();
        assert_eq!(stats.tasks_completed.load(Ordering::SeqCst), 1);
        assert_eq!(stats.script_failures.load(Ordering::SeqCst), 1);
        assert_eq!(stats.tasks_finished(), 3);
    }
}
