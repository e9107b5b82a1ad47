use parking_lot::{Condvar, Mutex};
use scriptfifo::{ConcurrencyConfig, ExecutionContext, Inspection, NativeHost, Scheduler};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(10);

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

#[derive(Clone, Default)]
struct Gate(Arc<(Mutex<bool>, Condvar)>);

impl Gate {
    fn open(&self) {
        *self.0 .0.lock() = true;
        self.0 .1.notify_all();
    }

    fn pass(&self) {
        let mut open = self.0 .0.lock();
        while !*open {
            self.0 .1.wait(&mut open);
        }
    }
}

fn script_of(snapshot: &str) -> String {
    let value: serde_json::Value = serde_json::from_str(snapshot).unwrap();
    value["script"].as_str().unwrap_or_default().to_string()
}

#[test]
fn test_three_tasks_two_workers() {
    let host = NativeHost::new();
    let gate = Gate::default();
    for name in ["jobs.a", "jobs.b", "jobs.c"] {
        let gate = gate.clone();
        host.register_module(name, move |_call| {
            gate.pass();
            Ok(())
        });
    }
    let scheduler = Scheduler::with_config(host, ConcurrencyConfig::with_max_workers(2));

    let a = scheduler.start("jobs.a", "", false);
    let b = scheduler.start("jobs.b", "", false);
    let c = scheduler.start("jobs.c", "", false);
    assert_eq!(scheduler.active_workers(), 2);

    assert!(wait_until(|| scheduler.running() == 2));
    let mid: Inspection = serde_json::from_str(&scheduler.inspect()).unwrap();
    assert_eq!(mid.queue, 1);
    let dequeued: Vec<String> = mid.running.iter().map(|s| script_of(s)).collect();
    assert_eq!(dequeued, ["jobs.a", "jobs.b"]);
    assert!(!a.is_finished() && !b.is_finished() && !c.is_finished());

    gate.open();
    for task in [&a, &b, &c] {
        assert!(task.wait_timeout(TIMEOUT));
    }

    assert_eq!(scheduler.inspect(), r#"{"running":[],"queue":0}"#);
    assert_eq!(scheduler.stats().workers_spawned.load(Ordering::SeqCst), 2);
    assert!(wait_until(|| scheduler.active_workers() == 0));
}

#[test]
fn test_queue_depth_only_decreases_while_draining() {
    let host = NativeHost::new();
    host.register_module("jobs.short", |_call| {
        thread::sleep(Duration::from_millis(1));
        Ok(())
    });
    let scheduler = Scheduler::with_config(host, ConcurrencyConfig::with_max_workers(0));

    let mut tasks: Vec<_> = (0..30)
        .map(|_| scheduler.start("jobs.short", "", false))
        .collect();
    scheduler.set_max_workers(3);
    tasks.push(scheduler.start("jobs.short", "", false));

    let mut last = usize::MAX;
    while !tasks.iter().all(|t| t.is_finished()) {
        let inspection = scheduler.inspection();
        assert!(inspection.queue <= last);
        assert!(inspection.running.len() <= 3);
        last = inspection.queue;
    }
    assert_eq!(scheduler.inspection().queue, 0);
}

#[test]
fn test_result_written_back_through_context() {
    let host = NativeHost::new();
    host.register_file("jobs/sum.yx", |call| {
        let total: i64 = call.params["values"]
            .as_array()
            .map(|values| values.iter().filter_map(|v| v.as_i64()).sum())
            .unwrap_or_default();
        call.context.set("total", total);
        Ok(())
    });
    let scheduler = Scheduler::with_config(host, ConcurrencyConfig::with_max_workers(4));

    let contexts: Vec<ExecutionContext> = (0..8)
        .map(|i| ExecutionContext::new(format!("sum-{}", i)))
        .collect();
    let tasks: Vec<_> = contexts
        .iter()
        .enumerate()
        .map(|(i, ctx)| {
            let params = format!(r#"{{"values": [{}, {}, {}]}}"#, i, i, i);
            scheduler.start_with_context("jobs/sum.yx", &params, true, ctx.clone())
        })
        .collect();

    for (i, (task, ctx)) in tasks.iter().zip(&contexts).enumerate() {
        assert!(task.wait_timeout(TIMEOUT));
        assert_eq!(ctx.get("total"), Some(((i * 3) as i64).into()));
    }
    assert_eq!(scheduler.host().instances_released(), 8);
}

#[test]
fn test_failing_task_still_completes() {
    let host = NativeHost::new();
    host.register_module("jobs.fail", |call| {
        call.context.set("attempted", true);
        anyhow::bail!("bad input: {}", call.params)
    });
    let scheduler = Scheduler::with_config(host, ConcurrencyConfig::with_max_workers(1));

    let context = ExecutionContext::new("failing");
    let task = scheduler.start_with_context("jobs.fail", r#"{"x": 1}"#, false, context.clone());
    assert!(task.wait_timeout(TIMEOUT));
    assert_eq!(context.get("attempted"), Some(true.into()));
    assert_eq!(scheduler.stats().script_failures.load(Ordering::SeqCst), 1);

    let unknown = scheduler.start("", "", false);
    assert!(unknown.wait_timeout(TIMEOUT));
    assert_eq!(scheduler.stats().script_failures.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_await_completion() {
    let host = NativeHost::new();
    host.register_module("jobs.slow", |_call| {
        thread::sleep(Duration::from_millis(20));
        Ok(())
    });
    let scheduler = Scheduler::with_config(host, ConcurrencyConfig::with_max_workers(2));

    let task = scheduler.start("jobs.slow", "", false);
    tokio::time::timeout(TIMEOUT, task.finished())
        .await
        .expect("task never finished");
    assert!(task.is_finished());
}
