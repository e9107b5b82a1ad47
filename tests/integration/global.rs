use scriptfifo::util::config;
use scriptfifo::{NativeHost, Scheduler};
use std::time::Duration;

#[test]
fn test_global_scheduler_uses_global_host() {
    NativeHost::global().register_module("it.global.ping", |call| {
        call.context.set("pong", true);
        Ok(())
    });

    let scheduler = Scheduler::global();
    assert_eq!(
        scheduler.config().max_workers,
        config::platform().concurrency.max_workers
    );
    assert!(std::ptr::eq(Scheduler::global(), scheduler));

    let context = scriptfifo::ExecutionContext::new("global");
    let task = scheduler.start_with_context("it.global.ping", "", false, context.clone());
    assert!(task.wait_timeout(Duration::from_secs(10)));
    assert_eq!(context.get("pong"), Some(true.into()));
}
