//! Embedded FIFO task scheduler for script-defined jobs.
//!
//! Tasks name a script unit and carry a serialized parameter blob. They are
//! queued in submission order and executed by a pool of worker threads that
//! grows on demand up to a configurable ceiling and shrinks as workers find
//! the queue empty. Each task runs inside its own script-host instance; its
//! outcome is observable only through its completion flag and whatever the
//! script writes into its execution context.
//!
//! # Example
//!
//! ```
//! use scriptfifo::{ConcurrencyConfig, ExecutionContext, NativeHost, Scheduler};
//! use std::time::Duration;
//!
//! let host = NativeHost::new();
//! host.register_module("jobs.double", |call| {
//!     let n = call.params["n"].as_i64().unwrap_or(0);
//!     call.context.set("result", n * 2);
//!     Ok(())
//! });
//!
//! let scheduler = Scheduler::with_config(host, ConcurrencyConfig::with_max_workers(2));
//! let context = ExecutionContext::new("example");
//! let task = scheduler.start_with_context("jobs.double", r#"{"n": 21}"#, false, context.clone());
//!
//! assert!(task.wait_timeout(Duration::from_secs(5)));
//! assert_eq!(context.get("result"), Some(42.into()));
//! ```

#![doc(html_root_url = "https://docs.rs/scriptfifo")]
#![warn(rust_2018_idioms)]

pub mod runtime;
pub mod util;

pub use runtime::host::{
    HostError, HostInstance, NativeHost, NativeValue, ScriptCall, ScriptError, ScriptHost,
    ScriptResult,
};
pub use runtime::scheduler::{
    Completion, ExecutionContext, Inspection, NodeHandle, Scheduler, SchedulerStats, ScriptRef,
    TaskHandle, TaskId, TaskNode,
};
pub use util::config::ConcurrencyConfig;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
