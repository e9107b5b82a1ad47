//! Script-execution host boundary
//!
//! The scheduler never interprets scripts itself. It acquires an instance
//! from a [`ScriptHost`], binds the task's context into it, resolves the
//! script, and invokes the resulting entry point with the node handle and the
//! decoded parameters.

pub mod errors;
pub mod native;

pub use errors::{HostError, ScriptError, ScriptResult};
pub use native::{NativeHost, NativeInstance, NativeValue, ScriptCall};

use std::any::Any;

use crate::runtime::scheduler::{ExecutionContext, NodeHandle};

/// Tracing target of the diagnostic channel.
pub const DIAGNOSTIC_TARGET: &str = "scriptfifo::diagnostic";

/// Source of execution instances.
pub trait ScriptHost: Send + Sync + 'static {
    type Instance: HostInstance;

    /// Acquire an instance. With `release == true` the instance is torn down
    /// after the task; otherwise it may be a warm, previously used one.
    fn acquire(
        &self,
        release: bool,
    ) -> Result<Self::Instance, HostError>;
}

/// One isolated script interpreter, used by a single task at a time.
pub trait HostInstance {
    /// Callable unit produced by resolving a script.
    type Entry;
    /// Native argument value.
    type Value;

    /// Make the task's context visible to scripts.
    fn bind(
        &mut self,
        context: &ExecutionContext,
    );

    /// Load a module unless it is already loaded.
    fn ensure_module_loaded(
        &mut self,
        name: &str,
    ) -> ScriptResult<()>;

    /// Load and run a file-like unit, returning its entry point.
    fn run_file(
        &mut self,
        path: &str,
    ) -> ScriptResult<Self::Entry>;

    /// Resolve a module by name, returning its entry point.
    fn run_module(
        &mut self,
        name: &str,
    ) -> ScriptResult<Self::Entry>;

    /// Wrap the node as an opaque script value.
    fn wrap_handle(
        &mut self,
        node: NodeHandle,
    ) -> Self::Value;

    /// Decode the serialized parameter blob.
    fn decode_params(
        &mut self,
        params: &str,
    ) -> ScriptResult<Self::Value>;

    /// Call `entry(node, params)`.
    fn invoke(
        &mut self,
        entry: Self::Entry,
        node: Self::Value,
        params: Self::Value,
    ) -> ScriptResult<()>;

    /// Tear the instance down.
    fn release(self);

    /// Run a collection pass and keep the instance warm for reuse.
    fn collect(self);
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
