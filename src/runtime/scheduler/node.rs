//! Task nodes for the FIFO scheduler.
//!
//! A [`TaskNode`] is a value describing one unit of queued work. Nodes are
//! cheap to clone and every clone shares the same [`Completion`] cell and the
//! same [`ExecutionContext`] state.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::error;
use uuid::Uuid;

use super::completion::Completion;
use crate::runtime::host::{HostError, HostInstance, ScriptError, ScriptHost, DIAGNOSTIC_TARGET};
use crate::util::config::ConcurrencyConfig;

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generate a fresh, never reused identifier.
    #[inline]
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner value.
    #[inline]
    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Resolved form of a task's script reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptRef {
    /// A file-like unit, loaded and run directly.
    File(String),
    /// A module name, resolved through the host's module system.
    Module(String),
}

impl ScriptRef {
    /// Classify `script` by its suffix: a name ending in `.{extension}` is a
    /// file, anything else is a module.
    pub fn parse(
        script: &str,
        extension: &str,
    ) -> Self {
        let extension = extension.trim_start_matches('.');
        let is_file = !extension.is_empty()
            && script
                .strip_suffix(extension)
                .is_some_and(|stem| stem.len() > 1 && stem.ends_with('.'));

        if is_file {
            ScriptRef::File(script.to_string())
        } else {
            ScriptRef::Module(script.to_string())
        }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        match self {
            ScriptRef::File(path) => path,
            ScriptRef::Module(name) => name,
        }
    }

    #[inline]
    pub fn is_file(&self) -> bool {
        matches!(self, ScriptRef::File(_))
    }
}

impl fmt::Display for ScriptRef {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            ScriptRef::File(path) => write!(f, "file:{}", path),
            ScriptRef::Module(name) => write!(f, "module:{}", name),
        }
    }
}

/// Environment carried by a task into whichever host instance runs it.
///
/// Clones share state, so a script writing into its context is visible to
/// the submitter once the task's completion flag flips.
#[derive(Clone)]
pub struct ExecutionContext {
    name: Arc<str>,
    state: Arc<RwLock<Map<String, Value>>>,
}

impl ExecutionContext {
    /// Create an empty context.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(RwLock::new(Map::new())),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(
        &self,
        key: &str,
    ) -> Option<Value> {
        self.state.read().get(key).cloned()
    }

    /// Insert a value, returning the previous one.
    pub fn set(
        &self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Option<Value> {
        self.state.write().insert(key.into(), value.into())
    }

    pub fn remove(
        &self,
        key: &str,
    ) -> Option<Value> {
        self.state.write().remove(key)
    }

    pub fn contains(
        &self,
        key: &str,
    ) -> bool {
        self.state.read().contains_key(key)
    }

    /// Point-in-time copy of the state.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.state.read().clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().is_empty()
    }

    /// Whether both contexts point at the same state.
    #[inline]
    pub fn shares_state_with(
        &self,
        other: &ExecutionContext,
    ) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("name", &self.name)
            .field("entries", &self.len())
            .finish()
    }
}

/// Opaque handle to a running node, as seen by the script.
///
/// Exposes only identity and completion state.
#[derive(Debug, Clone)]
pub struct NodeHandle {
    id: TaskId,
    completion: Completion,
}

impl NodeHandle {
    /// Type tag carried by the handle across the script boundary.
    pub const TAG: &'static str = "task.fifo.node";

    #[inline]
    pub fn tag(&self) -> &'static str {
        Self::TAG
    }

    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.completion.is_done()
    }
}

/// Submitter-side handle returned by [`Scheduler::start`](super::Scheduler::start).
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: TaskId,
    script: Arc<str>,
    created_at: DateTime<Utc>,
    completion: Completion,
}

impl TaskHandle {
    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    #[inline]
    pub fn script(&self) -> &str {
        &self.script
    }

    #[inline]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Non-blocking completion check.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.completion.is_done()
    }

    /// Block until the task has finished.
    pub fn wait(&self) {
        self.completion.wait();
    }

    /// Block for at most `timeout`. Returns whether the task finished.
    pub fn wait_timeout(
        &self,
        timeout: Duration,
    ) -> bool {
        self.completion.wait_timeout(timeout)
    }

    /// Resolve once the task has finished.
    pub async fn finished(&self) {
        self.completion.done().await
    }

    #[inline]
    pub fn completion(&self) -> &Completion {
        &self.completion
    }
}

/// How a node's execution ended, from the worker's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The entry point ran and returned normally.
    Completed,
    /// Resolution, decoding or the script itself failed; reported on the diagnostic channel.
    ScriptFailed,
}

/// One unit of queued work.
#[derive(Debug, Clone)]
pub struct TaskNode {
    id: TaskId,
    script: Arc<str>,
    params: Arc<str>,
    release: bool,
    created_at: DateTime<Utc>,
    context: ExecutionContext,
    completion: Completion,
}

impl TaskNode {
    /// Create a node with a fresh id, timestamp and unset completion.
    pub fn new(
        script: &str,
        params: &str,
        release: bool,
        context: ExecutionContext,
    ) -> Self {
        Self {
            id: TaskId::generate(),
            script: Arc::from(script),
            params: Arc::from(params),
            release,
            created_at: Utc::now(),
            context,
            completion: Completion::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    #[inline]
    pub fn script(&self) -> &str {
        &self.script
    }

    #[inline]
    pub fn params(&self) -> &str {
        &self.params
    }

    #[inline]
    pub fn release(&self) -> bool {
        self.release
    }

    #[inline]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[inline]
    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.completion.is_done()
    }

    /// Handle for the submitter.
    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            id: self.id,
            script: self.script.clone(),
            created_at: self.created_at,
            completion: self.completion.clone(),
        }
    }

    /// Handle for the script.
    pub fn node_handle(&self) -> NodeHandle {
        NodeHandle {
            id: self.id,
            completion: self.completion.clone(),
        }
    }

    /// JSON snapshot recorded in the running registry.
    pub fn describe(&self) -> String {
        json!({
            "id": self.id,
            "script": &*self.script,
            "release": self.release,
            "created_at": self.created_at.timestamp_micros(),
        })
        .to_string()
    }

    /// Flip the completion flag. Only the executing worker calls this.
    #[inline]
    pub(crate) fn finish(&self) -> bool {
        self.completion.complete()
    }

    /// Run the node on an instance acquired from `host`.
    ///
    /// Script-level failures are reported on the diagnostic channel and folded
    /// into [`ExecutionOutcome::ScriptFailed`]. Only failing to acquire an
    /// instance is returned as an error. The completion flag is left to the
    /// caller.
    pub(crate) fn execute<H: ScriptHost>(
        &self,
        host: &H,
        config: &ConcurrencyConfig,
    ) -> Result<ExecutionOutcome, HostError> {
        let mut instance = host.acquire(self.release)?;
        instance.bind(&self.context);

        if let Err(err) = instance.ensure_module_loaded(&config.core_module) {
            error!(target: DIAGNOSTIC_TARGET, task = %self.id, "{}", err);
        }

        let outcome = match self.invoke(&mut instance, config) {
            Ok(()) => ExecutionOutcome::Completed,
            Err(err) => {
                error!(
                    target: DIAGNOSTIC_TARGET,
                    task = %self.id,
                    script = %self.script,
                    "{}",
                    err
                );
                ExecutionOutcome::ScriptFailed
            }
        };

        if self.release {
            instance.release();
        } else {
            instance.collect();
        }

        Ok(outcome)
    }

    fn invoke<I: HostInstance>(
        &self,
        instance: &mut I,
        config: &ConcurrencyConfig,
    ) -> Result<(), ScriptError> {
        let entry = match ScriptRef::parse(&self.script, &config.script_extension) {
            ScriptRef::File(path) => instance.run_file(&path)?,
            ScriptRef::Module(name) => instance.run_module(&name)?,
        };
        let node = instance.wrap_handle(self.node_handle());
        let params = instance.decode_params(&self.params)?;
        instance.invoke(entry, node, params)
    }
}
