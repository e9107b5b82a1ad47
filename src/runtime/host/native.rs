//! Native script host
//!
//! Registers Rust closures as script units so tasks can run without an
//! embedded interpreter. Files are looked up by path and re-run on every
//! call; modules are looked up by name and cached per instance, the way a
//! `require` would. Instances acquired with `release == false` go back to a
//! warm pool after their collection pass.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::trace;

use super::errors::{HostError, ScriptError, ScriptResult};
use super::{panic_message, HostInstance, ScriptHost};
use crate::runtime::scheduler::{ExecutionContext, NodeHandle};
use crate::util::config::DEFAULT_CORE_MODULE;

/// Arguments passed to a native script entry point.
#[derive(Debug)]
pub struct ScriptCall {
    /// Handle of the task being executed.
    pub node: NodeHandle,
    /// Decoded parameters (`Value::Null` when none were given).
    pub params: Value,
    /// Context bound into the instance for this task.
    pub context: ExecutionContext,
}

/// Native script entry point.
pub type NativeScript = dyn Fn(ScriptCall) -> anyhow::Result<()> + Send + Sync;

/// Values crossing into a native script.
#[derive(Debug, Clone)]
pub enum NativeValue {
    Handle(NodeHandle),
    Data(Value),
}

/// Process-wide native host.
static NATIVE_HOST: Lazy<NativeHost> = Lazy::new(NativeHost::new);

struct HostInner {
    files: RwLock<HashMap<String, Arc<NativeScript>>>,
    modules: RwLock<HashMap<String, Arc<NativeScript>>>,
    /// Modules that load without an entry point (capability modules).
    builtins: RwLock<HashSet<String>>,
    pool: Mutex<Vec<InstanceState>>,
    instance_limit: Option<usize>,
    next_instance: AtomicUsize,
    live: AtomicUsize,
    created: AtomicUsize,
    released: AtomicUsize,
    collected: AtomicUsize,
}

impl HostInner {
    fn fresh_state(&self) -> Result<InstanceState, HostError> {
        if let Some(limit) = self.instance_limit {
            let mut live = self.live.load(Ordering::SeqCst);
            loop {
                if live >= limit {
                    return Err(HostError::Exhausted { limit });
                }
                match self.live.compare_exchange_weak(
                    live,
                    live + 1,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                ) {
                    Ok(_) => break,
                    Err(actual) => live = actual,
                }
            }
        } else {
            self.live.fetch_add(1, Ordering::SeqCst);
        }

        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(InstanceState {
            id: self.next_instance.fetch_add(1, Ordering::SeqCst),
            loaded: HashSet::new(),
            cache: HashMap::new(),
            runs: 0,
        })
    }
}

/// Host whose scripts are registered Rust closures.
#[derive(Clone)]
pub struct NativeHost {
    inner: Arc<HostInner>,
}

impl NativeHost {
    /// Create a host with no instance limit.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create a host that keeps at most `limit` instances alive.
    pub fn with_instance_limit(limit: usize) -> Self {
        Self::build(Some(limit))
    }

    fn build(instance_limit: Option<usize>) -> Self {
        let host = Self {
            inner: Arc::new(HostInner {
                files: RwLock::new(HashMap::new()),
                modules: RwLock::new(HashMap::new()),
                builtins: RwLock::new(HashSet::new()),
                pool: Mutex::new(Vec::new()),
                instance_limit,
                next_instance: AtomicUsize::new(0),
                live: AtomicUsize::new(0),
                created: AtomicUsize::new(0),
                released: AtomicUsize::new(0),
                collected: AtomicUsize::new(0),
            }),
        };
        host.register_builtin(DEFAULT_CORE_MODULE);
        host
    }

    /// The process-wide host used by `Scheduler::global`.
    pub fn global() -> &'static NativeHost {
        &NATIVE_HOST
    }

    /// Register a file-like unit under `path`.
    pub fn register_file<F>(
        &self,
        path: impl Into<String>,
        script: F,
    ) where
        F: Fn(ScriptCall) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.files.write().insert(path.into(), Arc::new(script));
    }

    /// Register a module under `name`.
    pub fn register_module<F>(
        &self,
        name: impl Into<String>,
        script: F,
    ) where
        F: Fn(ScriptCall) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner
            .modules
            .write()
            .insert(name.into(), Arc::new(script));
    }

    /// Register a module that only needs to be loadable.
    pub fn register_builtin(
        &self,
        name: impl Into<String>,
    ) {
        self.inner.builtins.write().insert(name.into());
    }

    pub fn has_file(
        &self,
        path: &str,
    ) -> bool {
        self.inner.files.read().contains_key(path)
    }

    pub fn has_module(
        &self,
        name: &str,
    ) -> bool {
        self.inner.modules.read().contains_key(name) || self.inner.builtins.read().contains(name)
    }

    /// Instances created since the host was built.
    pub fn instances_created(&self) -> usize {
        self.inner.created.load(Ordering::SeqCst)
    }

    /// Instances torn down after a `release == true` task.
    pub fn instances_released(&self) -> usize {
        self.inner.released.load(Ordering::SeqCst)
    }

    /// Collection passes run on warm instances.
    pub fn instances_collected(&self) -> usize {
        self.inner.collected.load(Ordering::SeqCst)
    }

    /// Instances currently alive, in use or pooled.
    pub fn live_instances(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Warm instances waiting in the pool.
    pub fn pooled(&self) -> usize {
        self.inner.pool.lock().len()
    }
}

impl Default for NativeHost {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NativeHost {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("NativeHost")
            .field("files", &self.inner.files.read().len())
            .field("modules", &self.inner.modules.read().len())
            .field("live", &self.live_instances())
            .field("pooled", &self.pooled())
            .finish()
    }
}

impl ScriptHost for NativeHost {
    type Instance = NativeInstance;

    fn acquire(
        &self,
        release: bool,
    ) -> Result<NativeInstance, HostError> {
        let pooled = if release {
            None
        } else {
            self.inner.pool.lock().pop()
        };

        let state = match pooled {
            Some(state) => state,
            None => self.inner.fresh_state()?,
        };
        trace!(instance = state.id, release, "acquired instance");

        Ok(NativeInstance {
            host: self.inner.clone(),
            state,
            context: None,
        })
    }
}

/// Per-instance state that survives while the instance is pooled.
struct InstanceState {
    id: usize,
    loaded: HashSet<String>,
    cache: HashMap<String, Arc<NativeScript>>,
    runs: usize,
}

/// An instance of [`NativeHost`].
pub struct NativeInstance {
    host: Arc<HostInner>,
    state: InstanceState,
    context: Option<ExecutionContext>,
}

impl NativeInstance {
    #[inline]
    pub fn id(&self) -> usize {
        self.state.id
    }

    /// Entry points invoked on this instance over its lifetime.
    #[inline]
    pub fn runs(&self) -> usize {
        self.state.runs
    }

    pub fn is_loaded(
        &self,
        name: &str,
    ) -> bool {
        self.state.loaded.contains(name)
    }

    #[inline]
    pub fn context(&self) -> Option<&ExecutionContext> {
        self.context.as_ref()
    }
}

impl fmt::Debug for NativeInstance {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("NativeInstance")
            .field("id", &self.state.id)
            .field("loaded", &self.state.loaded)
            .field("runs", &self.state.runs)
            .field("context", &self.context)
            .finish()
    }
}

impl HostInstance for NativeInstance {
    type Entry = Arc<NativeScript>;
    type Value = NativeValue;

    fn bind(
        &mut self,
        context: &ExecutionContext,
    ) {
        self.context = Some(context.clone());
    }

    fn ensure_module_loaded(
        &mut self,
        name: &str,
    ) -> ScriptResult<()> {
        if self.state.loaded.contains(name) {
            return Ok(());
        }
        if self.host.builtins.read().contains(name) {
            self.state.loaded.insert(name.to_string());
            return Ok(());
        }
        self.run_module(name).map(|_| ())
    }

    fn run_file(
        &mut self,
        path: &str,
    ) -> ScriptResult<Self::Entry> {
        self.host
            .files
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| ScriptError::FileNotFound(path.to_string()))
    }

    fn run_module(
        &mut self,
        name: &str,
    ) -> ScriptResult<Self::Entry> {
        if let Some(entry) = self.state.cache.get(name) {
            return Ok(entry.clone());
        }

        let entry = self
            .host
            .modules
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ScriptError::ModuleNotFound(name.to_string()))?;
        self.state.cache.insert(name.to_string(), entry.clone());
        self.state.loaded.insert(name.to_string());
        Ok(entry)
    }

    fn wrap_handle(
        &mut self,
        node: NodeHandle,
    ) -> NativeValue {
        NativeValue::Handle(node)
    }

    fn decode_params(
        &mut self,
        params: &str,
    ) -> ScriptResult<NativeValue> {
        if params.trim().is_empty() {
            return Ok(NativeValue::Data(Value::Null));
        }
        Ok(NativeValue::Data(serde_json::from_str(params)?))
    }

    fn invoke(
        &mut self,
        entry: Self::Entry,
        node: NativeValue,
        params: NativeValue,
    ) -> ScriptResult<()> {
        let NativeValue::Handle(node) = node else {
            return Err(ScriptError::InvalidArgument(
                "first argument must be a task node handle".to_string(),
            ));
        };
        let NativeValue::Data(params) = params else {
            return Err(ScriptError::InvalidArgument(
                "params must be plain data".to_string(),
            ));
        };

        let context = self
            .context
            .clone()
            .unwrap_or_else(|| ExecutionContext::new("unbound"));
        self.state.runs += 1;

        let call = ScriptCall {
            node,
            params,
            context,
        };
        match panic::catch_unwind(AssertUnwindSafe(|| entry(call))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(ScriptError::Raised(err)),
            Err(payload) => Err(ScriptError::Panic(panic_message(payload.as_ref()))),
        }
    }

    fn release(self) {
        self.host.released.fetch_add(1, Ordering::SeqCst);
        self.host.live.fetch_sub(1, Ordering::SeqCst);
        trace!(instance = self.state.id, "released instance");
    }

    fn collect(mut self) {
        self.context = None;
        self.host.collected.fetch_add(1, Ordering::SeqCst);
        trace!(instance = self.state.id, "collected instance");
        self.host.pool.lock().push(self.state);
    }
}
