//! Host errors

use thiserror::Error;

/// Script result
pub type ScriptResult<T> = Result<T, ScriptError>;

/// Failures raised while resolving or running a script.
///
/// These never leave the worker: they are written to the diagnostic channel
/// and the task is still marked finished.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("script file not found: {0}")]
    FileNotFound(String),

    #[error("module not found: {0}")]
    ModuleNotFound(String),

    #[error("invalid params: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("script error: {0:#}")]
    Raised(anyhow::Error),

    #[error("script panicked: {0}")]
    Panic(String),
}

/// Failures of the host itself. Fatal to the worker that hit them.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("no execution instance available (limit {limit})")]
    Exhausted { limit: usize },
}
