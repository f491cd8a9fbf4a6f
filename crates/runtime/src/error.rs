//! Runtime-level error type.

use thiserror::Error;

/// Errors returned by a runtime or by the registry that builds runtimes.
///
/// Retry policy, if any, belongs inside the runtime; the engine records any
/// `Err` from [`crate::Runtime::execute`] as a failed task and moves on.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The task ran and reported failure.
    #[error("task failed: {0}")]
    Failed(String),

    /// The run was cancelled while the task was executing.
    #[error("task cancelled")]
    Cancelled,

    /// The task produced something other than a JSON object.
    #[error("invalid task output: {0}")]
    InvalidOutput(String),

    /// The registry has no factory for the requested runtime name.
    #[error("unknown runtime '{name}' (registered: {known})")]
    UnknownRuntime { name: String, known: String },

    /// No runtime was named and the registry has no default.
    #[error("no runtime selected and the registry has no default")]
    NoDefault,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
