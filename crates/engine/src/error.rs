//! Engine-level error types.

use thiserror::Error;

use crate::state::TaskStatus;

/// Errors produced by the engine (document parsing, graph validation,
/// state bookkeeping and execution).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Document / validation errors ------

    /// The workflow document could not be parsed.
    #[error("invalid workflow document: {0}")]
    InvalidDocument(String),

    /// A task has an empty ID.
    #[error("task at position {index} has an empty ID")]
    EmptyTaskId { index: usize },

    /// Two or more tasks share the same ID.
    #[error("duplicate task ID: '{0}'")]
    DuplicateTaskId(String),

    /// `inputFrom` or `depends` names a task that isn't in the workflow.
    #[error("task '{task}' has unknown dependency '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    /// The dependency relation is not acyclic; `task` lies on the cycle.
    #[error("dependency cycle detected involving task '{task}'")]
    CycleDetected { task: String },

    // ------ Run-level errors ------

    /// `execute` was called while another run is in progress.
    #[error("execution already running")]
    AlreadyRunning,

    /// The run was stopped or its caller cancelled it.
    #[error("execution cancelled")]
    Cancelled,

    /// The run's timeout expired before the planned order finished.
    #[error("execution deadline exceeded")]
    DeadlineExceeded,

    /// The planned order finished but not every task completed.
    /// Inspect the summary for per-task detail.
    #[error("completed with errors: {completed}/{total}")]
    CompletedWithErrors { completed: usize, total: usize },

    // ------ State store errors ------

    #[error("unknown task '{0}'")]
    TaskNotFound(String),

    #[error("task '{task}' has no value for key '{key}'")]
    KeyNotFound { task: String, key: String },

    #[error("task '{task}' cannot move from {from} to {to}")]
    InvalidTransition {
        task: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// A write from a run that a newer run has since replaced.
    #[error("execution {execution_id} was superseded by a newer run")]
    Superseded { execution_id: uuid::Uuid },

    #[error("invalid value for key '{key}' of task '{task}': {reason}")]
    InvalidValue {
        task: String,
        key: String,
        reason: String,
    },

    // ------ Wrapped errors ------

    #[error("store error: {0}")]
    Store(#[from] store::StoreError),

    #[error("runtime error: {0}")]
    Runtime(#[from] runtime::RuntimeError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<runtime::Done> for EngineError {
    fn from(done: runtime::Done) -> Self {
        match done {
            runtime::Done::Cancelled => Self::Cancelled,
            runtime::Done::DeadlineExceeded => Self::DeadlineExceeded,
        }
    }
}

impl EngineError {
    /// True for the two ways a run can end early: stop/cancel and timeout.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}
