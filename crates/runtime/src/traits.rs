//! The `Runtime` trait — the contract every task executor must fulfil.

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{Payload, RuntimeError, TaskSpec};

/// Why a run's context is no longer live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Done {
    Cancelled,
    DeadlineExceeded,
}

/// Shared context passed to every runtime call during one run.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Name of the workflow being executed.
    pub workflow_name: String,
    /// ID of the current run.
    pub execution_id: Uuid,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl ExecutionContext {
    pub fn new(
        workflow_name: impl Into<String>,
        execution_id: Uuid,
        cancel: CancellationToken,
        deadline: Option<Instant>,
    ) -> Self {
        Self {
            workflow_name: workflow_name.into(),
            execution_id,
            cancel,
            deadline,
        }
    }

    /// Token cancelled when the run is stopped or its deadline passes.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// `None` while the run may continue; otherwise the reason it may not.
    ///
    /// An expired deadline wins over a plain cancellation so that a timeout
    /// is reported as such even after the timer has cancelled the token.
    pub fn done(&self) -> Option<Done> {
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Some(Done::DeadlineExceeded);
        }
        if self.cancel.is_cancelled() {
            return Some(Done::Cancelled);
        }
        None
    }

    /// Resolves once the run is cancelled (including by deadline).
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

/// A pluggable task executor.
///
/// Implementations may run work in-process, in a subprocess, or remotely.
/// The engine treats `execute` as an opaque, possibly blocking call; it
/// should return promptly once [`ExecutionContext::cancelled`] resolves, but
/// the engine does not rely on it.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Execute `task` with its fully resolved `inputs` and return its outputs.
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        task: &TaskSpec,
        inputs: Payload,
    ) -> Result<Payload, RuntimeError>;

    /// Release runtime-held resources. Called once when the engine shuts down.
    async fn cleanup(&self) -> Result<(), RuntimeError> {
        Ok(())
    }
}
