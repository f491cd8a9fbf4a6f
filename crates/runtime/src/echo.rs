//! `EchoRuntime` — in-process runtime that hands its inputs straight back.
//!
//! Handy for dry runs: the recorded outputs show exactly what each task
//! would have received.

use async_trait::async_trait;
use tracing::debug;

use crate::{ExecutionContext, Payload, Runtime, RuntimeError, TaskSpec};

#[derive(Debug, Clone, Copy, Default)]
pub struct EchoRuntime;

impl EchoRuntime {
    pub const NAME: &'static str = "echo";
}

#[async_trait]
impl Runtime for EchoRuntime {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        task: &TaskSpec,
        inputs: Payload,
    ) -> Result<Payload, RuntimeError> {
        if ctx.done().is_some() {
            return Err(RuntimeError::Cancelled);
        }
        debug!(task_id = %task.id, uses = %task.uses, keys = inputs.len(), "echoing inputs");
        Ok(inputs)
    }
}
