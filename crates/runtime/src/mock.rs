//! `MockRuntime` — a test double for `Runtime`.
//!
//! Behaviour is scripted per task ID; tasks without a script return an
//! empty object. Every call is recorded with the inputs it received.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::{ExecutionContext, Payload, Runtime, RuntimeError, TaskSpec};

/// Behaviour injected into `MockRuntime` for one task.
#[derive(Debug, Clone)]
pub enum MockBehaviour {
    /// Return a specific JSON value (must be an object to be valid output).
    ReturnValue(Value),
    /// Fail with the given message.
    Fail(String),
    /// Cancel the given token, then return the value. Simulates a caller
    /// stopping the run while this task is in flight.
    CancelThenReturn(CancellationToken, Value),
    /// Block until the gate is opened, then return the value. Ignores
    /// cancellation, like a runtime that does not honour its context.
    WaitFor(Arc<Notify>, Value),
    /// Sleep, ignoring cancellation, then return the value.
    Sleep(Duration, Value),
}

/// A single recorded invocation.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub task_id: String,
    pub inputs: Payload,
}

#[derive(Debug, Clone, Default)]
pub struct MockRuntime {
    behaviours: Arc<Mutex<HashMap<String, MockBehaviour>>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
    cleanups: Arc<Mutex<usize>>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script `task_id` with an arbitrary behaviour.
    pub fn with(self, task_id: impl Into<String>, behaviour: MockBehaviour) -> Self {
        self.behaviours.lock().unwrap().insert(task_id.into(), behaviour);
        self
    }

    /// Script `task_id` to succeed with `value`.
    pub fn returning(self, task_id: impl Into<String>, value: Value) -> Self {
        self.with(task_id, MockBehaviour::ReturnValue(value))
    }

    /// Script `task_id` to fail with `msg`.
    pub fn failing(self, task_id: impl Into<String>, msg: impl Into<String>) -> Self {
        self.with(task_id, MockBehaviour::Fail(msg.into()))
    }

    /// All calls in the order they happened.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Task IDs in call order.
    pub fn call_order(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.task_id).collect()
    }

    /// Number of times `task_id` has been executed.
    pub fn call_count(&self, task_id: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.task_id == task_id).count()
    }

    /// Inputs from the most recent call of `task_id`.
    pub fn last_inputs(&self, task_id: &str) -> Option<Payload> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|c| c.task_id == task_id)
            .map(|c| c.inputs.clone())
    }

    /// How many times `cleanup` has run.
    pub fn cleanup_count(&self) -> usize {
        *self.cleanups.lock().unwrap()
    }
}

fn into_output(value: &Value) -> Result<Payload, RuntimeError> {
    value
        .as_object()
        .cloned()
        .ok_or_else(|| RuntimeError::InvalidOutput(format!("mock value is not an object: {value}")))
}

#[async_trait]
impl Runtime for MockRuntime {
    async fn execute(
        &self,
        _ctx: &ExecutionContext,
        task: &TaskSpec,
        inputs: Payload,
    ) -> Result<Payload, RuntimeError> {
        self.calls.lock().unwrap().push(MockCall {
            task_id: task.id.clone(),
            inputs,
        });

        let behaviour = self.behaviours.lock().unwrap().get(&task.id).cloned();
        match behaviour {
            None => Ok(Payload::new()),
            Some(MockBehaviour::ReturnValue(v)) => into_output(&v),
            Some(MockBehaviour::Fail(msg)) => Err(RuntimeError::Failed(msg)),
            Some(MockBehaviour::CancelThenReturn(token, v)) => {
                token.cancel();
                into_output(&v)
            }
            Some(MockBehaviour::WaitFor(gate, v)) => {
                gate.notified().await;
                into_output(&v)
            }
            Some(MockBehaviour::Sleep(delay, v)) => {
                tokio::time::sleep(delay).await;
                into_output(&v)
            }
        }
    }

    async fn cleanup(&self) -> Result<(), RuntimeError> {
        *self.cleanups.lock().unwrap() += 1;
        Ok(())
    }
}
