//! `ProcessRuntime` — runs each task as a shell command.
//!
//! The task's `uses` string is handed to `sh -c` (`cmd /C` on Windows). The
//! child receives `{"task": <id>, "params": {...}, "inputs": {...}}` as JSON
//! on stdin and must print a JSON object on stdout; empty stdout means an
//! empty output object. A non-zero exit status fails the task with the
//! child's stderr as the message. Cancelling the run kills the child.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::{ExecutionContext, Payload, Runtime, RuntimeError, TaskSpec};

#[derive(Debug, Clone, Default)]
pub struct ProcessRuntime {
    /// Working directory for spawned commands; the current directory if unset.
    pub working_dir: Option<PathBuf>,
}

impl ProcessRuntime {
    pub const NAME: &'static str = "process";

    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: Some(dir.into()),
        }
    }

    fn command(&self, line: &str) -> tokio::process::Command {
        let mut cmd = if cfg!(windows) {
            let mut c = tokio::process::Command::new("cmd");
            c.arg("/C").arg(line);
            c
        } else {
            let mut c = tokio::process::Command::new("sh");
            c.arg("-c").arg(line);
            c
        };
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Runtime for ProcessRuntime {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        task: &TaskSpec,
        inputs: Payload,
    ) -> Result<Payload, RuntimeError> {
        if task.uses.trim().is_empty() {
            return Err(RuntimeError::Failed(format!(
                "task '{}' has no command in 'uses'",
                task.id
            )));
        }

        let request = serde_json::to_vec(&json!({
            "task": task.id,
            "params": task.params,
            "inputs": inputs,
        }))?;

        debug!(task_id = %task.id, command = %task.uses, "spawning task process");
        let mut child = self.command(&task.uses).spawn()?;

        // Feed stdin while draining stdout/stderr: a filter like `cat` stops
        // reading once its stdout pipe is full, so writing first can deadlock.
        let stdin = child.stdin.take();
        let task_id = task.id.as_str();
        let exchange = async move {
            let feed = async {
                if let Some(mut stdin) = stdin {
                    // A child that never reads stdin closes the pipe early;
                    // that is its business, not a task failure.
                    if let Err(e) = stdin.write_all(&request).await {
                        debug!(task_id, error = %e, "child closed stdin early");
                    }
                }
            };
            let ((), output) = tokio::join!(feed, child.wait_with_output());
            output
        };

        // Dropping `exchange` drops the child, and `kill_on_drop` ends it.
        let output = tokio::select! {
            out = exchange => out?,
            _ = ctx.cancelled() => {
                warn!(task_id = %task.id, "run cancelled, killing task process");
                return Err(RuntimeError::Cancelled);
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            let msg = if stderr.is_empty() { stdout } else { stderr };
            return Err(RuntimeError::Failed(format!(
                "exit code {}: {}",
                output.status.code().unwrap_or(-1),
                msg
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Ok(Payload::new());
        }
        match serde_json::from_str::<Value>(&stdout)? {
            Value::Object(map) => Ok(map),
            other => Err(RuntimeError::InvalidOutput(format!(
                "expected a JSON object on stdout, got {}",
                json_kind(&other)
            ))),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
