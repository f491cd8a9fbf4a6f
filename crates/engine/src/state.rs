//! Execution state store.
//!
//! Holds one [`TaskState`] per task for the current run and writes every
//! change through to an injected [`KeyValueStore`]. All mutations take the
//! store's write lock for the whole read-modify-write-persist sequence, so
//! the engine and any concurrent reader (a status poller, an exporter) always
//! see whole updates.
//!
//! Persisted layout:
//! - `execution`  → [`RunMeta`] as JSON
//! - `task/<id>`  → [`TaskState`] as JSON

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use store::{KeyValueStore, StoreError};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use runtime::Payload;

use crate::EngineError;

const META_KEY: &str = "execution";
const TASK_PREFIX: &str = "task/";

/// Key under which a task's resolved inputs are stored.
pub const INPUT_KEY: &str = "input";
/// Key under which a task's outputs are stored.
pub const OUTPUT_KEY: &str = "output";

/// Keys `get_all` reports that `set` may not write.
const RESERVED_KEYS: [&str; 5] = ["id", "status", "error_message", "start_time", "end_time"];

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// A dependency's output could not be obtained; the runtime never ran.
    Blocked,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Blocked)
    }

    /// Whether a task may move from `self` to `next` within one run.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Blocked)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Blocked)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending"   => Ok(Self::Pending),
            "running"   => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed"    => Ok(Self::Failed),
            "blocked"   => Ok(Self::Blocked),
            other       => Err(format!("unknown task status: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// TaskState
// ---------------------------------------------------------------------------

/// Everything recorded about one task during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub id: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub inputs: Payload,
    #[serde(default)]
    pub outputs: Payload,
    /// Free-form keys written through [`ExecutionStateStore::set`].
    #[serde(default, skip_serializing_if = "Payload::is_empty")]
    pub metadata: Payload,
}

impl TaskState {
    pub fn pending(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: TaskStatus::Pending,
            error_message: None,
            start_time: None,
            end_time: None,
            inputs: Payload::new(),
            outputs: Payload::new(),
            metadata: Payload::new(),
        }
    }

    /// Flatten into the map shape returned by `get_all`.
    fn to_map(&self) -> Payload {
        let mut map = Payload::new();
        map.insert("id".into(), Value::String(self.id.clone()));
        map.insert("status".into(), Value::String(self.status.to_string()));
        if let Some(msg) = &self.error_message {
            map.insert("error_message".into(), Value::String(msg.clone()));
        }
        if let Some(t) = self.start_time {
            map.insert("start_time".into(), Value::String(t.to_rfc3339()));
        }
        if let Some(t) = self.end_time {
            map.insert("end_time".into(), Value::String(t.to_rfc3339()));
        }
        map.insert(INPUT_KEY.into(), Value::Object(self.inputs.clone()));
        map.insert(OUTPUT_KEY.into(), Value::Object(self.outputs.clone()));
        for (k, v) in &self.metadata {
            map.insert(k.clone(), v.clone());
        }
        map
    }
}

// ---------------------------------------------------------------------------
// ExecutionSummary
// ---------------------------------------------------------------------------

/// Read-only snapshot of a run, computed on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub workflow_name: String,
    /// `None` until the first run starts.
    pub execution_id: Option<Uuid>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub total_tasks: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub blocked_count: usize,
    pub pending_count: usize,
    pub running_count: usize,
    /// Per-task state in execution order.
    pub tasks: IndexMap<String, TaskState>,
}

impl ExecutionSummary {
    /// Every task completed.
    pub fn is_success(&self) -> bool {
        self.completed_count == self.total_tasks
    }
}

// ---------------------------------------------------------------------------
// RunMeta
// ---------------------------------------------------------------------------

/// Run-level bookkeeping persisted next to the task states.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMeta {
    pub workflow_name: String,
    pub execution_id: Option<Uuid>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Task IDs in execution order, so a restored store lists them the same way.
    #[serde(default)]
    pub task_order: Vec<String>,
}

#[derive(Debug, Default)]
struct Inner {
    meta: RunMeta,
    tasks: IndexMap<String, TaskState>,
}

// ---------------------------------------------------------------------------
// ExecutionStateStore
// ---------------------------------------------------------------------------

pub struct ExecutionStateStore {
    inner: RwLock<Inner>,
    kv: Arc<dyn KeyValueStore>,
}

impl fmt::Debug for ExecutionStateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionStateStore").finish_non_exhaustive()
    }
}

impl ExecutionStateStore {
    /// An empty store for `workflow_name` backed by `kv`.
    pub fn new(workflow_name: impl Into<String>, kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                meta: RunMeta {
                    workflow_name: workflow_name.into(),
                    ..RunMeta::default()
                },
                tasks: IndexMap::new(),
            }),
            kv,
        }
    }

    /// Rebuild a store from whatever a previous run persisted in `kv`.
    pub async fn restore(kv: Arc<dyn KeyValueStore>) -> Result<Self, EngineError> {
        let meta: RunMeta = match kv.load(META_KEY).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(StoreError::NotFound(_)) => RunMeta::default(),
            Err(e) => return Err(e.into()),
        };

        let mut loaded: IndexMap<String, TaskState> = IndexMap::new();
        for key in kv.list().await? {
            if !key.starts_with(TASK_PREFIX) {
                continue;
            }
            let state: TaskState = serde_json::from_slice(&kv.load(&key).await?)?;
            loaded.insert(state.id.clone(), state);
        }

        // Known order first, then anything the metadata doesn't mention.
        let mut tasks: IndexMap<String, TaskState> = IndexMap::with_capacity(loaded.len());
        for id in &meta.task_order {
            if let Some(state) = loaded.shift_remove(id) {
                tasks.insert(id.clone(), state);
            }
        }
        tasks.extend(loaded);

        debug!(workflow = %meta.workflow_name, tasks = tasks.len(), "restored execution state");
        Ok(Self {
            inner: RwLock::new(Inner { meta, tasks }),
            kv,
        })
    }

    /// Reset the store to one `Pending` state per ID, dropping anything from
    /// an earlier run. Called once at the start of every run.
    pub async fn initialize_tasks(&self, ids: &[String]) -> Result<(), EngineError> {
        let mut inner = self.inner.write().await;

        for key in self.kv.list().await? {
            if let Some(id) = key.strip_prefix(TASK_PREFIX) {
                if !ids.iter().any(|i| i == id) {
                    self.kv.delete(&key).await?;
                }
            }
        }

        let mut tasks = IndexMap::with_capacity(ids.len());
        for id in ids {
            let state = TaskState::pending(id.clone());
            self.persist_task(&state).await?;
            tasks.insert(id.clone(), state);
        }

        let meta = RunMeta {
            workflow_name: inner.meta.workflow_name.clone(),
            task_order: ids.to_vec(),
            ..RunMeta::default()
        };
        self.persist_meta(&meta).await?;

        inner.meta = meta;
        inner.tasks = tasks;
        Ok(())
    }

    /// Stamp the run's ID and start time.
    pub async fn begin_run(&self, execution_id: Uuid) -> Result<(), EngineError> {
        let mut inner = self.inner.write().await;
        let mut meta = inner.meta.clone();
        meta.execution_id = Some(execution_id);
        meta.start_time = Some(Utc::now());
        meta.end_time = None;
        self.persist_meta(&meta).await?;
        inner.meta = meta;
        Ok(())
    }

    /// Stamp the run's end time.
    pub async fn finish_run(&self) -> Result<(), EngineError> {
        self.stamp_end(None).await
    }

    /// A writer whose updates only land while `execution_id` is still the
    /// current run. Once a newer run has begun, every write through it fails
    /// with [`EngineError::Superseded`] and leaves the state untouched.
    pub fn run_writer(&self, execution_id: Uuid) -> RunWriter<'_> {
        RunWriter {
            store: self,
            execution_id,
        }
    }

    async fn stamp_end(&self, fence: Option<Uuid>) -> Result<(), EngineError> {
        let mut inner = self.inner.write().await;
        check_fence(&inner, fence)?;
        let mut meta = inner.meta.clone();
        meta.end_time = Some(Utc::now());
        self.persist_meta(&meta).await?;
        inner.meta = meta;
        Ok(())
    }

    /// Read one key of a task.
    ///
    /// `input` and `output` return the recorded JSON objects; `status` and
    /// `error_message` return strings; anything else is a free-form key.
    pub async fn get(&self, task_id: &str, key: &str) -> Result<Value, EngineError> {
        let inner = self.inner.read().await;
        let state = lookup(&inner, task_id)?;
        state
            .to_map()
            .remove(key)
            .ok_or_else(|| EngineError::KeyNotFound {
                task: task_id.to_owned(),
                key: key.to_owned(),
            })
    }

    /// Write one key of a task. `input` and `output` must be JSON objects.
    pub async fn set(&self, task_id: &str, key: &str, value: Value) -> Result<(), EngineError> {
        self.write_key(None, task_id, key, value).await
    }

    async fn write_key(&self, fence: Option<Uuid>, task_id: &str, key: &str, value: Value) -> Result<(), EngineError> {
        self.modify(fence, task_id, |state| {
            match key {
                INPUT_KEY | OUTPUT_KEY => {
                    let Value::Object(map) = value else {
                        return Err(EngineError::InvalidValue {
                            task: state.id.clone(),
                            key: key.to_owned(),
                            reason: "expected a JSON object".into(),
                        });
                    };
                    if key == INPUT_KEY {
                        state.inputs = map;
                    } else {
                        state.outputs = map;
                    }
                }
                k if RESERVED_KEYS.contains(&k) => {
                    return Err(EngineError::InvalidValue {
                        task: state.id.clone(),
                        key: key.to_owned(),
                        reason: "reserved key; use update_status / update_error_message".into(),
                    });
                }
                _ => {
                    state.metadata.insert(key.to_owned(), value);
                }
            }
            Ok(())
        })
        .await
    }

    /// Every key recorded for a task, as one JSON object.
    pub async fn get_all(&self, task_id: &str) -> Result<Payload, EngineError> {
        let inner = self.inner.read().await;
        Ok(lookup(&inner, task_id)?.to_map())
    }

    /// A copy of one task's state.
    pub async fn task_state(&self, task_id: &str) -> Result<TaskState, EngineError> {
        let inner = self.inner.read().await;
        lookup(&inner, task_id).cloned()
    }

    /// Move a task to `status`, stamping start/end times.
    ///
    /// Setting the current status again is a no-op; any other move outside
    /// `Pending → Running → {Completed, Failed, Blocked}` (or straight
    /// `Pending → Blocked`) is rejected.
    pub async fn update_status(&self, task_id: &str, status: TaskStatus) -> Result<(), EngineError> {
        self.transition(None, task_id, status).await
    }

    async fn transition(&self, fence: Option<Uuid>, task_id: &str, status: TaskStatus) -> Result<(), EngineError> {
        self.modify(fence, task_id, |state| {
            if state.status == status {
                return Ok(());
            }
            if !state.status.can_transition_to(status) {
                return Err(EngineError::InvalidTransition {
                    task: state.id.clone(),
                    from: state.status,
                    to: status,
                });
            }
            let now = Utc::now();
            if status == TaskStatus::Running {
                state.start_time = Some(now);
            }
            if status.is_terminal() {
                state.end_time = Some(now);
            }
            state.status = status;
            Ok(())
        })
        .await
    }

    pub async fn update_error_message(&self, task_id: &str, msg: impl Into<String>) -> Result<(), EngineError> {
        self.record_error(None, task_id, msg.into()).await
    }

    async fn record_error(&self, fence: Option<Uuid>, task_id: &str, msg: String) -> Result<(), EngineError> {
        self.modify(fence, task_id, |state| {
            state.error_message = Some(msg);
            Ok(())
        })
        .await
    }

    /// A consistent snapshot of the whole run.
    pub async fn summary(&self) -> ExecutionSummary {
        let inner = self.inner.read().await;
        let count = |s: TaskStatus| inner.tasks.values().filter(|t| t.status == s).count();

        ExecutionSummary {
            workflow_name: inner.meta.workflow_name.clone(),
            execution_id: inner.meta.execution_id,
            start_time: inner.meta.start_time,
            end_time: inner.meta.end_time,
            total_tasks: inner.tasks.len(),
            completed_count: count(TaskStatus::Completed),
            failed_count: count(TaskStatus::Failed),
            blocked_count: count(TaskStatus::Blocked),
            pending_count: count(TaskStatus::Pending),
            running_count: count(TaskStatus::Running),
            tasks: inner.tasks.clone(),
        }
    }

    /// Close the backing key-value store.
    pub async fn close(&self) -> Result<(), EngineError> {
        // Hold the write lock so no mutation is half-persisted when we close.
        let _guard = self.inner.write().await;
        self.kv.close().await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    /// Apply `f` to a copy of the task, persist the copy, then commit it.
    /// A failed persist leaves the in-memory state untouched.
    async fn modify<F>(&self, fence: Option<Uuid>, task_id: &str, f: F) -> Result<(), EngineError>
    where
        F: FnOnce(&mut TaskState) -> Result<(), EngineError>,
    {
        let mut inner = self.inner.write().await;
        check_fence(&inner, fence)?;
        let mut updated = lookup(&inner, task_id)?.clone();
        f(&mut updated)?;
        self.persist_task(&updated).await?;
        inner.tasks.insert(task_id.to_owned(), updated);
        Ok(())
    }

    async fn persist_task(&self, state: &TaskState) -> Result<(), EngineError> {
        let bytes = serde_json::to_vec(state)?;
        self.kv.save(&format!("{TASK_PREFIX}{}", state.id), bytes).await?;
        Ok(())
    }

    async fn persist_meta(&self, meta: &RunMeta) -> Result<(), EngineError> {
        let bytes = serde_json::to_vec(meta)?;
        self.kv.save(META_KEY, bytes).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RunWriter
// ---------------------------------------------------------------------------

/// Write access to an [`ExecutionStateStore`] on behalf of one run.
#[derive(Debug, Clone, Copy)]
pub struct RunWriter<'a> {
    store: &'a ExecutionStateStore,
    execution_id: Uuid,
}

impl RunWriter<'_> {
    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    pub async fn set(&self, task_id: &str, key: &str, value: Value) -> Result<(), EngineError> {
        self.store.write_key(Some(self.execution_id), task_id, key, value).await
    }

    pub async fn update_status(&self, task_id: &str, status: TaskStatus) -> Result<(), EngineError> {
        self.store.transition(Some(self.execution_id), task_id, status).await
    }

    pub async fn update_error_message(&self, task_id: &str, msg: impl Into<String>) -> Result<(), EngineError> {
        self.store.record_error(Some(self.execution_id), task_id, msg.into()).await
    }

    pub async fn finish_run(&self) -> Result<(), EngineError> {
        self.store.stamp_end(Some(self.execution_id)).await
    }
}

fn check_fence(inner: &Inner, fence: Option<Uuid>) -> Result<(), EngineError> {
    match fence {
        Some(execution_id) if inner.meta.execution_id != Some(execution_id) => {
            Err(EngineError::Superseded { execution_id })
        }
        _ => Ok(()),
    }
}

fn lookup<'a>(inner: &'a Inner, task_id: &str) -> Result<&'a TaskState, EngineError> {
    inner
        .tasks
        .get(task_id)
        .ok_or_else(|| EngineError::TaskNotFound(task_id.to_owned()))
}
