//! Workflow orchestration engine.
//!
//! `Engine` is the central orchestrator:
//! 1. Validates the DAG once at construction and keeps its topological order.
//! 2. Per run, walks that order (or its ready-set waves), checking the run
//!    context at every task boundary.
//! 3. Resolves each task's inputs from the initial input, its static params,
//!    and the recorded outputs of its `inputFrom` dependencies.
//! 4. Dispatches the task through the selected `Runtime`.
//! 5. Records status, inputs and outputs in the `ExecutionStateStore`.
//!
//! A failing task does not abort the run: it is marked Failed, its data
//! dependents are marked Blocked, and everything else still runs. The run
//! then reports `CompletedWithErrors` and the summary has the detail.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use indexmap::IndexMap;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use runtime::{ExecutionContext, Payload, Runtime, RuntimeRegistry, TaskSpec};
use store::{KeyValueStore, MemoryStore, StoreError};

use crate::dag::Graph;
use crate::models::WorkflowSpec;
use crate::state::{ExecutionStateStore, ExecutionSummary, TaskStatus, INPUT_KEY, OUTPUT_KEY};
use crate::EngineError;

/// Per-task progress goes to `info` in verbose mode, `debug` otherwise.
macro_rules! progress {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            info!($($arg)+)
        } else {
            debug!($($arg)+)
        }
    };
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Engine-wide knobs fixed at construction.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Log per-task progress at `info` instead of `debug`.
    pub verbose: bool,
}

/// Builds the key-value store backing an engine's state. Receives the
/// workflow name.
pub type StoreFactory =
    Box<dyn Fn(&str) -> Result<Arc<dyn KeyValueStore>, StoreError> + Send + Sync>;

/// Options for a single [`Engine::execute`] call.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Base of every task's inputs; params and dependency outputs are layered on top.
    pub initial_input: Payload,
    /// Whole-run timeout. `Duration::ZERO` means none.
    pub timeout: Duration,
    /// Registered runtime name; `None` picks the registry default.
    pub runtime: Option<String>,
    /// Run each ready-set wave concurrently instead of one task at a time.
    pub parallel: bool,
}

impl ExecuteOptions {
    pub fn with_input(mut self, input: Payload) -> Self {
        self.initial_input = input;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Timeout in whole seconds; 0 disables it.
    pub fn with_timeout_secs(self, secs: u64) -> Self {
        self.with_timeout(Duration::from_secs(secs))
    }

    pub fn with_runtime(mut self, name: impl Into<String>) -> Self {
        self.runtime = Some(name.into());
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct EngineBuilder {
    spec: WorkflowSpec,
    registry: RuntimeRegistry,
    store_factory: Option<StoreFactory>,
    config: EngineConfig,
}

impl EngineBuilder {
    /// Runtimes available to `execute`. Defaults to [`RuntimeRegistry::with_builtins`].
    pub fn registry(mut self, registry: RuntimeRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// How to open the state's backing store. Defaults to in-memory.
    pub fn store_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&str) -> Result<Arc<dyn KeyValueStore>, StoreError> + Send + Sync + 'static,
    {
        self.store_factory = Some(Box::new(factory));
        self
    }

    /// Use an already opened store.
    pub fn store(self, kv: Arc<dyn KeyValueStore>) -> Self {
        self.store_factory(move |_| Ok(Arc::clone(&kv)))
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate the workflow, open the store and seed one Pending state per task.
    ///
    /// # Errors
    /// Any graph validation error; the engine cannot exist for an invalid
    /// workflow. Store errors from opening or seeding state.
    pub async fn build(self) -> Result<Engine, EngineError> {
        let graph = Graph::build(&self.spec)?;

        let kv: Arc<dyn KeyValueStore> = match &self.store_factory {
            Some(factory) => factory(&self.spec.name)?,
            None => Arc::new(MemoryStore::new()),
        };
        let state = ExecutionStateStore::new(self.spec.name.clone(), kv);
        state.initialize_tasks(graph.order()).await?;

        let task_index = self
            .spec
            .agents
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.clone(), i))
            .collect();

        info!(
            workflow = %self.spec.name,
            tasks = graph.len(),
            order = ?graph.order(),
            "workflow validated"
        );

        Ok(Engine {
            spec: self.spec,
            task_index,
            graph,
            state,
            registry: self.registry,
            runtimes: Mutex::new(IndexMap::new()),
            run: Mutex::new(RunSlot::default()),
            config: self.config,
        })
    }
}

// ---------------------------------------------------------------------------
// Run bookkeeping
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct RunSlot {
    running: bool,
    /// Bumped on every run so a finishing run only clears its own flag.
    generation: u64,
    cancel: Option<CancellationToken>,
}

/// Clears the running flag when a run ends, however it ends.
struct RunGuard<'a> {
    slot: &'a Mutex<RunSlot>,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        let mut slot = lock(self.slot);
        if slot.generation == self.generation {
            slot.running = false;
            slot.cancel = None;
        }
    }
}

/// Where a dependency's contribution to a task's inputs comes from.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum DependencyInput {
    Ready(Value),
    /// The dependency's output cannot be obtained; the reason becomes the
    /// blocked task's error message.
    Unavailable(String),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Executes one workflow. At most one run is in progress at a time; state
/// from the latest run stays readable until the engine is dropped.
pub struct Engine {
    spec: WorkflowSpec,
    task_index: HashMap<String, usize>,
    graph: Graph,
    state: ExecutionStateStore,
    registry: RuntimeRegistry,
    /// Runtimes instantiated so far, cleaned up once on shutdown.
    runtimes: Mutex<IndexMap<String, Arc<dyn Runtime>>>,
    run: Mutex<RunSlot>,
    config: EngineConfig,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("workflow", &self.spec.name)
            .field("order", &self.graph.order())
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn builder(spec: WorkflowSpec) -> EngineBuilder {
        EngineBuilder {
            spec,
            registry: RuntimeRegistry::with_builtins(),
            store_factory: None,
            config: EngineConfig::default(),
        }
    }

    /// Engine with built-in runtimes and an in-memory store.
    pub async fn new(spec: WorkflowSpec) -> Result<Self, EngineError> {
        Self::builder(spec).build().await
    }

    pub fn spec(&self) -> &WorkflowSpec {
        &self.spec
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn state_store(&self) -> &ExecutionStateStore {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        lock(&self.run).running
    }

    /// Run the workflow once.
    ///
    /// `ctx` is the caller's cancellation token; cancelling it (or calling
    /// [`Engine::stop`]) ends the run at the next task boundary.
    ///
    /// # Errors
    /// - [`EngineError::AlreadyRunning`] if a run is in progress; nothing is touched.
    /// - [`EngineError::Cancelled`] / [`EngineError::DeadlineExceeded`] if the
    ///   run ended early. Tasks never reached stay Pending.
    /// - [`EngineError::CompletedWithErrors`] if every task was visited but
    ///   some failed or were blocked.
    ///
    /// In every case the summary from [`Engine::get_state`] is authoritative.
    #[instrument(skip(self, ctx, options), fields(workflow = %self.spec.name))]
    pub async fn execute(&self, ctx: CancellationToken, options: ExecuteOptions) -> Result<(), EngineError> {
        let (mut guard, token) = self.begin_run(&ctx)?;

        let deadline = (!options.timeout.is_zero()).then(|| Instant::now() + options.timeout);
        if let Some(deadline) = deadline {
            // Wake runtimes that honour the token; the boundary check uses
            // the deadline itself, so this is only about promptness.
            let token = token.clone();
            guard.timer = Some(tokio::spawn(async move {
                tokio::time::sleep_until(deadline).await;
                token.cancel();
            }));
        }

        let runtime = self.runtime_for(options.runtime.as_deref())?;
        let execution_id = Uuid::now_v7();

        self.state.initialize_tasks(self.graph.order()).await?;
        self.state.begin_run(execution_id).await?;

        let run_ctx = ExecutionContext::new(self.spec.name.clone(), execution_id, token, deadline);
        info!(
            %execution_id,
            tasks = self.graph.len(),
            parallel = options.parallel,
            timeout = ?options.timeout,
            "run started"
        );

        let outcome = if options.parallel {
            self.run_waves(&run_ctx, runtime.as_ref(), &options.initial_input).await
        } else {
            self.run_serial(&run_ctx, runtime.as_ref(), &options.initial_input).await
        };
        let finished = self.state.run_writer(execution_id).finish_run().await;
        if let Err(e) = outcome.and(finished) {
            if let EngineError::Superseded { .. } = e {
                // Only a stopped run can be overtaken; report why it stopped.
                warn!(%execution_id, "run superseded, late results discarded");
                if let Some(done) = run_ctx.done() {
                    return Err(done.into());
                }
            }
            return Err(e);
        }

        let summary = self.state.summary().await;
        if !summary.is_success() {
            warn!(
                %execution_id,
                completed = summary.completed_count,
                failed = summary.failed_count,
                blocked = summary.blocked_count,
                total = summary.total_tasks,
                "run finished with errors"
            );
            return Err(EngineError::CompletedWithErrors {
                completed: summary.completed_count,
                total: summary.total_tasks,
            });
        }

        info!(%execution_id, total = summary.total_tasks, "run completed");
        Ok(())
    }

    /// Cancel the current run and clear the running flag.
    ///
    /// Cooperative: an in-flight runtime call is not interrupted by the
    /// engine, the run just ends at its next task boundary.
    pub fn stop(&self) {
        let mut slot = lock(&self.run);
        if let Some(token) = slot.cancel.take() {
            info!(workflow = %self.spec.name, "stopping run");
            token.cancel();
        }
        slot.running = false;
    }

    /// Snapshot of the latest run. Safe to call mid-run.
    pub async fn get_state(&self) -> ExecutionSummary {
        self.state.summary().await
    }

    /// Every recorded key of one task.
    pub async fn get_task_state(&self, task_id: &str) -> Result<Payload, EngineError> {
        self.state.get_all(task_id).await
    }

    /// The current summary as pretty-printed JSON.
    pub async fn export(&self) -> Result<Vec<u8>, EngineError> {
        let summary = self.state.summary().await;
        Ok(serde_json::to_vec_pretty(&summary)?)
    }

    /// Clean up every runtime this engine instantiated, then close the store.
    ///
    /// Runtimes are cleaned up at most once; later calls only re-close the store.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        if self.is_running() {
            return Err(EngineError::AlreadyRunning);
        }

        let runtimes: Vec<(String, Arc<dyn Runtime>)> = lock(&self.runtimes).drain(..).collect();
        let mut first_error: Option<EngineError> = None;
        for (name, runtime) in runtimes {
            debug!(runtime = %name, "cleaning up runtime");
            if let Err(e) = runtime.cleanup().await {
                warn!(runtime = %name, error = %e, "runtime cleanup failed");
                first_error.get_or_insert(e.into());
            }
        }

        self.state.close().await?;
        first_error.map_or(Ok(()), Err)
    }

    // -----------------------------------------------------------------------
    // Internal: run lifecycle
    // -----------------------------------------------------------------------

    fn begin_run(&self, parent: &CancellationToken) -> Result<(RunGuard<'_>, CancellationToken), EngineError> {
        let mut slot = lock(&self.run);
        if slot.running {
            return Err(EngineError::AlreadyRunning);
        }
        slot.running = true;
        slot.generation += 1;
        let token = parent.child_token();
        slot.cancel = Some(token.clone());

        let guard = RunGuard {
            slot: &self.run,
            generation: slot.generation,
            timer: None,
        };
        Ok((guard, token))
    }

    fn runtime_for(&self, selector: Option<&str>) -> Result<Arc<dyn Runtime>, EngineError> {
        let name = self.registry.resolve_name(selector)?;
        let mut cache = lock(&self.runtimes);
        if let Some(runtime) = cache.get(name) {
            return Ok(Arc::clone(runtime));
        }
        let runtime = self.registry.create(name)?;
        debug!(runtime = name, "runtime instantiated");
        cache.insert(name.to_owned(), Arc::clone(&runtime));
        Ok(runtime)
    }

    fn task(&self, task_id: &str) -> Result<&TaskSpec, EngineError> {
        self.task_index
            .get(task_id)
            .map(|&i| &self.spec.agents[i])
            .ok_or_else(|| EngineError::TaskNotFound(task_id.to_owned()))
    }

    // -----------------------------------------------------------------------
    // Internal: scheduling
    // -----------------------------------------------------------------------

    async fn run_serial(
        &self,
        ctx: &ExecutionContext,
        runtime: &dyn Runtime,
        initial: &Payload,
    ) -> Result<(), EngineError> {
        for task_id in self.graph.order() {
            if let Some(done) = ctx.done() {
                warn!(next_task = %task_id, reason = ?done, "run ended before completing its order");
                return Err(done.into());
            }
            self.run_task(ctx, runtime, task_id, initial).await?;
        }
        Ok(())
    }

    /// Every wave's dependencies finished in earlier waves, so its members
    /// run concurrently; the next wave starts only once all of them return.
    async fn run_waves(
        &self,
        ctx: &ExecutionContext,
        runtime: &dyn Runtime,
        initial: &Payload,
    ) -> Result<(), EngineError> {
        for (wave, task_ids) in self.graph.ready_sets().into_iter().enumerate() {
            if let Some(done) = ctx.done() {
                warn!(wave, reason = ?done, "run ended before completing its order");
                return Err(done.into());
            }
            debug!(wave, tasks = ?task_ids, "dispatching wave");
            let results = join_all(
                task_ids
                    .iter()
                    .map(|task_id| self.run_task(ctx, runtime, task_id, initial)),
            )
            .await;
            results.into_iter().collect::<Result<Vec<()>, _>>()?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internal: one task
    // -----------------------------------------------------------------------

    /// Run one task and record the outcome.
    ///
    /// Task-level problems (blocked inputs, runtime failure) are recorded in
    /// the task's state and return `Ok`; only state-store failures are `Err`.
    async fn run_task(
        &self,
        ctx: &ExecutionContext,
        runtime: &dyn Runtime,
        task_id: &str,
        initial: &Payload,
    ) -> Result<(), EngineError> {
        let task = self.task(task_id)?;
        let state = self.state.run_writer(ctx.execution_id);
        state.update_status(task_id, TaskStatus::Running).await?;
        progress!(self.config.verbose, task_id = %task_id, uses = %task.uses, "task started");

        let mut inputs = initial.clone();
        for (key, value) in &task.params {
            inputs.insert(key.clone(), value.clone());
        }
        for dep in &task.input_from {
            match self.dependency_input(dep, task.input_key.as_deref()).await? {
                DependencyInput::Ready(value) => {
                    inputs.insert(dep.clone(), value);
                }
                DependencyInput::Unavailable(reason) => {
                    warn!(task_id = %task_id, dependency = %dep, %reason, "task blocked");
                    state.update_error_message(task_id, reason).await?;
                    state.update_status(task_id, TaskStatus::Blocked).await?;
                    return Ok(());
                }
            }
        }

        state
            .set(task_id, INPUT_KEY, Value::Object(inputs.clone()))
            .await?;

        match runtime.execute(ctx, task, inputs).await {
            Ok(outputs) => {
                let keys = outputs.len();
                state.set(task_id, OUTPUT_KEY, Value::Object(outputs)).await?;
                state.update_status(task_id, TaskStatus::Completed).await?;
                progress!(self.config.verbose, task_id = %task_id, output_keys = keys, "task completed");
            }
            Err(e) => {
                error!(task_id = %task_id, error = %e, "task failed");
                state.update_error_message(task_id, e.to_string()).await?;
                state.update_status(task_id, TaskStatus::Failed).await?;
            }
        }
        Ok(())
    }

    /// What `dep` contributes to a dependent's inputs: its whole output
    /// object, or only `input_key` from it.
    pub(crate) async fn dependency_input(
        &self,
        dep: &str,
        input_key: Option<&str>,
    ) -> Result<DependencyInput, EngineError> {
        let state = self.state.task_state(dep).await?;
        match state.status {
            TaskStatus::Completed => {}
            TaskStatus::Pending | TaskStatus::Running => {
                // Cannot happen with a correct order: dependencies always
                // finish before their dependents start.
                error!(dependency = %dep, status = %state.status, "dependency has not run yet");
                return Ok(DependencyInput::Unavailable(format!(
                    "dependency '{dep}' has not been executed in this run"
                )));
            }
            TaskStatus::Failed | TaskStatus::Blocked => {
                return Ok(DependencyInput::Unavailable(format!(
                    "dependency '{dep}' did not complete (status {})",
                    state.status
                )));
            }
        }

        Ok(match input_key {
            Some(key) => match state.outputs.get(key) {
                Some(value) => DependencyInput::Ready(value.clone()),
                None => DependencyInput::Unavailable(format!(
                    "dependency '{dep}' output has no key '{key}'"
                )),
            },
            None => DependencyInput::Ready(Value::Object(state.outputs)),
        })
    }
}
