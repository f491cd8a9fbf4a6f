//! Behaviour tests for the orchestration engine.
//!
//! Every test drives a real `Engine` with a scripted `MockRuntime` and an
//! in-memory store, so no subprocesses or files are involved unless a test
//! says otherwise.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use runtime::mock::{MockBehaviour, MockRuntime};
use runtime::{Payload, RuntimeError, RuntimeRegistry};
use store::{KeyValueStore, MemoryStore};

use crate::executor::DependencyInput;
use crate::state::{ExecutionStateStore, INPUT_KEY};
use crate::{Engine, EngineError, ExecuteOptions, TaskSpec, TaskStatus, WorkflowSpec};

fn object(value: Value) -> Payload {
    value.as_object().cloned().expect("test value should be an object")
}

fn registry_for(mock: &MockRuntime) -> RuntimeRegistry {
    let mut registry = RuntimeRegistry::with_builtins();
    registry.register_instance("mock", Arc::new(mock.clone()));
    registry.set_default("mock");
    registry
}

async fn engine(tasks: Vec<TaskSpec>, mock: &MockRuntime) -> Engine {
    Engine::builder(WorkflowSpec::new("test", tasks))
        .registry(registry_for(mock))
        .build()
        .await
        .expect("workflow should be valid")
}

/// A → B → C
fn chain() -> Vec<TaskSpec> {
    vec![
        TaskSpec::new("A", "mock"),
        TaskSpec::new("B", "mock").with_input_from(["A"]),
        TaskSpec::new("C", "mock").with_input_from(["B"]),
    ]
}

async fn status(engine: &Engine, id: &str) -> TaskStatus {
    engine.get_state().await.tasks[id].status
}

/// Yield until `id` reaches `wanted`, giving spawned runs a chance to progress.
async fn wait_for_status(engine: &Engine, id: &str, wanted: TaskStatus) {
    for _ in 0..10_000 {
        if status(engine, id).await == wanted {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("task {id} never reached {wanted}");
}

// ============================================================
// Construction
// ============================================================

#[tokio::test]
async fn construction_seeds_pending_states() {
    let engine = engine(chain(), &MockRuntime::new()).await;
    let summary = engine.get_state().await;
    assert_eq!(summary.workflow_name, "test");
    assert_eq!(summary.total_tasks, 3);
    assert_eq!(summary.pending_count, 3);
    assert!(summary.execution_id.is_none());
    assert!(!engine.is_running());
}

#[tokio::test]
async fn invalid_workflows_cannot_build_an_engine() {
    let cyclic = vec![
        TaskSpec::new("A", "x").with_input_from(["B"]),
        TaskSpec::new("B", "x").with_input_from(["A"]),
    ];
    let err = Engine::new(WorkflowSpec::new("bad", cyclic)).await.unwrap_err();
    assert!(matches!(err, EngineError::CycleDetected { .. }));

    let dangling = vec![TaskSpec::new("A", "x").with_input_from(["nope"])];
    let err = Engine::new(WorkflowSpec::new("bad", dangling)).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::UnknownDependency { task, dependency } if task == "A" && dependency == "nope"
    ));
}

// ============================================================
// Input wiring
// ============================================================

#[tokio::test]
async fn dependency_output_is_wired_under_its_id() {
    let mock = MockRuntime::new().returning("A", json!({ "x": 1 }));
    let engine = engine(
        vec![
            TaskSpec::new("A", "mock"),
            TaskSpec::new("B", "mock").with_input_from(["A"]),
        ],
        &mock,
    )
    .await;

    engine
        .execute(CancellationToken::new(), ExecuteOptions::default())
        .await
        .expect("run should succeed");

    let recorded = engine.state_store().get("B", INPUT_KEY).await.unwrap();
    assert_eq!(recorded, json!({ "A": { "x": 1 } }));
    assert_eq!(mock.last_inputs("B").unwrap(), object(json!({ "A": { "x": 1 } })));
}

#[tokio::test]
async fn input_key_selects_one_value() {
    let mock = MockRuntime::new().returning("A", json!({ "x": 1, "y": 2 }));
    let engine = engine(
        vec![
            TaskSpec::new("A", "mock"),
            TaskSpec::new("B", "mock").with_input_from(["A"]).with_input_key("x"),
        ],
        &mock,
    )
    .await;

    engine
        .execute(CancellationToken::new(), ExecuteOptions::default())
        .await
        .unwrap();

    let recorded = engine.state_store().get("B", INPUT_KEY).await.unwrap();
    assert_eq!(recorded, json!({ "A": 1 }));
}

#[tokio::test]
async fn initial_input_then_params_then_dependencies() {
    let mock = MockRuntime::new().returning("A", json!({ "v": "from-a" }));
    let engine = engine(
        vec![
            TaskSpec::new("A", "mock"),
            TaskSpec::new("B", "mock")
                .with_input_from(["A"])
                .with_param("mode", json!("fast"))
                .with_param("A", json!("shadowed")),
        ],
        &mock,
    )
    .await;

    let options = ExecuteOptions::default().with_input(object(json!({ "mode": "slow", "query": "q" })));
    engine.execute(CancellationToken::new(), options).await.unwrap();

    let inputs = mock.last_inputs("B").unwrap();
    assert_eq!(inputs["query"], "q");
    assert_eq!(inputs["mode"], "fast");
    assert_eq!(inputs["A"], json!({ "v": "from-a" }));

    // Roots see the initial input too.
    assert_eq!(mock.last_inputs("A").unwrap()["query"], "q");
}

#[tokio::test]
async fn depends_orders_without_passing_data() {
    let mock = MockRuntime::new().returning("setup", json!({ "secret": 1 }));
    let engine = engine(
        vec![
            TaskSpec::new("work", "mock").with_depends(["setup"]),
            TaskSpec::new("setup", "mock"),
        ],
        &mock,
    )
    .await;

    engine
        .execute(CancellationToken::new(), ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(mock.call_order(), vec!["setup", "work"]);
    assert!(mock.last_inputs("work").unwrap().is_empty());
}

#[tokio::test]
async fn tasks_run_in_graph_order() {
    let mock = MockRuntime::new();
    let engine = engine(
        vec![
            TaskSpec::new("report", "mock").with_input_from(["left", "right"]),
            TaskSpec::new("right", "mock").with_input_from(["root"]),
            TaskSpec::new("left", "mock").with_input_from(["root"]),
            TaskSpec::new("root", "mock"),
        ],
        &mock,
    )
    .await;

    engine
        .execute(CancellationToken::new(), ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(mock.call_order(), engine.graph().order());
    assert_eq!(mock.call_order(), vec!["root", "right", "left", "report"]);
}

// ============================================================
// Partial failure
// ============================================================

#[tokio::test]
async fn independent_failure_degrades_the_run() {
    let mock = MockRuntime::new()
        .returning("A", json!({ "ok": true }))
        .failing("B", "model refused");
    let engine = engine(vec![TaskSpec::new("A", "mock"), TaskSpec::new("B", "mock")], &mock).await;

    let err = engine
        .execute(CancellationToken::new(), ExecuteOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::CompletedWithErrors { completed: 1, total: 2 }));
    assert_eq!(err.to_string(), "completed with errors: 1/2");

    let summary = engine.get_state().await;
    assert_eq!(summary.completed_count, 1);
    assert_eq!(summary.failed_count, 1);
    assert_eq!(summary.tasks["A"].status, TaskStatus::Completed);
    assert_eq!(summary.tasks["B"].status, TaskStatus::Failed);
    let msg = summary.tasks["B"].error_message.as_deref().unwrap_or_default();
    assert!(msg.contains("model refused"), "unexpected message: {msg}");
    assert!(summary.end_time.is_some());
}

#[tokio::test]
async fn failed_dependency_blocks_data_dependents_only() {
    let mock = MockRuntime::new().failing("A", "boom");
    let engine = engine(
        vec![
            TaskSpec::new("A", "mock"),
            TaskSpec::new("B", "mock").with_input_from(["A"]),
            TaskSpec::new("C", "mock").with_depends(["A"]),
            TaskSpec::new("D", "mock").with_input_from(["B"]),
        ],
        &mock,
    )
    .await;

    let err = engine
        .execute(CancellationToken::new(), ExecuteOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::CompletedWithErrors { completed: 1, total: 4 }));

    let summary = engine.get_state().await;
    assert_eq!(summary.tasks["A"].status, TaskStatus::Failed);
    assert_eq!(summary.tasks["B"].status, TaskStatus::Blocked);
    assert_eq!(summary.tasks["C"].status, TaskStatus::Completed);
    assert_eq!(summary.tasks["D"].status, TaskStatus::Blocked);
    assert_eq!(summary.blocked_count, 2);
    assert!(summary.tasks["B"]
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("'A'")));

    // Blocked tasks never reach the runtime.
    assert_eq!(mock.call_count("B"), 0);
    assert_eq!(mock.call_count("D"), 0);
}

#[tokio::test]
async fn missing_input_key_blocks() {
    let mock = MockRuntime::new().returning("A", json!({ "other": 1 }));
    let engine = engine(
        vec![
            TaskSpec::new("A", "mock"),
            TaskSpec::new("B", "mock").with_input_from(["A"]).with_input_key("x"),
        ],
        &mock,
    )
    .await;

    assert!(engine
        .execute(CancellationToken::new(), ExecuteOptions::default())
        .await
        .is_err());
    let b = engine.get_state().await.tasks["B"].clone();
    assert_eq!(b.status, TaskStatus::Blocked);
    assert_eq!(b.error_message.as_deref(), Some("dependency 'A' output has no key 'x'"));
}

#[tokio::test]
async fn non_object_output_fails_the_task() {
    let mock = MockRuntime::new().returning("A", json!([1, 2, 3]));
    let engine = engine(vec![TaskSpec::new("A", "mock")], &mock).await;

    assert!(engine
        .execute(CancellationToken::new(), ExecuteOptions::default())
        .await
        .is_err());
    assert_eq!(status(&engine, "A").await, TaskStatus::Failed);
}

#[tokio::test]
async fn unfinished_dependency_is_reported_as_unavailable() {
    let engine = engine(chain(), &MockRuntime::new()).await;
    let input = engine.dependency_input("A", None).await.unwrap();
    assert_eq!(
        input,
        DependencyInput::Unavailable("dependency 'A' has not been executed in this run".into())
    );
}

// ============================================================
// Concurrency and cancellation
// ============================================================

#[tokio::test]
async fn second_execute_is_rejected_while_running() {
    let gate = Arc::new(Notify::new());
    let mock = MockRuntime::new().with("A", MockBehaviour::WaitFor(gate.clone(), json!({})));
    let engine = Arc::new(engine(chain(), &mock).await);

    let first = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            engine
                .execute(CancellationToken::new(), ExecuteOptions::default())
                .await
        })
    };
    wait_for_status(&engine, "A", TaskStatus::Running).await;
    assert!(engine.is_running());

    let before = engine.get_state().await;
    let err = engine
        .execute(CancellationToken::new(), ExecuteOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AlreadyRunning));
    assert_eq!(err.to_string(), "execution already running");
    assert_eq!(engine.get_state().await, before);

    // Readers can inspect mid-run.
    let a = engine.get_task_state("A").await.unwrap();
    assert_eq!(a["status"], "running");

    gate.notify_one();
    first.await.unwrap().expect("first run should succeed");
    assert!(!engine.is_running());
    assert_eq!(mock.call_count("A"), 1);
}

#[tokio::test]
async fn cancellation_leaves_remainder_pending() {
    let caller = CancellationToken::new();
    let mock = MockRuntime::new().with(
        "A",
        MockBehaviour::CancelThenReturn(caller.clone(), json!({ "done": true })),
    );
    let engine = engine(chain(), &mock).await;

    let err = engine
        .execute(caller.clone(), ExecuteOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Cancelled));
    assert!(err.is_cancellation());
    assert!(!err.to_string().contains("completed with errors"));

    let summary = engine.get_state().await;
    assert_eq!(summary.tasks["A"].status, TaskStatus::Completed);
    assert_eq!(summary.tasks["B"].status, TaskStatus::Pending);
    assert_eq!(summary.tasks["C"].status, TaskStatus::Pending);
    assert_eq!(mock.call_count("B"), 0);
    assert!(!engine.is_running());
}

#[tokio::test]
async fn stop_ends_the_run_at_the_next_boundary() {
    let gate = Arc::new(Notify::new());
    let mock = MockRuntime::new().with("A", MockBehaviour::WaitFor(gate.clone(), json!({})));
    let engine = Arc::new(engine(chain(), &mock).await);

    let run = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            engine
                .execute(CancellationToken::new(), ExecuteOptions::default())
                .await
        })
    };
    wait_for_status(&engine, "A", TaskStatus::Running).await;

    engine.stop();
    assert!(!engine.is_running());

    // The in-flight call is not interrupted; it finishes and is recorded.
    gate.notify_one();
    let err = run.await.unwrap().unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
    assert_eq!(status(&engine, "A").await, TaskStatus::Completed);
    assert_eq!(status(&engine, "B").await, TaskStatus::Pending);
}

#[tokio::test]
async fn stopped_run_cannot_overwrite_the_next_run() {
    let gate = Arc::new(Notify::new());
    let mock = MockRuntime::new().with("A", MockBehaviour::WaitFor(gate.clone(), json!({ "stale": true })));
    let engine = Arc::new(engine(chain(), &mock).await);

    let stopped = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            engine
                .execute(CancellationToken::new(), ExecuteOptions::default())
                .await
        })
    };
    wait_for_status(&engine, "A", TaskStatus::Running).await;
    engine.stop();

    // The next run sees a different result for A and finishes first.
    let mock = mock.returning("A", json!({ "fresh": true }));
    engine
        .execute(CancellationToken::new(), ExecuteOptions::default())
        .await
        .expect("second run should succeed");
    let after_second = engine.get_state().await;
    assert_eq!(after_second.tasks["A"].outputs, object(json!({ "fresh": true })));

    // Now the stopped run's call for A returns.
    gate.notify_one();
    let err = stopped.await.unwrap().unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));

    assert_eq!(engine.get_state().await, after_second);
    assert_eq!(mock.call_count("A"), 2);
    assert!(!engine.is_running());
}

#[tokio::test]
async fn already_cancelled_context_runs_nothing() {
    let caller = CancellationToken::new();
    caller.cancel();
    let mock = MockRuntime::new();
    let engine = engine(chain(), &mock).await;

    let err = engine.execute(caller, ExecuteOptions::default()).await.unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
    assert!(mock.calls().is_empty());
    assert_eq!(engine.get_state().await.pending_count, 3);
}

#[tokio::test(start_paused = true)]
async fn timeout_surfaces_as_deadline_exceeded() {
    let mock = MockRuntime::new().with(
        "A",
        MockBehaviour::Sleep(Duration::from_secs(5), json!({})),
    );
    let engine = engine(chain(), &mock).await;

    let err = engine
        .execute(CancellationToken::new(), ExecuteOptions::default().with_timeout_secs(1))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::DeadlineExceeded));
    assert_eq!(status(&engine, "A").await, TaskStatus::Completed);
    assert_eq!(status(&engine, "B").await, TaskStatus::Pending);
}

#[tokio::test(start_paused = true)]
async fn zero_timeout_means_no_deadline() {
    let mock = MockRuntime::new().with(
        "A",
        MockBehaviour::Sleep(Duration::from_secs(3_600), json!({})),
    );
    let engine = engine(chain(), &mock).await;

    engine
        .execute(CancellationToken::new(), ExecuteOptions::default().with_timeout_secs(0))
        .await
        .expect("no timeout should apply");
    assert_eq!(engine.get_state().await.completed_count, 3);
}

// ============================================================
// Runtime selection and lifecycle
// ============================================================

#[tokio::test]
async fn unknown_runtime_fails_without_touching_state() {
    let engine = engine(chain(), &MockRuntime::new()).await;

    let err = engine
        .execute(CancellationToken::new(), ExecuteOptions::default().with_runtime("docker"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Runtime(RuntimeError::UnknownRuntime { ref name, .. }) if name == "docker"
    ));
    assert!(!engine.is_running());
    assert!(engine.get_state().await.execution_id.is_none());

    // The engine is still usable.
    engine
        .execute(CancellationToken::new(), ExecuteOptions::default())
        .await
        .unwrap();
}

#[tokio::test]
async fn echo_runtime_passes_inputs_through() {
    let engine = Engine::new(WorkflowSpec::new(
        "echo",
        vec![
            TaskSpec::new("A", "echo").with_param("greeting", json!("hi")),
            TaskSpec::new("B", "echo").with_input_from(["A"]).with_input_key("greeting"),
        ],
    ))
    .await
    .unwrap();

    engine
        .execute(CancellationToken::new(), ExecuteOptions::default().with_runtime("echo"))
        .await
        .unwrap();

    let b = engine.get_task_state("B").await.unwrap();
    assert_eq!(b["output"], json!({ "A": "hi" }));
}

#[tokio::test]
async fn rerun_over_the_same_store_starts_clean() {
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let tasks = vec![TaskSpec::new("A", "mock"), TaskSpec::new("B", "mock")];

    let failing = MockRuntime::new().failing("B", "first time");
    let first = Engine::builder(WorkflowSpec::new("rerun", tasks.clone()))
        .registry(registry_for(&failing))
        .store(Arc::clone(&kv))
        .build()
        .await
        .unwrap();
    assert!(first
        .execute(CancellationToken::new(), ExecuteOptions::default())
        .await
        .is_err());
    let first_id = first.get_state().await.execution_id;
    assert!(first_id.is_some());

    let second = Engine::builder(WorkflowSpec::new("rerun", tasks))
        .registry(registry_for(&MockRuntime::new()))
        .store(Arc::clone(&kv))
        .build()
        .await
        .unwrap();
    second
        .execute(CancellationToken::new(), ExecuteOptions::default())
        .await
        .unwrap();

    let restored = ExecutionStateStore::restore(kv).await.unwrap().summary().await;
    assert_ne!(restored.execution_id, first_id);
    assert!(restored.tasks["B"].error_message.is_none());
    assert!(restored.is_success());
}

#[tokio::test]
async fn same_engine_can_run_twice() {
    let mock = MockRuntime::new();
    let engine = engine(chain(), &mock).await;
    let opts = ExecuteOptions::default();

    engine.execute(CancellationToken::new(), opts.clone()).await.unwrap();
    let first = engine.get_state().await.execution_id;
    engine.execute(CancellationToken::new(), opts).await.unwrap();
    let second = engine.get_state().await;

    assert_ne!(second.execution_id, first);
    assert_eq!(second.completed_count, 3);
    assert_eq!(mock.call_count("A"), 2);
}

#[tokio::test]
async fn shutdown_cleans_up_each_runtime_once() {
    let mock = MockRuntime::new();
    let engine = engine(chain(), &mock).await;
    engine.execute(CancellationToken::new(), ExecuteOptions::default()).await.unwrap();
    engine.execute(CancellationToken::new(), ExecuteOptions::default()).await.unwrap();

    engine.shutdown().await.unwrap();
    assert_eq!(mock.cleanup_count(), 1);

    // The store is closed, so a new run cannot record anything.
    assert!(engine
        .execute(CancellationToken::new(), ExecuteOptions::default())
        .await
        .is_err());
}

// ============================================================
// Persistence and export
// ============================================================

#[tokio::test]
async fn state_is_written_through_to_the_injected_store() {
    let kv = Arc::new(MemoryStore::new());
    let mock = MockRuntime::new().returning("A", json!({ "n": 42 }));
    let engine = Engine::builder(WorkflowSpec::new("persisted", chain()))
        .registry(registry_for(&mock))
        .store(kv.clone())
        .build()
        .await
        .unwrap();
    engine.execute(CancellationToken::new(), ExecuteOptions::default()).await.unwrap();

    assert_eq!(kv.list().await.unwrap(), vec!["execution", "task/A", "task/B", "task/C"]);
    let restored = ExecutionStateStore::restore(kv).await.unwrap();
    assert_eq!(restored.summary().await, engine.get_state().await);
}

#[tokio::test]
async fn store_factory_receives_the_workflow_name() {
    let seen = Arc::new(std::sync::Mutex::new(String::new()));
    let recorder = Arc::clone(&seen);
    Engine::builder(WorkflowSpec::new("named-flow", chain()))
        .store_factory(move |name| {
            *recorder.lock().unwrap() = name.to_owned();
            let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
            Ok(kv)
        })
        .build()
        .await
        .unwrap();
    assert_eq!(*seen.lock().unwrap(), "named-flow");
}

#[tokio::test]
async fn export_serializes_the_summary() {
    let mock = MockRuntime::new().failing("C", "nope");
    let engine = engine(chain(), &mock).await;
    let _ = engine.execute(CancellationToken::new(), ExecuteOptions::default()).await;

    let exported: Value = serde_json::from_slice(&engine.export().await.unwrap()).unwrap();
    assert_eq!(exported["workflow_name"], "test");
    assert_eq!(exported["total_tasks"], 3);
    assert_eq!(exported["completed_count"], 2);
    assert_eq!(exported["failed_count"], 1);
    assert_eq!(exported["tasks"]["C"]["status"], "failed");
    assert_eq!(exported["tasks"]["B"]["inputs"]["A"], json!({}));
}

// ============================================================
// Ready-set parallelism
// ============================================================

fn diamond() -> Vec<TaskSpec> {
    vec![
        TaskSpec::new("A", "mock"),
        TaskSpec::new("B", "mock").with_input_from(["A"]),
        TaskSpec::new("C", "mock").with_input_from(["A"]),
        TaskSpec::new("D", "mock").with_input_from(["B", "C"]),
    ]
}

#[tokio::test(start_paused = true)]
async fn parallel_waves_overlap_independent_tasks() {
    let mock = MockRuntime::new()
        .with("B", MockBehaviour::Sleep(Duration::from_secs(10), json!({ "b": 1 })))
        .with("C", MockBehaviour::Sleep(Duration::from_secs(10), json!({ "c": 2 })));
    let engine = engine(diamond(), &mock).await;

    let started = tokio::time::Instant::now();
    engine
        .execute(CancellationToken::new(), ExecuteOptions::default().parallel(true))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(20));

    let d_inputs = mock.last_inputs("D").unwrap();
    assert_eq!(d_inputs["B"], json!({ "b": 1 }));
    assert_eq!(d_inputs["C"], json!({ "c": 2 }));
    assert_eq!(mock.call_order().first().map(String::as_str), Some("A"));
    assert_eq!(mock.call_order().last().map(String::as_str), Some("D"));
}

#[tokio::test]
async fn parallel_mode_keeps_failure_semantics() {
    let mock = MockRuntime::new().failing("B", "bad branch");
    let engine = engine(diamond(), &mock).await;

    let err = engine
        .execute(CancellationToken::new(), ExecuteOptions::default().parallel(true))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::CompletedWithErrors { completed: 2, total: 4 }));

    let summary = engine.get_state().await;
    assert_eq!(summary.tasks["B"].status, TaskStatus::Failed);
    assert_eq!(summary.tasks["C"].status, TaskStatus::Completed);
    assert_eq!(summary.tasks["D"].status, TaskStatus::Blocked);
}

#[tokio::test]
async fn parallel_mode_checks_cancellation_between_waves() {
    let caller = CancellationToken::new();
    let mock = MockRuntime::new().with("A", MockBehaviour::CancelThenReturn(caller.clone(), json!({})));
    let engine = engine(diamond(), &mock).await;

    let err = engine
        .execute(caller, ExecuteOptions::default().parallel(true))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
    let summary = engine.get_state().await;
    assert_eq!(summary.completed_count, 1);
    assert_eq!(summary.pending_count, 3);
}
