//! `engine` crate — workflow document model, DAG validation, execution
//! state, and the orchestration engine.

pub mod dag;
pub mod error;
pub mod executor;
pub mod models;
pub mod state;

pub use dag::{validate_dag, DagNode, Graph};
pub use error::EngineError;
pub use executor::{Engine, EngineBuilder, EngineConfig, ExecuteOptions, StoreFactory};
pub use models::{DocumentFormat, TaskSpec, WorkflowSpec};
pub use state::{ExecutionStateStore, ExecutionSummary, RunWriter, TaskState, TaskStatus};

#[cfg(test)]
mod executor_tests;
