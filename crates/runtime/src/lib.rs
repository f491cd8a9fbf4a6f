//! `runtime` crate — the `Runtime` trait, the runtime registry, and the
//! built-in runtimes.
//!
//! Every executor, built-in or caller-supplied, must implement
//! [`Runtime`]. The engine crate dispatches each task through this trait
//! object, selected by name from a [`RuntimeRegistry`].

pub mod echo;
pub mod error;
pub mod mock;
pub mod process;
pub mod registry;
pub mod task;
pub mod traits;

pub use echo::EchoRuntime;
pub use error::RuntimeError;
pub use process::ProcessRuntime;
pub use registry::{RuntimeFactory, RuntimeRegistry};
pub use task::{Payload, TaskSpec};
pub use traits::{Done, ExecutionContext, Runtime};
