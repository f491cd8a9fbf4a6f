//! Runtime registry — maps a runtime name to a factory.
//!
//! The registry is an ordinary value built by the caller and handed to the
//! engine, so several engines with different runtime sets can coexist in
//! one process.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::echo::EchoRuntime;
use crate::process::ProcessRuntime;
use crate::{Runtime, RuntimeError};

/// Builds a fresh runtime instance.
pub type RuntimeFactory =
    Arc<dyn Fn() -> Result<Arc<dyn Runtime>, RuntimeError> + Send + Sync>;

#[derive(Clone, Default)]
pub struct RuntimeRegistry {
    factories: BTreeMap<String, RuntimeFactory>,
    default: Option<String>,
}

impl RuntimeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in runtimes, `echo` (the default) and
    /// `process`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(EchoRuntime::NAME, || Ok(Arc::new(EchoRuntime)));
        registry.register(ProcessRuntime::NAME, || Ok(Arc::new(ProcessRuntime::default())));
        registry.set_default(EchoRuntime::NAME);
        registry
    }

    /// Register (or replace) a factory under `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Result<Arc<dyn Runtime>, RuntimeError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    /// Register an existing instance; every `create` hands back the same `Arc`.
    pub fn register_instance(&mut self, name: impl Into<String>, runtime: Arc<dyn Runtime>) -> &mut Self {
        self.register(name, move || Ok(Arc::clone(&runtime)))
    }

    /// Name used when a run does not select a runtime explicitly.
    pub fn set_default(&mut self, name: impl Into<String>) -> &mut Self {
        self.default = Some(name.into());
        self
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default.as_deref()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Resolve `selector` (or the default when `None`) to a registered name.
    pub fn resolve_name<'a>(&'a self, selector: Option<&'a str>) -> Result<&'a str, RuntimeError> {
        let name = match selector.filter(|s| !s.is_empty()) {
            Some(name) => name,
            None => self.default.as_deref().ok_or(RuntimeError::NoDefault)?,
        };
        if !self.contains(name) {
            return Err(self.unknown(name));
        }
        Ok(name)
    }

    /// Instantiate the runtime registered under `name`.
    pub fn create(&self, name: &str) -> Result<Arc<dyn Runtime>, RuntimeError> {
        let factory = self.factories.get(name).ok_or_else(|| self.unknown(name))?;
        factory()
    }

    fn unknown(&self, name: &str) -> RuntimeError {
        RuntimeError::UnknownRuntime {
            name: name.to_owned(),
            known: self.names().join(", "),
        }
    }
}

impl fmt::Debug for RuntimeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeRegistry")
            .field("runtimes", &self.names())
            .field("default", &self.default)
            .finish()
    }
}
