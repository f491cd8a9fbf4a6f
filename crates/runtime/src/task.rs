//! `TaskSpec` — one agent entry of a workflow document.
//!
//! Defined here (in the runtime crate) so both the engine and individual
//! runtime implementations can import it without a circular dependency.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form JSON object passed into and returned from a runtime.
pub type Payload = Map<String, Value>;

/// A single task ("agent") in a workflow.
///
/// Field names match the workflow document format: `id`, `uses`,
/// `inputFrom`, `depends`, `params`, `inputKey`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    /// Unique identifier within the workflow.
    pub id: String,
    /// Opaque reference to the task implementation, interpreted by the runtime.
    #[serde(default)]
    pub uses: String,
    /// Tasks whose outputs feed this task's inputs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input_from: Vec<String>,
    /// Ordering-only constraints: these run first, but no data flows.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends: Vec<String>,
    /// Literal configuration merged into the task's inputs.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Payload,
    /// When set, take only this key from each `input_from` dependency's
    /// output instead of the whole output object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_key: Option<String>,
}

impl TaskSpec {
    /// Convenience constructor, mostly for tests.
    pub fn new(id: impl Into<String>, uses: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            uses: uses.into(),
            input_from: Vec::new(),
            depends: Vec::new(),
            params: Payload::new(),
            input_key: None,
        }
    }

    pub fn with_input_from<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_from = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_depends<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn with_input_key(mut self, key: impl Into<String>) -> Self {
        self.input_key = Some(key.into());
        self
    }

    /// Every task this one must wait for: `input_from` followed by `depends`,
    /// without duplicates, in declaration order.
    pub fn all_dependencies(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::with_capacity(self.input_from.len() + self.depends.len());
        for dep in self.input_from.iter().chain(&self.depends) {
            if !out.contains(&dep.as_str()) {
                out.push(dep);
            }
        }
        out
    }
}
