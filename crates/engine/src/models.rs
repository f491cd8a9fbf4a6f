//! Workflow document model.
//!
//! A workflow is authored as YAML or JSON:
//!
//! ```yaml
//! name: research
//! description: fetch a page and summarise it
//! version: "1.0"
//! agents:
//!   - id: fetch
//!     uses: tools/http-get
//!     params: { url: "https://example.com" }
//!   - id: summarize
//!     uses: llm/summarizer
//!     inputFrom: [fetch]
//! ```
//!
//! The field names are a compatibility contract with existing workflow
//! files; see [`TaskSpec`] for the per-agent fields.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

pub use runtime::TaskSpec;

use crate::EngineError;

// ---------------------------------------------------------------------------
// WorkflowSpec
// ---------------------------------------------------------------------------

/// A complete workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Free-form version label. Numeric YAML values such as `1.0` are accepted.
    #[serde(default, deserialize_with = "string_or_number")]
    pub version: String,
    /// Tasks in authoring order. The order breaks ties during scheduling.
    #[serde(default)]
    pub agents: Vec<TaskSpec>,
}

impl WorkflowSpec {
    /// Convenience constructor for testing.
    pub fn new(name: impl Into<String>, agents: Vec<TaskSpec>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            version: String::new(),
            agents,
        }
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, EngineError> {
        serde_yaml::from_str(raw).map_err(|e| EngineError::InvalidDocument(e.to_string()))
    }

    pub fn from_json_str(raw: &str) -> Result<Self, EngineError> {
        serde_json::from_str(raw).map_err(|e| EngineError::InvalidDocument(e.to_string()))
    }

    /// Read a workflow file. `.json` files are parsed as JSON, anything
    /// else as YAML.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let raw = std::fs::read_to_string(path)?;
        match DocumentFormat::from_path(path) {
            DocumentFormat::Json => Self::from_json_str(&raw),
            DocumentFormat::Yaml => Self::from_yaml_str(&raw),
        }
    }

    /// Look up a task by ID.
    pub fn task(&self, id: &str) -> Option<&TaskSpec> {
        self.agents.iter().find(|t| t.id == id)
    }

    /// Check that task IDs are non-empty and unique.
    pub fn validate_ids(&self) -> Result<(), EngineError> {
        let mut seen: HashSet<&str> = HashSet::with_capacity(self.agents.len());
        for (index, task) in self.agents.iter().enumerate() {
            if task.id.trim().is_empty() {
                return Err(EngineError::EmptyTaskId { index });
            }
            if !seen.insert(task.id.as_str()) {
                return Err(EngineError::DuplicateTaskId(task.id.clone()));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DocumentFormat
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Yaml,
    Json,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Yaml,
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Int(i64),
        Float(f64),
        Null,
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s,
        Raw::Int(i) => i.to_string(),
        Raw::Float(f) => f.to_string(),
        Raw::Null => String::new(),
    })
}
