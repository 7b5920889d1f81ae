//! Task identity and execution metadata
//!
//! These types describe *which* task execution a plugin is working on. They
//! are supplied by the orchestrator on every invocation.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────
// Task Type
// ─────────────────────────────────────────────────────────────────

/// Task type string used to select a plugin (e.g. "hive", "presto")
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ─────────────────────────────────────────────────────────────────
// Execution Identity
// ─────────────────────────────────────────────────────────────────

/// Identifies one attempt of one task inside a workflow execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskExecutionId {
    /// Project the workflow execution belongs to
    pub project: String,

    /// Domain (e.g. development, production)
    pub domain: String,

    /// Workflow execution name
    pub execution_name: String,

    /// Node within the workflow
    pub node_id: String,

    /// Task name
    pub task_name: String,

    /// Zero-based retry attempt
    #[serde(default)]
    pub retry_attempt: u32,
}

impl TaskExecutionId {
    /// Human readable identifier used in logs
    pub fn id_string(&self) -> String {
        format!(
            "{}:{}:{}/{}/{}#{}",
            self.project, self.domain, self.execution_name, self.node_id, self.task_name, self.retry_attempt
        )
    }
}

impl fmt::Display for TaskExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id_string())
    }
}

/// Object that owns the task execution on the host platform
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

impl fmt::Display for OwnerReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Execution metadata handed to a plugin on every invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskExecutionMetadata {
    /// Task execution identity
    pub task_execution_id: TaskExecutionId,

    /// Host namespace the execution runs under
    pub namespace: String,

    /// Labels attached to the execution
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Unique, stable name generated for this attempt
    ///
    /// Used as the admission token id and the cache key, and as the seed
    /// for deterministic backend resource names.
    pub generated_name: String,

    /// Owner of the execution
    #[serde(default)]
    pub owner_reference: OwnerReference,
}

impl TaskExecutionMetadata {
    /// Project of the owning workflow execution
    pub fn project(&self) -> &str {
        &self.task_execution_id.project
    }

    /// Domain of the owning workflow execution
    pub fn domain(&self) -> &str {
        &self.task_execution_id.domain
    }

    /// Stable per-task id
    pub fn unique_id(&self) -> &str {
        &self.generated_name
    }
}

// ─────────────────────────────────────────────────────────────────
// Task Template
// ─────────────────────────────────────────────────────────────────

/// Task template as registered by the SDK
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTemplate {
    /// Task type used for plugin selection
    pub task_type: TaskType,

    /// Plugin specific payload
    #[serde(default)]
    pub custom: serde_json::Value,
}

impl TaskTemplate {
    pub fn new(task_type: impl Into<TaskType>, custom: serde_json::Value) -> Self {
        Self {
            task_type: task_type.into(),
            custom,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_id() -> TaskExecutionId {
        TaskExecutionId {
            project: "flytesnacks".to_string(),
            domain: "development".to_string(),
            execution_name: "exec-1".to_string(),
            node_id: "n0".to_string(),
            task_name: "query".to_string(),
            retry_attempt: 1,
        }
    }

    #[test]
    fn test_task_type_display() {
        let t = TaskType::from("hive");
        assert_eq!(t.to_string(), "hive");
        assert_eq!(serde_json::to_string(&t).unwrap(), "\"hive\"");
    }

    #[test]
    fn test_id_string() {
        assert_eq!(make_id().id_string(), "flytesnacks:development:exec-1/n0/query#1");
    }

    #[test]
    fn test_metadata_accessors() {
        let meta = TaskExecutionMetadata {
            task_execution_id: make_id(),
            namespace: "flytesnacks-development".to_string(),
            labels: BTreeMap::new(),
            generated_name: "exec-1-n0-1".to_string(),
            owner_reference: OwnerReference::default(),
        };
        assert_eq!(meta.project(), "flytesnacks");
        assert_eq!(meta.domain(), "development");
        assert_eq!(meta.unique_id(), "exec-1-n0-1");
    }
}
