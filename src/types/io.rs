//! Readers and writers handed to plugins per invocation
//!
//! The orchestrator owns storage of templates, inputs and outputs; plugins
//! only see these narrow traits.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

use super::TaskTemplate;

/// Reads the task template for the current execution
#[async_trait]
pub trait TaskReader: Send + Sync {
    async fn read(&self) -> Result<TaskTemplate>;
}

/// Reads the literal inputs of the current execution
#[async_trait]
pub trait InputReader: Send + Sync {
    /// Get all inputs keyed by name
    async fn get(&self) -> Result<Map<String, Value>>;
}

/// Records the outputs of the current execution
#[async_trait]
pub trait OutputWriter: Send + Sync {
    /// Store the outputs; calling again with the same value is a no-op
    async fn put(&self, outputs: Value) -> Result<()>;
}

// ─────────────────────────────────────────────────────────────────
// In-memory implementations
// ─────────────────────────────────────────────────────────────────

/// Task reader over an already decoded template
#[derive(Debug, Clone)]
pub struct StaticTaskReader {
    template: TaskTemplate,
}

impl StaticTaskReader {
    pub fn new(template: TaskTemplate) -> Self {
        Self { template }
    }
}

#[async_trait]
impl TaskReader for StaticTaskReader {
    async fn read(&self) -> Result<TaskTemplate> {
        Ok(self.template.clone())
    }
}

/// Input reader over a fixed map of inputs
#[derive(Debug, Clone, Default)]
pub struct MemoryInputReader {
    inputs: Map<String, Value>,
}

impl MemoryInputReader {
    pub fn new(inputs: Map<String, Value>) -> Self {
        Self { inputs }
    }
}

#[async_trait]
impl InputReader for MemoryInputReader {
    async fn get(&self) -> Result<Map<String, Value>> {
        Ok(self.inputs.clone())
    }
}

/// Output writer that keeps the last written outputs in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryOutputWriter {
    outputs: Arc<RwLock<Option<Value>>>,
    fail_writes: bool,
}

impl MemoryOutputWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writer whose every `put` fails, for exercising error paths
    pub fn failing() -> Self {
        Self {
            outputs: Arc::default(),
            fail_writes: true,
        }
    }

    /// Last written outputs
    pub fn outputs(&self) -> Option<Value> {
        self.outputs.read().clone()
    }
}

#[async_trait]
impl OutputWriter for MemoryOutputWriter {
    async fn put(&self, outputs: Value) -> Result<()> {
        if self.fail_writes {
            return Err(Error::Runtime("output store rejected write".to_string()));
        }
        *self.outputs.write() = Some(outputs);
        Ok(())
    }
}
