//! Capabilities handed to plugins

use std::sync::Arc;

use crate::admission::ResourceManager;
use crate::metrics::MetricsScope;
use crate::secrets::SecretManager;
use crate::types::{InputReader, OutputWriter, TaskExecutionMetadata, TaskReader};

/// Setup-time capabilities, given once to a plugin loader
#[derive(Clone)]
pub struct PluginSetupContext {
    metrics: MetricsScope,
    secrets: Arc<dyn SecretManager>,
}

impl PluginSetupContext {
    pub fn new(metrics: MetricsScope, secrets: Arc<dyn SecretManager>) -> Self {
        Self { metrics, secrets }
    }

    /// Scope to publish the plugin's metrics under
    pub fn metrics_scope(&self) -> &MetricsScope {
        &self.metrics
    }

    pub fn secret_manager(&self) -> Arc<dyn SecretManager> {
        self.secrets.clone()
    }

    /// Same capabilities with the metrics scope narrowed to one plugin
    pub(crate) fn for_plugin(&self, id: &str) -> Self {
        Self {
            metrics: self.metrics.sub_scope(id),
            secrets: self.secrets.clone(),
        }
    }
}

/// Per-invocation capabilities for one task execution
#[derive(Clone)]
pub struct TaskExecutionContext {
    metadata: TaskExecutionMetadata,
    task_reader: Arc<dyn TaskReader>,
    input_reader: Arc<dyn InputReader>,
    output_writer: Arc<dyn OutputWriter>,
    resource_manager: Arc<dyn ResourceManager>,
    secrets: Arc<dyn SecretManager>,
}

impl TaskExecutionContext {
    pub fn new(
        metadata: TaskExecutionMetadata,
        task_reader: Arc<dyn TaskReader>,
        input_reader: Arc<dyn InputReader>,
        output_writer: Arc<dyn OutputWriter>,
        resource_manager: Arc<dyn ResourceManager>,
        secrets: Arc<dyn SecretManager>,
    ) -> Self {
        Self {
            metadata,
            task_reader,
            input_reader,
            output_writer,
            resource_manager,
            secrets,
        }
    }

    pub fn metadata(&self) -> &TaskExecutionMetadata {
        &self.metadata
    }

    pub fn task_reader(&self) -> &dyn TaskReader {
        self.task_reader.as_ref()
    }

    pub fn input_reader(&self) -> &dyn InputReader {
        self.input_reader.as_ref()
    }

    pub fn output_writer(&self) -> &dyn OutputWriter {
        self.output_writer.as_ref()
    }

    pub fn resource_manager(&self) -> Arc<dyn ResourceManager> {
        self.resource_manager.clone()
    }

    pub fn secret_manager(&self) -> &dyn SecretManager {
        self.secrets.as_ref()
    }

    /// Stable per-task id: admission token id and cache key
    pub fn unique_id(&self) -> &str {
        self.metadata.unique_id()
    }
}

impl std::fmt::Debug for TaskExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutionContext")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}
