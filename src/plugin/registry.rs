//! Plugin registry
//!
//! Built once at startup from `PluginEntry` descriptors and read-only
//! afterwards. Loading runs every deferred loader and yields the
//! task-type → plugin table used by the engine.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::types::TaskType;

use super::{PluginSetupContext, RemotePlugin};

/// Deferred plugin factory, run once when the registry is loaded
pub type PluginLoader =
    Arc<dyn Fn(PluginSetupContext) -> BoxFuture<'static, Result<Arc<dyn RemotePlugin>>> + Send + Sync>;

// ─────────────────────────────────────────────────────────────────
// Plugin Entry
// ─────────────────────────────────────────────────────────────────

/// Registration descriptor of one plugin
#[derive(Clone)]
pub struct PluginEntry {
    /// Unique plugin id
    pub id: TaskType,

    /// Task types this plugin handles
    pub supported_task_types: Vec<TaskType>,

    /// Factory run at load time
    pub loader: PluginLoader,

    /// Whether this plugin handles task types nobody else claims
    pub is_default: bool,
}

impl PluginEntry {
    pub fn new<F, Fut>(id: impl Into<TaskType>, supported_task_types: Vec<TaskType>, loader: F) -> Self
    where
        F: Fn(PluginSetupContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn RemotePlugin>>> + Send + 'static,
    {
        Self {
            id: id.into(),
            supported_task_types,
            loader: Arc::new(move |setup| loader(setup).boxed()),
            is_default: false,
        }
    }

    /// Mark this entry as the default plugin
    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }
}

impl std::fmt::Debug for PluginEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginEntry")
            .field("id", &self.id)
            .field("supported_task_types", &self.supported_task_types)
            .field("is_default", &self.is_default)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────

/// Collects plugin entries, rejecting duplicates
#[derive(Debug, Default)]
pub struct PluginRegistryBuilder {
    entries: Vec<PluginEntry>,
}

impl PluginRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry
    ///
    /// Fails on an empty or duplicate id, or on a second default entry.
    pub fn register(&mut self, entry: PluginEntry) -> Result<&mut Self> {
        if entry.id.as_str().is_empty() {
            return Err(Error::PluginRegistration {
                id: String::new(),
                reason: "plugin id cannot be empty".to_string(),
            });
        }
        if self.entries.iter().any(|e| e.id == entry.id) {
            return Err(Error::PluginRegistration {
                id: entry.id.to_string(),
                reason: "a plugin with this id is already registered".to_string(),
            });
        }
        if entry.is_default {
            if let Some(existing) = self.entries.iter().find(|e| e.is_default) {
                return Err(Error::PluginRegistration {
                    id: entry.id.to_string(),
                    reason: format!("'{}' is already the default plugin", existing.id),
                });
            }
        }

        info!(
            plugin = %entry.id,
            task_types = ?entry.supported_task_types,
            default = entry.is_default,
            "Plugin registered"
        );
        self.entries.push(entry);
        Ok(self)
    }

    pub fn build(self) -> PluginRegistry {
        PluginRegistry {
            entries: self.entries,
        }
    }
}

/// Immutable set of registered plugins
#[derive(Debug, Clone)]
pub struct PluginRegistry {
    entries: Vec<PluginEntry>,
}

impl PluginRegistry {
    pub fn builder() -> PluginRegistryBuilder {
        PluginRegistryBuilder::new()
    }

    pub fn entries(&self) -> &[PluginEntry] {
        &self.entries
    }

    pub fn default_entry(&self) -> Option<&PluginEntry> {
        self.entries.iter().find(|e| e.is_default)
    }

    /// Run every loader and build the task-type table
    ///
    /// When two plugins claim the same task type, the one registered first
    /// keeps it.
    pub async fn load(&self, setup: &PluginSetupContext) -> Result<LoadedPlugins> {
        let mut by_task_type: HashMap<TaskType, Arc<dyn RemotePlugin>> = HashMap::new();
        let mut by_id = HashMap::new();
        let mut default = None;

        for entry in &self.entries {
            let plugin = (entry.loader)(setup.for_plugin(entry.id.as_str()))
                .await
                .map_err(|e| Error::PluginLoadFailed {
                    id: entry.id.to_string(),
                    message: e.to_string(),
                })?;

            for task_type in &entry.supported_task_types {
                if by_task_type.contains_key(task_type) {
                    warn!(
                        plugin = %entry.id,
                        task_type = %task_type,
                        "Task type already claimed by an earlier plugin"
                    );
                    continue;
                }
                by_task_type.insert(task_type.clone(), plugin.clone());
            }
            if entry.is_default {
                default = Some(plugin.clone());
            }
            by_id.insert(entry.id.clone(), plugin);
            info!(plugin = %entry.id, "Plugin loaded");
        }

        Ok(LoadedPlugins {
            by_task_type,
            by_id,
            default,
        })
    }
}

/// Loaded plugins, resolved by task type
#[derive(Clone)]
pub struct LoadedPlugins {
    by_task_type: HashMap<TaskType, Arc<dyn RemotePlugin>>,
    by_id: HashMap<TaskType, Arc<dyn RemotePlugin>>,
    default: Option<Arc<dyn RemotePlugin>>,
}

impl LoadedPlugins {
    /// Plugin for a task type, falling back to the default plugin
    pub fn resolve(&self, task_type: &TaskType) -> Result<Arc<dyn RemotePlugin>> {
        self.by_task_type
            .get(task_type)
            .or(self.default.as_ref())
            .cloned()
            .ok_or_else(|| Error::PluginNotFound {
                task_type: task_type.to_string(),
            })
    }

    /// Plugin by registration id
    pub fn by_id(&self, id: &TaskType) -> Option<Arc<dyn RemotePlugin>> {
        self.by_id.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
