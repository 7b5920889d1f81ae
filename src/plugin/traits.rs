//! Remote plugin contract
//!
//! Defines the `RemotePlugin` trait every remote execution backend
//! implements, and the value types that flow through it.

use std::fmt;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::context::CallContext;
use crate::error::{Error, Result};
use crate::types::PhaseInfo;

use super::TaskExecutionContext;

// ─────────────────────────────────────────────────────────────────
// Plugin Properties
// ─────────────────────────────────────────────────────────────────

/// Static capability descriptor of a plugin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginProperties {
    /// Plugin id, unique across the registry
    pub id: String,

    /// Prefix of the deterministic resource names sent to the backend
    pub resource_name_prefix: String,

    /// Whether tasks must hold an admission token before creation
    pub requires_admission: bool,

    /// Largest number of resources fetched in one refresh batch
    pub max_batch_size: usize,
}

impl Default for PluginProperties {
    fn default() -> Self {
        Self {
            id: "remote".to_string(),
            resource_name_prefix: "rx".to_string(),
            requires_admission: true,
            max_batch_size: 10,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Resource Types
// ─────────────────────────────────────────────────────────────────

/// Quota partition key for admission tokens
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceNamespace(String);

impl ResourceNamespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ResourceNamespace {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for ResourceNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Optional tighter ceilings a plugin requests for one allocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConstraintsSpec {
    /// Maximum tokens held in the namespace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace_scope_limit: Option<usize>,

    /// Maximum tokens held by the task's project within the namespace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_scope_limit: Option<usize>,
}

/// Handle of one remote resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceKey {
    /// Backend-assigned or derived name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Console link for the resource, when the backend returns one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

impl ResourceKey {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            uri: None,
        }
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// The name, or an error naming the operation that needed it
    pub fn require_name(&self, operation: &str) -> Result<&str> {
        self.name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::Internal(format!("{} requires a named resource key", operation)))
    }
}

/// Opaque resource payload returned by `RemotePlugin::get`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resource(serde_json::Value);

impl Resource {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Wrap any serializable backend response
    pub fn from_serializable<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self(serde_json::to_value(value)?))
    }

    /// Decode the payload into a plugin specific type
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.0.clone()).map_err(|e| {
            Error::Internal(format!("resource payload does not match the plugin's type: {}", e))
        })
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

// ─────────────────────────────────────────────────────────────────
// RemotePlugin Trait
// ─────────────────────────────────────────────────────────────────

/// Capability interface of a remote execution backend
///
/// Implementations are shared across tasks and must be `Send + Sync`.
/// Every network call must honor the supplied `CallContext`.
#[async_trait]
pub trait RemotePlugin: Send + Sync {
    /// Static capability descriptor
    fn properties(&self) -> PluginProperties;

    /// Admission namespace and constraints for the task
    ///
    /// Must not perform network I/O.
    async fn resource_requirements(
        &self,
        ctx: &CallContext,
        tctx: &TaskExecutionContext,
    ) -> Result<(ResourceNamespace, ResourceConstraintsSpec)>;

    /// Create the remote resource for the task
    ///
    /// Calling this more than once for the same task must not create a
    /// second resource.
    async fn create(&self, ctx: &CallContext, tctx: &TaskExecutionContext) -> Result<ResourceKey>;

    /// Fetch the current state of a resource
    async fn get(&self, ctx: &CallContext, key: &ResourceKey) -> Result<Resource>;

    /// Delete or cancel a resource; deleting an absent resource succeeds
    async fn delete(&self, ctx: &CallContext, key: &ResourceKey) -> Result<()>;

    /// Translate a fetched resource into a phase report
    async fn status(&self, ctx: &CallContext, resource: &Resource) -> Result<PhaseInfo>;
}
