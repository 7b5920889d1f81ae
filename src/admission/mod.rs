//! Admission control
//!
//! Tasks hold one allocation token from a per-namespace budget while they
//! run at the backend. The allocator itself sits behind the
//! `ResourceManager` trait; `AdmissionGate` is the engine's single entry
//! point to it and attaches cancellation, taxonomy tagging and logging.

mod lease;
mod memory;
mod namespace;

pub use lease::TokenLease;
pub use memory::InMemoryResourceManager;
pub use namespace::LabelResolver;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::context::CallContext;
use crate::error::Result;
use crate::plugin::{ResourceConstraintsSpec, ResourceNamespace, TaskExecutionContext};

// ─────────────────────────────────────────────────────────────────
// Allocator Contract
// ─────────────────────────────────────────────────────────────────

/// Outcome of an allocation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationStatus {
    /// The token is held
    Granted,
    /// The namespace pool has no free tokens
    Exhausted,
    /// A requested namespace or project ceiling is reached
    NamespaceQuotaExceeded,
    /// The allocator could not decide
    Undefined,
}

impl AllocationStatus {
    /// Denials are retried on the next tick; everything but a grant or
    /// a denial is a malfunction
    pub fn is_denied(&self) -> bool {
        matches!(self, AllocationStatus::Exhausted | AllocationStatus::NamespaceQuotaExceeded)
    }
}

impl fmt::Display for AllocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AllocationStatus::Granted => "Granted",
            AllocationStatus::Exhausted => "Exhausted",
            AllocationStatus::NamespaceQuotaExceeded => "NamespaceQuotaExceeded",
            AllocationStatus::Undefined => "Undefined",
        };
        f.write_str(s)
    }
}

/// One allocation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationRequest {
    /// Stable per-task token id
    pub token_id: String,

    /// Project of the requesting task, for project-scoped ceilings
    pub project: String,

    /// Ceilings requested by the plugin
    pub constraints: ResourceConstraintsSpec,
}

/// Admission allocator
///
/// Allocating a token that is already held returns `Granted`. Releasing a
/// token that is not held succeeds.
#[async_trait]
pub trait ResourceManager: Send + Sync {
    async fn allocate(&self, namespace: &ResourceNamespace, request: &AllocationRequest) -> Result<AllocationStatus>;

    async fn release(&self, namespace: &ResourceNamespace, token_id: &str) -> Result<()>;

    /// Namespace a held token was granted in, for allocators that record it
    async fn granted_namespace(&self, _token_id: &str) -> Result<Option<ResourceNamespace>> {
        Ok(None)
    }
}

// ─────────────────────────────────────────────────────────────────
// Admission Gate
// ─────────────────────────────────────────────────────────────────

/// Engine-side client of the allocator
#[derive(Clone)]
pub struct AdmissionGate {
    manager: Arc<dyn ResourceManager>,
}

impl AdmissionGate {
    pub fn new(manager: Arc<dyn ResourceManager>) -> Self {
        Self { manager }
    }

    /// Gate over the allocator handed to this task
    pub fn for_task(tctx: &TaskExecutionContext) -> Self {
        Self::new(tctx.resource_manager())
    }

    /// Request one token for the task
    ///
    /// Allocator errors come back as `ResourceManagerFailure`; cancellation
    /// comes back as is.
    pub async fn allocate(
        &self,
        ctx: &CallContext,
        namespace: &ResourceNamespace,
        request: &AllocationRequest,
    ) -> Result<AllocationStatus> {
        let status = ctx
            .run("allocate", self.manager.allocate(namespace, request))
            .await
            .map_err(|e| e.into_resource_manager(&request.token_id))?;

        info!(
            namespace = %namespace,
            token = %request.token_id,
            status = %status,
            "Allocation result"
        );
        Ok(status)
    }

    /// Release the task's token
    pub async fn release(&self, ctx: &CallContext, namespace: &ResourceNamespace, token_id: &str) -> Result<()> {
        ctx.run("release", self.manager.release(namespace, token_id))
            .await
            .map_err(|e| {
                warn!(namespace = %namespace, token = token_id, error = %e, "Token release failed");
                e.into_resource_manager(token_id)
            })?;
        debug!(namespace = %namespace, token = token_id, "Token released");
        Ok(())
    }

    /// Namespace the allocator recorded for a held token
    pub async fn granted_namespace(&self, ctx: &CallContext, token_id: &str) -> Result<Option<ResourceNamespace>> {
        ctx.run("granted_namespace", self.manager.granted_namespace(token_id))
            .await
            .map_err(|e| e.into_resource_manager(token_id))
    }

    /// Guard that releases the token when dropped unless released first
    pub fn lease(&self, namespace: ResourceNamespace, token_id: impl Into<String>) -> TokenLease {
        TokenLease::new(self.manager.clone(), namespace, token_id.into())
    }
}

impl fmt::Debug for AdmissionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionGate").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuotaSettings;
    use crate::error::{Error, ErrorKind};

    struct BrokenManager;

    #[async_trait]
    impl ResourceManager for BrokenManager {
        async fn allocate(&self, _ns: &ResourceNamespace, _req: &AllocationRequest) -> Result<AllocationStatus> {
            Err(Error::Internal("redis unreachable".to_string()))
        }

        async fn release(&self, _ns: &ResourceNamespace, _token_id: &str) -> Result<()> {
            Err(Error::Internal("redis unreachable".to_string()))
        }
    }

    fn request(token: &str) -> AllocationRequest {
        AllocationRequest {
            token_id: token.to_string(),
            project: "p".to_string(),
            constraints: ResourceConstraintsSpec::default(),
        }
    }

    #[tokio::test]
    async fn test_gate_tags_allocator_errors() {
        let gate = AdmissionGate::new(Arc::new(BrokenManager));
        let ctx = CallContext::background();
        let ns = ResourceNamespace::from("prod-1");

        let err = gate.allocate(&ctx, &ns, &request("t1")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceManagerFailure);

        let err = gate.release(&ctx, &ns, "t1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceManagerFailure);
    }

    #[tokio::test]
    async fn test_gate_keeps_cancellation() {
        let gate = AdmissionGate::new(Arc::new(InMemoryResourceManager::new(QuotaSettings::default())));
        let ctx = CallContext::background();
        ctx.cancel();

        let err = gate
            .allocate(&ctx, &ResourceNamespace::from("prod-1"), &request("t1"))
            .await
            .unwrap_err();
        assert!(err.is_cancellation());
    }

    #[tokio::test]
    async fn test_granted_namespace_defaults_to_unknown() {
        let gate = AdmissionGate::new(Arc::new(BrokenManager));
        let recorded = gate.granted_namespace(&CallContext::background(), "t1").await.unwrap();
        assert_eq!(recorded, None);
    }

    #[test]
    fn test_denied_statuses() {
        assert!(AllocationStatus::Exhausted.is_denied());
        assert!(AllocationStatus::NamespaceQuotaExceeded.is_denied());
        assert!(!AllocationStatus::Granted.is_denied());
        assert!(!AllocationStatus::Undefined.is_denied());
    }
}
