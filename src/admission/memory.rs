//! In-process admission allocator
//!
//! Tokens are tracked per namespace. Pool sizes come from `[quotas]`; a
//! request may tighten them with `ResourceConstraintsSpec`. The namespace
//! of every grant is recorded so a token can be released without knowing
//! where it was granted.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::QuotaSettings;
use crate::error::Result;
use crate::plugin::ResourceNamespace;

use super::{AllocationRequest, AllocationStatus, ResourceManager};

/// Token id → owning project
type Pool = HashMap<String, String>;

#[derive(Debug, Default)]
struct Pools {
    by_namespace: HashMap<ResourceNamespace, Pool>,
    /// Token id → namespace of its latest grant
    grants: HashMap<String, ResourceNamespace>,
}

/// Allocator backed by in-memory per-namespace pools
#[derive(Debug)]
pub struct InMemoryResourceManager {
    quotas: QuotaSettings,
    pools: Mutex<Pools>,
}

impl InMemoryResourceManager {
    pub fn new(quotas: QuotaSettings) -> Self {
        Self {
            quotas,
            pools: Mutex::new(Pools::default()),
        }
    }

    /// Tokens currently held in a namespace
    pub fn held(&self, namespace: &ResourceNamespace) -> usize {
        self.pools.lock().by_namespace.get(namespace).map_or(0, Pool::len)
    }

    /// Whether a token is held in a namespace
    pub fn holds(&self, namespace: &ResourceNamespace, token_id: &str) -> bool {
        self.pools
            .lock()
            .by_namespace
            .get(namespace)
            .is_some_and(|pool| pool.contains_key(token_id))
    }

    fn decide(&self, namespace: &ResourceNamespace, pool: &Pool, request: &AllocationRequest) -> AllocationStatus {
        if pool.len() >= self.quotas.limit_for(namespace.as_str()) {
            return AllocationStatus::Exhausted;
        }

        let constraints = &request.constraints;
        if constraints.namespace_scope_limit.is_some_and(|limit| pool.len() >= limit) {
            return AllocationStatus::NamespaceQuotaExceeded;
        }
        if let Some(limit) = constraints.project_scope_limit {
            let project_held = pool.values().filter(|p| **p == request.project).count();
            if project_held >= limit {
                return AllocationStatus::NamespaceQuotaExceeded;
            }
        }

        AllocationStatus::Granted
    }
}

#[async_trait]
impl ResourceManager for InMemoryResourceManager {
    async fn allocate(&self, namespace: &ResourceNamespace, request: &AllocationRequest) -> Result<AllocationStatus> {
        let mut pools = self.pools.lock();
        let Pools { by_namespace, grants } = &mut *pools;
        let pool = by_namespace.entry(namespace.clone()).or_default();

        if pool.contains_key(&request.token_id) {
            return Ok(AllocationStatus::Granted);
        }

        let status = self.decide(namespace, pool, request);
        if status == AllocationStatus::Granted {
            pool.insert(request.token_id.clone(), request.project.clone());
            grants.insert(request.token_id.clone(), namespace.clone());
        }
        debug!(namespace = %namespace, held = pool.len(), status = %status, "In-memory allocation");
        Ok(status)
    }

    async fn release(&self, namespace: &ResourceNamespace, token_id: &str) -> Result<()> {
        let mut pools = self.pools.lock();
        let removed = pools
            .by_namespace
            .get_mut(namespace)
            .and_then(|pool| pool.remove(token_id))
            .is_some();
        if pools.grants.get(token_id) == Some(namespace) {
            pools.grants.remove(token_id);
        }
        if !removed {
            debug!(namespace = %namespace, token = token_id, "Release of a token that is not held");
        }
        Ok(())
    }

    async fn granted_namespace(&self, token_id: &str) -> Result<Option<ResourceNamespace>> {
        Ok(self.pools.lock().grants.get(token_id).cloned())
    }
}
