//! Batch status refresh

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::context::CallContext;
use crate::error::{Error, Result};
use crate::executor::{ExecutionPhase, ExecutionState};
use crate::plugin::{RemotePlugin, ResourceKey};
use crate::types::{Phase, PhaseInfo};

/// One cache entry handed to a refresher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheItem {
    pub id: String,
    pub state: ExecutionState,
}

impl CacheItem {
    pub fn new(id: impl Into<String>, state: ExecutionState) -> Self {
        Self { id: id.into(), state }
    }
}

/// Produces fresh states for a batch of cache entries
///
/// A batch either succeeds as a whole or fails as a whole. Returned items
/// are written back by id; items left out of the result keep their value.
#[async_trait]
pub trait Refresher: Send + Sync {
    async fn sync_batch(&self, ctx: &CallContext, batch: &[CacheItem]) -> Result<Vec<CacheItem>>;
}

/// Refresher that asks a plugin for each backend resource's status
pub struct PluginRefresher {
    plugin: Arc<dyn RemotePlugin>,
}

impl PluginRefresher {
    pub fn new(plugin: Arc<dyn RemotePlugin>) -> Self {
        Self { plugin }
    }

    async fn refresh(&self, ctx: &CallContext, item: &CacheItem) -> Result<ExecutionState> {
        let command_id = item
            .state
            .command_id()
            .ok_or_else(|| Error::cache_failed(&item.id, "entry has no backend command id"))?;

        let mut key = ResourceKey::named(command_id);
        if let Some(uri) = &item.state.uri {
            key = key.with_uri(uri.clone());
        }

        let resource = self.plugin.get(ctx, &key).await?;
        let info = self.plugin.status(ctx, &resource).await?;
        trace!(id = %item.id, phase = %info.phase, "Refreshed status");
        Ok(fold_phase(&item.state, &info))
    }
}

#[async_trait]
impl Refresher for PluginRefresher {
    async fn sync_batch(&self, ctx: &CallContext, batch: &[CacheItem]) -> Result<Vec<CacheItem>> {
        let mut updated = Vec::with_capacity(batch.len());
        for item in batch {
            // First failure aborts the batch
            let state = self.refresh(ctx, item).await?;
            updated.push(CacheItem::new(item.id.clone(), state));
        }
        debug!(
            plugin = %self.plugin.properties().id,
            items = updated.len(),
            "Batch refreshed"
        );
        Ok(updated)
    }
}

/// Fold a backend phase report into an execution state
pub fn fold_phase(state: &ExecutionState, info: &PhaseInfo) -> ExecutionState {
    match info.phase {
        Phase::Success => state.with_phase(ExecutionPhase::Succeeded),
        Phase::RetryableFailure | Phase::PermanentFailure => state.with_phase(ExecutionPhase::Failed),
        Phase::NotReady | Phase::Queued | Phase::Running => state.clone(),
    }
}
