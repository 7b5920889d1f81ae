//! Status poll cache
//!
//! Submitted tasks are observed through a shared cache keyed by the task's
//! unique id. Reconciliation only reads the cache; a background loop owned
//! by the cache polls the backend in batches and writes fresh states back.

mod auto_refresh;
mod refresher;

pub use auto_refresh::{AutoRefreshCache, SyncReport};
pub use refresher::{CacheItem, PluginRefresher, Refresher};

use async_trait::async_trait;

use crate::error::Result;
use crate::executor::ExecutionState;

/// Shared cache of execution states for submitted tasks
#[async_trait]
pub trait ExecutionCache: Send + Sync {
    /// Insert `seed` under `id` if absent, then return the current value
    ///
    /// An existing entry is never overwritten: later calls observe the
    /// latest refreshed state, not the seed passed in.
    async fn get_or_create(&self, id: &str, seed: ExecutionState) -> Result<ExecutionState>;

    /// Drop the entry for `id`; evicting a missing key succeeds
    async fn evict(&self, id: &str) -> Result<()>;
}
