//! Sharded in-memory cache with a background refresh loop

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{FuturesUnordered, StreamExt};
use parking_lot::RwLock;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CacheSettings;
use crate::context::CallContext;
use crate::error::{Error, Result};
use crate::executor::ExecutionState;
use crate::metrics::{Counter, MetricsScope};

use super::{CacheItem, ExecutionCache, Refresher};

const SHARD_COUNT: usize = 16;

type Shard = RwLock<HashMap<String, ExecutionState>>;

/// Outcome of one refresh pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Entries written back with a fresh state
    pub refreshed: usize,
    /// Batches whose refresh failed
    pub failed_batches: usize,
    /// Entries whose failure counter was bumped
    pub failed_items: usize,
}

#[derive(Debug, Clone)]
struct CacheMetrics {
    refreshed: Counter,
    batch_failures: Counter,
}

/// Auto-refreshing execution cache
///
/// Terminal entries are no longer polled. They hold their slot until the
/// engine evicts them.
pub struct AutoRefreshCache {
    name: String,
    settings: CacheSettings,
    shards: Vec<Shard>,
    len: AtomicUsize,
    metrics: CacheMetrics,
}

impl AutoRefreshCache {
    pub fn new(name: impl Into<String>, settings: CacheSettings, scope: &MetricsScope) -> Self {
        let scope = scope.sub_scope("cache");
        Self {
            name: name.into(),
            settings,
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect(),
            len: AtomicUsize::new(0),
            metrics: CacheMetrics {
                refreshed: scope.counter("refreshed"),
                batch_failures: scope.counter("batch_failures"),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current value of an entry
    pub fn get(&self, id: &str) -> Option<ExecutionState> {
        self.shard(id).read().get(id).cloned()
    }

    /// Remove an entry and free its slot
    pub fn remove(&self, id: &str) -> Option<ExecutionState> {
        let removed = self.shard(id).write().remove(id);
        if removed.is_some() {
            self.len.fetch_sub(1, Ordering::AcqRel);
            debug!(cache = %self.name, id, "Entry evicted");
        }
        removed
    }

    fn shard(&self, id: &str) -> &Shard {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    fn insert_if_absent(&self, id: &str, seed: ExecutionState) -> Result<ExecutionState> {
        if let Some(existing) = self.shard(id).read().get(id) {
            return Ok(existing.clone());
        }

        let mut shard = self.shard(id).write();
        if let Some(existing) = shard.get(id) {
            return Ok(existing.clone());
        }

        let reserved = self
            .len
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.settings.max_size).then_some(n + 1)
            })
            .is_ok();
        if !reserved {
            return Err(Error::CacheFull {
                key: id.to_string(),
                capacity: self.settings.max_size,
            });
        }

        shard.insert(id.to_string(), seed.clone());
        debug!(cache = %self.name, id, "Entry added");
        Ok(seed)
    }

    /// Entries still waiting for a terminal phase
    fn pending(&self) -> Vec<CacheItem> {
        let mut items: Vec<CacheItem> = self
            .shards
            .iter()
            .flat_map(|shard| {
                shard
                    .read()
                    .iter()
                    .filter(|(_, state)| !state.in_terminal_state())
                    .map(|(id, state)| CacheItem::new(id.clone(), state.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        items
    }

    fn write_back(&self, items: Vec<CacheItem>) -> usize {
        let mut written = 0;
        for item in items {
            let mut shard = self.shard(&item.id).write();
            if let Some(slot) = shard.get_mut(&item.id) {
                *slot = item.state;
                written += 1;
            }
        }
        written
    }

    fn mark_failed(&self, batch: &[CacheItem]) -> usize {
        let mut marked = 0;
        for item in batch {
            let mut shard = self.shard(&item.id).write();
            if let Some(slot) = shard.get_mut(&item.id) {
                slot.sync_failure_count = slot.sync_failure_count.saturating_add(1);
                marked += 1;
            }
        }
        marked
    }

    /// Run one refresh pass over every non-terminal entry
    pub async fn sync_once(&self, ctx: &CallContext, refresher: &dyn Refresher) -> SyncReport {
        let pending = self.pending();
        if pending.is_empty() {
            return SyncReport::default();
        }

        let batch_size = self.settings.batch_size.max(1);
        let batches: Vec<Vec<CacheItem>> = pending.chunks(batch_size).map(<[CacheItem]>::to_vec).collect();
        let batch_count = batches.len();

        // At most `workers` batches are in flight
        let workers = Semaphore::new(self.settings.effective_workers().max(1));
        let mut in_flight = FuturesUnordered::new();
        for batch in batches {
            let workers = &workers;
            in_flight.push(async move {
                let result = match workers.acquire().await {
                    Ok(_permit) => ctx.run("sync_batch", refresher.sync_batch(ctx, &batch)).await,
                    Err(_) => Err(Error::Internal("refresh worker pool closed".to_string())),
                };
                (batch, result)
            });
        }

        let mut report = SyncReport::default();
        while let Some((batch, result)) = in_flight.next().await {
            match result {
                Ok(items) => report.refreshed += self.write_back(items),
                Err(e) => {
                    warn!(cache = %self.name, items = batch.len(), error = %e, "Batch refresh failed");
                    report.failed_batches += 1;
                    report.failed_items += self.mark_failed(&batch);
                }
            }
        }

        self.metrics.refreshed.add(report.refreshed as u64);
        self.metrics.batch_failures.add(report.failed_batches as u64);
        debug!(
            cache = %self.name,
            batches = batch_count,
            refreshed = report.refreshed,
            failed_batches = report.failed_batches,
            "Refresh pass complete"
        );
        report
    }

    /// Spawn the background refresh loop; it stops when `token` is cancelled
    pub fn start(self: &Arc<Self>, refresher: Arc<dyn Refresher>, token: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let period = self.settings.resync_period();

        tokio::spawn(async move {
            let ctx = CallContext::with_token(token.clone());
            let mut timer = tokio::time::interval(period);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            info!(cache = %cache.name, period_ms = period.as_millis() as u64, "Refresh loop started");
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = timer.tick() => {
                        cache.sync_once(&ctx, refresher.as_ref()).await;
                    }
                }
            }
            info!(cache = %cache.name, "Refresh loop stopped");
        })
    }
}

#[async_trait]
impl ExecutionCache for AutoRefreshCache {
    async fn get_or_create(&self, id: &str, seed: ExecutionState) -> Result<ExecutionState> {
        self.insert_if_absent(id, seed)
    }

    async fn evict(&self, id: &str) -> Result<()> {
        self.remove(id);
        Ok(())
    }
}

impl std::fmt::Debug for AutoRefreshCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoRefreshCache")
            .field("name", &self.name)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutionPhase;
    use parking_lot::Mutex;

    fn settings(batch_size: usize, max_size: usize) -> CacheSettings {
        CacheSettings {
            resync_period_ms: 10,
            workers: 2,
            batch_size,
            max_size,
        }
    }

    fn submitted(id: &str) -> ExecutionState {
        ExecutionState {
            phase: ExecutionPhase::Submitted,
            command_id: Some(id.to_string()),
            ..Default::default()
        }
    }

    /// Marks every item succeeded, or fails batches containing `poison`
    struct ScriptedRefresher {
        poison: Option<String>,
        batches: Mutex<Vec<usize>>,
    }

    impl ScriptedRefresher {
        fn new(poison: Option<&str>) -> Self {
            Self {
                poison: poison.map(str::to_string),
                batches: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Refresher for ScriptedRefresher {
        async fn sync_batch(&self, _ctx: &CallContext, batch: &[CacheItem]) -> Result<Vec<CacheItem>> {
            self.batches.lock().push(batch.len());
            if batch.iter().any(|i| Some(&i.id) == self.poison.as_ref()) {
                return Err(Error::backend("lookup failed"));
            }
            Ok(batch
                .iter()
                .map(|i| CacheItem::new(i.id.clone(), i.state.with_phase(ExecutionPhase::Succeeded)))
                .collect())
        }
    }

    #[tokio::test]
    async fn test_get_or_create_ignores_later_seed() {
        let cache = AutoRefreshCache::new("t", settings(10, 100), &MetricsScope::new("test"));

        let first = cache.get_or_create("a", submitted("Q1")).await.unwrap();
        assert_eq!(first, submitted("Q1"));

        let again = cache.get_or_create("a", submitted("Q999")).await.unwrap();
        assert_eq!(again.command_id.as_deref(), Some("Q1"));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_capacity() {
        let cache = AutoRefreshCache::new("t", settings(10, 1), &MetricsScope::new("test"));
        cache.get_or_create("a", submitted("Q1")).await.unwrap();

        let err = cache.get_or_create("b", submitted("Q2")).await.unwrap_err();
        assert!(matches!(err, Error::CacheFull { capacity: 1, .. }));
        // Existing keys are still served at capacity
        assert!(cache.get_or_create("a", submitted("Q1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_evict_frees_capacity() {
        let cache = AutoRefreshCache::new("t", settings(10, 1), &MetricsScope::new("test"));
        cache.get_or_create("a", submitted("Q1")).await.unwrap();

        cache.evict("a").await.unwrap();
        cache.evict("a").await.unwrap();
        assert!(cache.is_empty());

        let b = cache.get_or_create("b", submitted("Q2")).await.unwrap();
        assert_eq!(b.command_id.as_deref(), Some("Q2"));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_sync_batches_and_skips_terminal() {
        let cache = AutoRefreshCache::new("t", settings(2, 100), &MetricsScope::new("test"));
        for i in 0..5 {
            cache.get_or_create(&format!("k{}", i), submitted("Q")).await.unwrap();
        }

        let refresher = ScriptedRefresher::new(None);
        let report = cache.sync_once(&CallContext::background(), &refresher).await;
        assert_eq!(report.refreshed, 5);
        let mut sizes = refresher.batches.lock().clone();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![1, 2, 2]);

        // Everything is terminal now
        let report = cache.sync_once(&CallContext::background(), &refresher).await;
        assert_eq!(report, SyncReport::default());
    }

    #[tokio::test]
    async fn test_failed_batch_counts_every_item() {
        let cache = AutoRefreshCache::new("t", settings(2, 100), &MetricsScope::new("test"));
        for id in ["a", "b", "c"] {
            cache.get_or_create(id, submitted("Q")).await.unwrap();
        }

        // Batches are [a, b] and [c]; "a" poisons the first
        let refresher = ScriptedRefresher::new(Some("a"));
        let report = cache.sync_once(&CallContext::background(), &refresher).await;
        assert_eq!(report.failed_batches, 1);
        assert_eq!(report.failed_items, 2);
        assert_eq!(report.refreshed, 1);

        for id in ["a", "b"] {
            let state = cache.get(id).unwrap();
            assert_eq!(state.phase, ExecutionPhase::Submitted);
            assert_eq!(state.sync_failure_count, 1);
        }
        assert_eq!(cache.get("c").unwrap().phase, ExecutionPhase::Succeeded);
    }

    #[tokio::test]
    async fn test_background_loop() {
        let cache = Arc::new(AutoRefreshCache::new("t", settings(10, 100), &MetricsScope::new("test")));
        cache.get_or_create("a", submitted("Q1")).await.unwrap();

        let token = CancellationToken::new();
        let handle = cache.start(Arc::new(ScriptedRefresher::new(None)), token.clone());

        let mut done = false;
        for _ in 0..100 {
            if cache.get("a").is_some_and(|s| s.in_terminal_state()) {
                done = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        token.cancel();
        handle.await.unwrap();
        assert!(done, "background refresh never ran");
    }
}
