use std::{
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use metrics::counter;
use moka::{future::Cache as MokaCache, notification::RemovalCause};

use quick_ops_core::types::Operation;
use quick_ops_util::CacheSettings;

/// Read-through cache of per-user operation lists.
///
/// Entries expire after the configured TTL and are dropped on every write for
/// the same user. A write generation guards loads that race with a write: a
/// list read from the store before the write finished is never left behind in
/// the cache.
#[derive(Clone)]
pub struct OperationsCache {
    entries: Option<MokaCache<i64, Arc<Vec<Operation>>>>,
    generation: Arc<AtomicU64>,
}

impl OperationsCache {
    pub fn new(settings: CacheSettings) -> Self {
        let entries = settings.is_enabled().then(|| {
            MokaCache::builder()
                .max_capacity(settings.max_entries as u64)
                .time_to_live(settings.ttl)
                .eviction_listener(|_user_id, _operations, cause| {
                    if matches!(cause, RemovalCause::Size) {
                        counter!("operations_cache_total", "outcome" => "evicted").increment(1);
                    }
                })
                .build()
        });

        Self {
            entries,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.entries.is_some()
    }

    /// Returns the cached list for `user_id` when it is still fresh.
    pub async fn get(&self, user_id: i64) -> Option<Arc<Vec<Operation>>> {
        let entries = self.entries.as_ref()?;
        let hit = entries.get(&user_id).await;

        let outcome = if hit.is_some() { "hit" } else { "miss" };
        counter!("operations_cache_total", "outcome" => outcome).increment(1);
        hit
    }

    /// Serves `user_id` from the cache, or runs `load` and caches its result.
    ///
    /// Errors from `load` are returned as-is and never cached.
    pub async fn get_or_load<F, Fut, E>(&self, user_id: i64, load: F) -> Result<Arc<Vec<Operation>>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Operation>, E>>,
    {
        if let Some(cached) = self.get(user_id).await {
            return Ok(cached);
        }

        let ticket = self.ticket();
        let operations = Arc::new(load().await?);
        self.insert(user_id, operations.clone(), ticket).await;
        Ok(operations)
    }

    /// Generation to pass to [`insert`](Self::insert); take it before reading the store.
    pub fn ticket(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Stores a list loaded under `ticket`.
    ///
    /// If a write invalidated anything since `ticket` was taken, the entry is
    /// removed again right after insertion. Checking after the insert closes
    /// the window where a write lands between the check and the insert.
    pub async fn insert(&self, user_id: i64, operations: Arc<Vec<Operation>>, ticket: u64) {
        let Some(entries) = &self.entries else {
            return;
        };

        entries.insert(user_id, operations).await;
        if self.ticket() != ticket {
            entries.invalidate(&user_id).await;
        }
    }

    /// Drops the entry for `user_id`. Call after the write is committed.
    pub async fn invalidate(&self, user_id: i64) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(entries) = &self.entries {
            entries.invalidate(&user_id).await;
        }
    }

    #[cfg(test)]
    pub async fn len(&self) -> u64 {
        match &self.entries {
            Some(entries) => {
                entries.run_pending_tasks().await;
                entries.entry_count()
            }
            None => 0,
        }
    }
}
