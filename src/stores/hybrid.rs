use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::entry::{CacheEntry, StorageMode, StoredEntry, StoredValue};
use crate::error::CacheError;
use crate::store::Store;
use crate::stores::local::LocalStore;
use crate::utils::{deadline_after, now_ms};

/// Default lifetime of values in the fast tier.
pub const DEFAULT_L1_TTL: Duration = Duration::from_secs(60);

/// HybridStore puts a fast tier (L1) in front of a durable tier (L2).
///
/// Reads check L1 first and backfill it from L2. Writes go to both tiers, with
/// the L1 lifetime capped at `l1_ttl`. Raw entries keep their timestamps in
/// L1, but turn stale there no later than `l1_ttl` from the write, after which
/// `get_entry` consults L2 again. Conditional writes are decided by L2
/// alone, so that several processes sharing L2 agree on the outcome.
pub struct HybridStore {
    l1: Arc<dyn Store>,
    l2: Arc<dyn Store>,
    l1_ttl: Duration,
}

impl HybridStore {
    /// Create a new hybrid store.
    ///
    /// A missing `l1` defaults to a fresh `LocalStore`. A missing `l2` is a
    /// configuration error.
    ///
    /// # Example
    /// ```ignore
    /// let redis: Arc<dyn Store> = Arc::new(RedisStore::new(config).await?);
    /// let hybrid = HybridStore::new(None, Some(redis), Duration::from_secs(60))?;
    /// ```
    pub fn new(
        l1: Option<Arc<dyn Store>>,
        l2: Option<Arc<dyn Store>>,
        l1_ttl: Duration,
    ) -> Result<Self, CacheError> {
        let l2 = l2.ok_or(CacheError::MissingBackend)?;
        let l1 = l1.unwrap_or_else(|| Arc::new(LocalStore::default()));
        Ok(HybridStore { l1, l2, l1_ttl })
    }

    /// The fast tier.
    pub fn l1(&self) -> &Arc<dyn Store> {
        &self.l1
    }

    /// The durable tier.
    pub fn l2(&self) -> &Arc<dyn Store> {
        &self.l2
    }

    /// L1 lifetime for a value written with `ttl`.
    fn l1_ttl_for(&self, ttl: Duration) -> Duration {
        if ttl.is_zero() {
            self.l1_ttl
        } else {
            ttl.min(self.l1_ttl)
        }
    }

    /// Convert `entry` for L1 and cap its freshness at `l1_ttl` from now.
    fn l1_entry(&self, entry: StoredEntry) -> Result<StoredEntry, CacheError> {
        let entry = entry.convert_for_mode(self.l1.storage_mode())?;
        let limit = deadline_after(now_ms(), self.l1_ttl);
        Ok(CacheEntry::with_timestamps(
            entry.value,
            entry.created_at,
            entry.fresh_until.min(limit),
        ))
    }

    async fn fill_l1(&self, key: &str, value: StoredValue, ttl: Duration) {
        let result = match value.convert_for_mode(self.l1.storage_mode()) {
            Ok(value) => self.l1.set(key, value, ttl).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                tracing::debug!(tier = self.l1.name(), key, "populated fast tier");
            }
            Err(e) => {
                tracing::warn!(tier = self.l1.name(), key, error = %e, "failed to populate fast tier");
            }
        }
    }
}

#[async_trait]
impl Store for HybridStore {
    fn name(&self) -> &'static str {
        "hybrid"
    }

    fn storage_mode(&self) -> StorageMode {
        self.l1.storage_mode()
    }

    async fn get(&self, key: &str) -> Option<StoredValue> {
        if let Some(value) = self.l1.get(key).await {
            return Some(value);
        }

        let value = self.l2.get(key).await?;
        // The backfill uses the configured L1 lifetime, not what L2 has left.
        self.fill_l1(key, value.clone(), self.l1_ttl).await;
        Some(value)
    }

    async fn set(&self, key: &str, value: StoredValue, ttl: Duration) -> Result<(), CacheError> {
        let l1_value = value.clone().convert_for_mode(self.l1.storage_mode())?;
        self.l1.set(key, l1_value, self.l1_ttl_for(ttl)).await?;

        let l2_value = value.convert_for_mode(self.l2.storage_mode())?;
        self.l2.set(key, l2_value, ttl).await
    }

    async fn delete(&self, key: &str) {
        self.l1.delete(key).await;
        self.l2.delete(key).await;
    }

    async fn set_if_not_exists(
        &self,
        key: &str,
        value: StoredValue,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let l2_value = value.clone().convert_for_mode(self.l2.storage_mode())?;
        let acquired = self.l2.set_if_not_exists(key, l2_value, ttl).await?;

        if acquired {
            self.fill_l1(key, value, self.l1_ttl_for(ttl)).await;
        }

        Ok(acquired)
    }

    async fn get_entry(&self, key: &str) -> Option<StoredEntry> {
        let local = self.l1.get_entry(key).await;
        if local.as_ref().is_some_and(|entry| entry.is_fresh(now_ms())) {
            return local;
        }

        match self.l2.get_entry(key).await {
            Some(remote) => {
                let result = match self.l1_entry(remote.clone()) {
                    Ok(entry) => self.l1.set_entry(key, entry).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    tracing::warn!(tier = self.l1.name(), key, error = %e, "failed to populate fast tier");
                }
                Some(remote)
            }
            None => local,
        }
    }

    async fn set_entry(&self, key: &str, entry: StoredEntry) -> Result<(), CacheError> {
        let l1_entry = self.l1_entry(entry.clone())?;
        self.l1.set_entry(key, l1_entry).await?;

        let l2_entry = entry.convert_for_mode(self.l2.storage_mode())?;
        self.l2.set_entry(key, l2_entry).await
    }
}
