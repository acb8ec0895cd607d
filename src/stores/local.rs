use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::entry::{CacheEntry, StorageMode, StoredEntry, StoredValue};
use crate::error::CacheError;
use crate::store::Store;
use crate::utils::now_ms;

/// Configuration for LocalStore.
#[derive(Debug, Clone, Default)]
pub struct LocalStoreConfig {
    /// Run `sweep_expired` on this interval once `spawn_sweeper` is called.
    ///
    /// `None` leaves removal to lazy eviction on read and explicit sweeps.
    pub sweep_interval: Option<Duration>,
}

/// Thread-safe in-process store using a HashMap behind a single mutex.
///
/// The lock is held for the duration of one operation only. Expired entries
/// are dropped when a read observes them, by `sweep_expired`, or by the
/// optional background sweeper.
///
/// Values are kept in whatever form they arrive: typed values stay typed and
/// serialized values (backfilled from a remote tier) are decoded on read.
#[derive(Default)]
pub struct LocalStore {
    state: Mutex<HashMap<String, StoredEntry>>,
    sweep_interval: Option<Duration>,
}

impl LocalStore {
    /// Create a new LocalStore with the given configuration.
    pub fn new(config: LocalStoreConfig) -> Self {
        LocalStore {
            state: Mutex::new(HashMap::new()),
            sweep_interval: config.sweep_interval,
        }
    }

    fn state(&self) -> MutexGuard<'_, HashMap<String, StoredEntry>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove all entries.
    pub fn clear(&self) {
        self.state().clear();
    }

    /// Number of entries held, fresh or not.
    pub fn len(&self) -> usize {
        self.state().len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.state().is_empty()
    }

    /// Remove every entry that is no longer fresh.
    ///
    /// Returns the number of removed entries.
    pub fn sweep_expired(&self) -> usize {
        let now = now_ms();
        let mut state = self.state();
        let before = state.len();
        state.retain(|_, entry| entry.is_fresh(now));
        before - state.len()
    }

    /// Spawn the background sweeper if `sweep_interval` is configured.
    ///
    /// The task stops on its own once the store is dropped. Abort the returned
    /// handle to stop it earlier.
    pub fn spawn_sweeper(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let interval = self.sweep_interval?;
        let weak: Weak<LocalStore> = Arc::downgrade(self);

        Some(tokio::spawn(async move {
            tracing::info!(
                interval_ms = interval.as_millis() as u64,
                "starting local store sweeper"
            );

            loop {
                tokio::time::sleep(interval).await;

                let Some(store) = weak.upgrade() else {
                    break;
                };

                let removed = store.sweep_expired();
                if removed > 0 {
                    tracing::debug!(removed, "local store sweep removed expired entries");
                }
            }
        }))
    }
}

#[async_trait]
impl Store for LocalStore {
    fn name(&self) -> &'static str {
        "local"
    }

    fn storage_mode(&self) -> StorageMode {
        StorageMode::Typed
    }

    async fn get(&self, key: &str) -> Option<StoredValue> {
        let mut state = self.state();

        let fresh = state.get(key)?.is_fresh(now_ms());
        if !fresh {
            state.remove(key);
            return None;
        }

        state.get(key).map(|entry| entry.value.clone())
    }

    async fn set(&self, key: &str, value: StoredValue, ttl: Duration) -> Result<(), CacheError> {
        let entry = CacheEntry::new(value, ttl);
        self.state().insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) {
        self.state().remove(key);
    }

    async fn set_if_not_exists(
        &self,
        key: &str,
        value: StoredValue,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let mut state = self.state();

        if state
            .get(key)
            .is_some_and(|entry| entry.is_fresh(now_ms()))
        {
            return Ok(false);
        }

        state.insert(key.to_string(), CacheEntry::new(value, ttl));
        Ok(true)
    }

    async fn get_entry(&self, key: &str) -> Option<StoredEntry> {
        self.state().get(key).cloned()
    }

    async fn set_entry(&self, key: &str, entry: StoredEntry) -> Result<(), CacheError> {
        self.state().insert(key.to_string(), entry);
        Ok(())
    }
}
