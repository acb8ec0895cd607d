use futures::future::BoxFuture;
use serde::{Serialize, de::DeserializeOwned};
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::JoinSet;

use crate::entry::{CacheEntry, StoredValue};
use crate::error::CacheError;
use crate::key::KeyStrategy;
use crate::producer::Producer;
use crate::store::Store;
use crate::stores::local::LocalStore;
use crate::utils::{duration_ms, now_ms, refresh_lock_key};

/// Lifetime of the refresh lock when no grace period is configured.
const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(10);

/// Options for a stale-while-revalidate cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwrOptions {
    /// How long an entry is fresh. Zero means forever.
    pub ttl: Duration,
    /// How long after `ttl` a stale entry may still be served.
    pub stale_ttl: Duration,
    /// Guard background refreshes of a key with a lock in the store.
    pub enable_lock: bool,
}

impl Default for SwrOptions {
    fn default() -> Self {
        SwrOptions {
            ttl: Duration::from_secs(60),
            stale_ttl: Duration::from_secs(60),
            enable_lock: true,
        }
    }
}

impl SwrOptions {
    /// Fresh for `ttl`, then served stale for `stale_ttl`, with the lock on.
    pub fn new(ttl: Duration, stale_ttl: Duration) -> Self {
        SwrOptions {
            ttl,
            stale_ttl,
            enable_lock: true,
        }
    }

    /// Turn the per-key refresh lock on or off.
    pub fn enable_lock(mut self, enable_lock: bool) -> Self {
        self.enable_lock = enable_lock;
        self
    }

    fn lock_ttl(&self) -> Duration {
        if self.stale_ttl.is_zero() {
            DEFAULT_LOCK_TTL
        } else {
            self.stale_ttl
        }
    }
}

/// Runs the background refreshes of one cache.
///
/// Finished tasks are reaped whenever a new one is submitted. Dropping the
/// executor detaches whatever is still running.
pub struct RefreshExecutor {
    handle: Option<Handle>,
    tasks: Mutex<JoinSet<()>>,
}

impl RefreshExecutor {
    /// Create an executor bound to the current runtime, if there is one.
    pub fn new() -> Self {
        RefreshExecutor {
            handle: Handle::try_current().ok(),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Spawn `task`.
    pub fn submit(&self, task: BoxFuture<'static, ()>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        while let Some(result) = tasks.try_join_next() {
            if let Err(e) = result {
                tracing::error!(error = %e, "refresh task panicked");
            }
        }
        match &self.handle {
            Some(handle) => {
                tasks.spawn_on(task, handle);
            }
            None => {
                tasks.spawn(task);
            }
        }
    }

    /// Number of refreshes not yet reaped.
    pub fn pending(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Wait for every submitted refresh to finish.
    pub async fn drain(&self) {
        let mut tasks = {
            let mut guard = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "refresh task panicked");
            }
        }
    }
}

impl Default for RefreshExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RefreshExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshExecutor")
            .field("pending", &self.pending())
            .finish()
    }
}

impl Drop for RefreshExecutor {
    fn drop(&mut self) {
        self.tasks
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .detach_all();
    }
}

/// Stale-while-revalidate wrapper around a producer.
///
/// - Fresh entries are returned directly.
/// - Entries within the grace period are returned while a refresh runs in
///   the background.
/// - Missing or fully expired entries are computed before returning.
///
/// With the lock enabled at most one refresh per key runs at a time, even
/// across processes sharing a remote store.
pub struct SwrCache<A, V, P> {
    key: KeyStrategy<A>,
    options: SwrOptions,
    store: Arc<dyn Store>,
    producer: Arc<P>,
    executor: Arc<RefreshExecutor>,
    _marker: PhantomData<fn() -> V>,
}

impl<A, V, P> Clone for SwrCache<A, V, P> {
    fn clone(&self) -> Self {
        SwrCache {
            key: self.key.clone(),
            options: self.options,
            store: Arc::clone(&self.store),
            producer: Arc::clone(&self.producer),
            executor: Arc::clone(&self.executor),
            _marker: PhantomData,
        }
    }
}

impl<A, V, P> SwrCache<A, V, P>
where
    A: Send + 'static,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    P: Producer<A, V>,
    P::Error: From<CacheError> + fmt::Display,
{
    /// Create an SWR cache backed by its own `LocalStore`.
    pub fn new(key: impl Into<KeyStrategy<A>>, options: SwrOptions, producer: P) -> Self {
        SwrCache {
            key: key.into(),
            options,
            store: Arc::new(LocalStore::default()),
            producer: Arc::new(producer),
            executor: Arc::new(RefreshExecutor::new()),
            _marker: PhantomData,
        }
    }

    /// Use `store` instead of the private `LocalStore`.
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = store;
        self
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// The options this cache was built with.
    pub fn options(&self) -> &SwrOptions {
        &self.options
    }

    /// The cache key used for `args`.
    pub fn key_for(&self, args: &A) -> String {
        self.key.derive(args)
    }

    /// Wait until all background refreshes submitted so far have finished.
    pub async fn drain(&self) {
        self.executor.drain().await
    }

    /// Return the value for `args`, possibly stale.
    pub async fn invoke(&self, args: A) -> Result<V, P::Error> {
        let key = self.key.derive(&args);
        let now = now_ms();

        let cached = match self.store.get_entry(&key).await {
            Some(entry) => match entry.into_typed::<V>() {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "cached entry has unexpected type, recomputing");
                    None
                }
            },
            None => None,
        };

        let Some(entry) = cached else {
            tracing::debug!(key = %key, tier = self.store.name(), "cache miss");
            return self.compute(&key, args).await;
        };

        if entry.is_fresh(now) {
            tracing::debug!(key = %key, tier = self.store.name(), "cache hit");
            return Ok(entry.value);
        }

        let age_ms = entry.age_ms(now);
        let grace_ends =
            duration_ms(self.options.ttl).saturating_add(duration_ms(self.options.stale_ttl));
        if age_ms > grace_ends {
            tracing::debug!(key = %key, age_ms, "entry expired");
            return self.compute(&key, args).await;
        }

        tracing::debug!(key = %key, age_ms, "serving stale entry");
        if self.try_lock(&key).await {
            self.spawn_refresh(key, args);
        }
        Ok(entry.value)
    }

    async fn compute(&self, key: &str, args: A) -> Result<V, P::Error> {
        let value = self.producer.produce(args).await?;
        let entry = CacheEntry::new(StoredValue::from_typed(value.clone()), self.options.ttl);
        self.store.set_entry(key, entry).await?;
        Ok(value)
    }

    /// Whether this caller should run the refresh for `key`.
    async fn try_lock(&self, key: &str) -> bool {
        if !self.options.enable_lock {
            return true;
        }

        let lock_key = refresh_lock_key(key);
        match self
            .store
            .set_if_not_exists(
                &lock_key,
                StoredValue::from_typed("1".to_string()),
                self.options.lock_ttl(),
            )
            .await
        {
            Ok(acquired) => acquired,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "failed to acquire refresh lock");
                false
            }
        }
    }

    fn spawn_refresh(&self, key: String, args: A) {
        let producer = Arc::clone(&self.producer);
        let store = Arc::clone(&self.store);
        let ttl = self.options.ttl;

        self.executor.submit(Box::pin(async move {
            let started = Instant::now();
            let value = match producer.produce(args).await {
                Ok(value) => value,
                Err(e) => {
                    tracing::error!(key = %key, error = %e, "background refresh failed");
                    return;
                }
            };

            let entry = CacheEntry::new(StoredValue::from_typed(value), ttl);
            match store.set_entry(&key, entry).await {
                Ok(()) => {
                    tracing::debug!(
                        key = %key,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "background refresh stored"
                    );
                }
                Err(e) => {
                    tracing::error!(key = %key, error = %e, "failed to store refreshed value");
                }
            }
        }));
    }
}
