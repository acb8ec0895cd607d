//! Helpers shared by the unit tests.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::entry::{StorageMode, StoredEntry, StoredValue};
use crate::error::CacheError;
use crate::store::Store;
use crate::stores::local::LocalStore;

#[derive(Debug, Clone, thiserror::Error)]
pub enum TestError {
    #[error("origin failed: {0}")]
    Origin(String),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Counts calls across clones.
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment and return the new count.
    pub fn hit(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// A `LocalStore` whose reads and writes can be made to fail, the way an
/// unreachable remote tier does: failed reads are misses, failed deletes do
/// nothing, failed writes return `StorageUnavailable`.
#[derive(Default)]
pub struct FlakyStore {
    inner: LocalStore,
    reads_fail: AtomicBool,
    writes_fail: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.reads_fail.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.writes_fail.store(fail, Ordering::SeqCst);
    }

    fn reads_down(&self) -> bool {
        self.reads_fail.load(Ordering::SeqCst)
    }

    fn check_write(&self, key: &str) -> Result<(), CacheError> {
        if self.writes_fail.load(Ordering::SeqCst) {
            return Err(CacheError::unavailable("flaky", key, "connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for FlakyStore {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn storage_mode(&self) -> StorageMode {
        StorageMode::Serialized
    }

    async fn get(&self, key: &str) -> Option<StoredValue> {
        if self.reads_down() {
            return None;
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: StoredValue, ttl: Duration) -> Result<(), CacheError> {
        self.check_write(key)?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) {
        if self.writes_fail.load(Ordering::SeqCst) {
            return;
        }
        self.inner.delete(key).await
    }

    async fn set_if_not_exists(
        &self,
        key: &str,
        value: StoredValue,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        self.check_write(key)?;
        self.inner.set_if_not_exists(key, value, ttl).await
    }

    async fn get_entry(&self, key: &str) -> Option<StoredEntry> {
        if self.reads_down() {
            return None;
        }
        self.inner.get_entry(key).await
    }

    async fn set_entry(&self, key: &str, entry: StoredEntry) -> Result<(), CacheError> {
        self.check_write(key)?;
        self.inner.set_entry(key, entry).await
    }
}
