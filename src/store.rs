use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;

use crate::entry::{StorageMode, StoredEntry, StoredValue};
use crate::error::CacheError;

/// A store is the common capability set every storage backend exposes.
///
/// Stores are type-agnostic and work with `StoredValue`, which can hold either
/// typed values (for in-memory stores) or serialized JSON (for remote stores).
///
/// Reads never fail: a transient failure of a remote tier is reported as a
/// miss. Writes return `CacheError::StorageUnavailable` instead, since a lost
/// write must not go unnoticed.
#[async_trait]
pub trait Store: Send + Sync {
    /// A name for tracing.
    ///
    /// # Example
    /// - "local"
    /// - "redis"
    /// - "hybrid"
    fn name(&self) -> &'static str;

    /// Returns the storage mode preference for this store.
    ///
    /// Default implementation returns `Serialized` for safety.
    fn storage_mode(&self) -> StorageMode {
        StorageMode::Serialized
    }

    /// Return the value if it is present and fresh.
    async fn get(&self, key: &str) -> Option<StoredValue>;

    /// Store `value` for `ttl`. A zero `ttl` means no expiration.
    async fn set(&self, key: &str, value: StoredValue, ttl: Duration) -> Result<(), CacheError>;

    /// Remove the key.
    async fn delete(&self, key: &str);

    /// Whether `get` would currently return a value.
    async fn exists(&self, key: &str) -> bool {
        self.get(key).await.is_some()
    }

    /// Store `value` only if no fresh value exists for `key`.
    ///
    /// Returns `true` if this call stored the value. Implementations must make
    /// the check and the write a single atomic step, since callers use it as a
    /// lock.
    async fn set_if_not_exists(
        &self,
        key: &str,
        value: StoredValue,
        ttl: Duration,
    ) -> Result<bool, CacheError>;

    /// Return the raw entry, stale or not.
    async fn get_entry(&self, key: &str) -> Option<StoredEntry>;

    /// Replace the raw entry for `key`.
    async fn set_entry(&self, key: &str, entry: StoredEntry) -> Result<(), CacheError>;
}

/// Typed helpers available on every store.
#[async_trait]
pub trait StoreExt: Store {
    /// Return the fresh value for `key` decoded as `V`.
    async fn get_value<V>(&self, key: &str) -> Result<Option<V>, CacheError>
    where
        V: Clone + DeserializeOwned + Send + Sync + 'static;

    /// Store a typed value for `ttl`.
    async fn set_value<V>(&self, key: &str, value: V, ttl: Duration) -> Result<(), CacheError>
    where
        V: Serialize + Send + Sync + 'static;

    /// Typed variant of `set_if_not_exists`.
    async fn set_value_if_not_exists<V>(
        &self,
        key: &str,
        value: V,
        ttl: Duration,
    ) -> Result<bool, CacheError>
    where
        V: Serialize + Send + Sync + 'static;
}

#[async_trait]
impl<S> StoreExt for S
where
    S: Store + ?Sized,
{
    async fn get_value<V>(&self, key: &str) -> Result<Option<V>, CacheError>
    where
        V: Clone + DeserializeOwned + Send + Sync + 'static,
    {
        match self.get(key).await {
            Some(value) => value.into_typed().map(Some),
            None => Ok(None),
        }
    }

    async fn set_value<V>(&self, key: &str, value: V, ttl: Duration) -> Result<(), CacheError>
    where
        V: Serialize + Send + Sync + 'static,
    {
        self.set(key, StoredValue::from_typed(value), ttl).await
    }

    async fn set_value_if_not_exists<V>(
        &self,
        key: &str,
        value: V,
        ttl: Duration,
    ) -> Result<bool, CacheError>
    where
        V: Serialize + Send + Sync + 'static,
    {
        self.set_if_not_exists(key, StoredValue::from_typed(value), ttl)
            .await
    }
}
