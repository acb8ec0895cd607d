use serde::{Serialize, de::DeserializeOwned};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::entry::StoredValue;
use crate::error::CacheError;
use crate::key::KeyStrategy;
use crate::producer::Producer;
use crate::store::Store;
use crate::stores::local::LocalStore;

/// Cache-aside wrapper with plain TTL expiry.
///
/// On every call the key is derived from the arguments; a fresh value in the
/// store is returned as is, otherwise the producer runs and its result is
/// stored for `ttl`.
///
/// There is no stampede protection: concurrent misses on one key each run the
/// producer. Use [`SwrCache`](crate::SwrCache) when that matters.
pub struct TtlCache<A, V, P> {
    key: KeyStrategy<A>,
    ttl: Duration,
    store: Arc<dyn Store>,
    producer: Arc<P>,
    _marker: PhantomData<fn() -> V>,
}

impl<A, V, P> Clone for TtlCache<A, V, P> {
    fn clone(&self) -> Self {
        TtlCache {
            key: self.key.clone(),
            ttl: self.ttl,
            store: Arc::clone(&self.store),
            producer: Arc::clone(&self.producer),
            _marker: PhantomData,
        }
    }
}

impl<A, V, P> TtlCache<A, V, P>
where
    A: Send + 'static,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    P: Producer<A, V>,
{
    /// Create a TTL cache backed by its own `LocalStore`.
    ///
    /// # Example
    /// ```ignore
    /// let get_user = TtlCache::new("user:{}", Duration::from_secs(60), |id: u64| async move {
    ///     db.fetch_user(id).await
    /// });
    /// let user = get_user.invoke(42).await?;
    /// ```
    pub fn new(key: impl Into<KeyStrategy<A>>, ttl: Duration, producer: P) -> Self {
        TtlCache {
            key: key.into(),
            ttl,
            store: Arc::new(LocalStore::default()),
            producer: Arc::new(producer),
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

    /// The cache key used for `args`.
    pub fn key_for(&self, args: &A) -> String {
        self.key.derive(args)
    }

    /// Return the cached value for `args`, computing it on a miss.
    ///
    /// A failing producer is returned unchanged and nothing is cached.
    pub async fn invoke(&self, args: A) -> Result<V, P::Error>
    where
        P::Error: From<CacheError>,
    {
        let key = self.key.derive(&args);

        match self.store.get(&key).await.map(StoredValue::into_typed::<V>) {
            Some(Ok(value)) => {
                tracing::debug!(key = %key, tier = self.store.name(), "cache hit");
                return Ok(value);
            }
            Some(Err(e)) => {
                tracing::warn!(key = %key, error = %e, "cached value has unexpected type, recomputing");
            }
            None => {
                tracing::debug!(key = %key, tier = self.store.name(), "cache miss");
            }
        }

        let value = self.producer.produce(args).await?;
        self.store
            .set(&key, StoredValue::from_typed(value.clone()), self.ttl)
            .await?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreExt;
    use crate::testing::{Counter, FlakyStore, TestError};

    fn counting_user_cache(counter: Counter) -> impl Producer<u64, String, Error = TestError> {
        move |id: u64| {
            let counter = counter.clone();
            async move {
                counter.hit();
                Ok::<_, TestError>(format!("User{}", id))
            }
        }
    }

    #[tokio::test]
    async fn test_basic_caching() {
        let calls = Counter::new();
        let cache = TtlCache::new(
            "user:{}",
            Duration::from_secs(60),
            counting_user_cache(calls.clone()),
        );

        assert_eq!(cache.invoke(1).await.unwrap(), "User1");
        assert_eq!(calls.get(), 1);

        // Same key - served from the cache
        assert_eq!(cache.invoke(1).await.unwrap(), "User1");
        assert_eq!(calls.get(), 1);

        // Different key - computed again
        assert_eq!(cache.invoke(2).await.unwrap(), "User2");
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test]
    async fn test_ttl_expiration() {
        let calls = Counter::new();
        let counter = calls.clone();
        let cache = TtlCache::new("data:{}", Duration::from_millis(200), move |key: String| {
            let counter = counter.clone();
            async move { Ok::<_, TestError>(format!("{}#{}", key, counter.hit())) }
        });

        assert_eq!(cache.invoke("test".to_string()).await.unwrap(), "test#1");
        assert_eq!(cache.invoke("test".to_string()).await.unwrap(), "test#1");

        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(cache.invoke("test".to_string()).await.unwrap(), "test#2");
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test]
    async fn test_custom_store() {
        let store: Arc<dyn Store> = Arc::new(LocalStore::default());
        let cache = TtlCache::new("item:{}", Duration::from_secs(60), |id: u32| async move {
            Ok::<_, TestError>(vec![id])
        })
        .with_store(store.clone());

        assert_eq!(cache.invoke(123).await.unwrap(), vec![123]);
        assert!(store.exists("item:123").await);
        let stored: Option<Vec<u32>> = store.get_value("item:123").await.unwrap();
        assert_eq!(stored, Some(vec![123]));
    }

    #[tokio::test]
    async fn test_key_function() {
        let cache = TtlCache::new(
            KeyStrategy::func(|x: &i64| format!("calc:{}", x)),
            Duration::from_secs(60),
            |x: i64| async move { Ok::<_, TestError>(x * 2) },
        );

        assert_eq!(cache.invoke(21).await.unwrap(), 42);
        assert!(cache.store().exists("calc:21").await);
        assert_eq!(cache.key_for(&21), "calc:21");
    }

    #[tokio::test]
    async fn test_isolated_stores() {
        let users = TtlCache::new("{}", Duration::from_secs(60), |id: u32| async move {
            Ok::<_, TestError>(format!("user-{}", id))
        });
        let products = TtlCache::new("{}", Duration::from_secs(60), |id: u32| async move {
            Ok::<_, TestError>(format!("product-{}", id))
        });

        assert!(!Arc::ptr_eq(users.store(), products.store()));
        assert_eq!(users.invoke(1).await.unwrap(), "user-1");
        assert_eq!(products.invoke(1).await.unwrap(), "product-1");
    }

    #[tokio::test]
    async fn test_producer_error_propagates_and_is_not_cached() {
        let calls = Counter::new();
        let counter = calls.clone();
        let cache = TtlCache::new("fail:{}", Duration::from_secs(60), move |id: u8| {
            let counter = counter.clone();
            async move {
                counter.hit();
                Err::<String, _>(TestError::Origin(format!("no row {}", id)))
            }
        });

        let err = cache.invoke(7).await.unwrap_err();
        assert!(matches!(err, TestError::Origin(ref msg) if msg == "no row 7"));
        assert!(!cache.store().exists("fail:7").await);

        assert!(cache.invoke(7).await.is_err());
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test]
    async fn test_write_failure_is_returned() {
        let calls = Counter::new();
        let store = Arc::new(FlakyStore::new());
        let cache = TtlCache::new(
            "user:{}",
            Duration::from_secs(60),
            counting_user_cache(calls.clone()),
        )
        .with_store(store.clone());

        store.fail_writes(true);
        let err = cache.invoke(1).await.unwrap_err();
        assert!(matches!(
            err,
            TestError::Cache(CacheError::StorageUnavailable { ref key, .. }) if key == "user:1"
        ));
        assert_eq!(calls.get(), 1);

        store.fail_writes(false);
        assert_eq!(cache.invoke(1).await.unwrap(), "User1");
        assert_eq!(cache.invoke(1).await.unwrap(), "User1");
        assert_eq!(calls.get(), 2);

        // An unreadable store behaves like an empty one
        store.fail_reads(true);
        assert_eq!(cache.invoke(1).await.unwrap(), "User1");
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn test_blocking_producer() {
        let cache = TtlCache::new(
            "sync:{}",
            Duration::from_secs(60),
            crate::producer::blocking(|x: u32| Ok::<_, TestError>(x + 1)),
        );
        assert_eq!(cache.invoke(1).await.unwrap(), 2);
    }
}
