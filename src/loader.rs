//! Values kept warm by a periodic background refresh.
//!
//! A loader registers a producer with the [`Scheduler`] owned by a
//! [`LoaderRegistry`]. Every tick recomputes the value and stores it;
//! readers only ever hit the store, and fall back to calling the producer
//! directly when nothing is cached.

use serde::{Serialize, de::DeserializeOwned};
use std::fmt;
use std::marker::PhantomData;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::entry::StoredValue;
use crate::error::CacheError;
use crate::producer::Producer;
use crate::scheduler::{Job, Scheduler};
use crate::store::Store;
use crate::stores::local::LocalStore;

/// Called with the error of every failed refresh.
pub type ErrorCallback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Options for [`LoaderRegistry::register`].
pub struct LoaderOptions<E> {
    interval: Duration,
    ttl: Option<Duration>,
    run_immediately: bool,
    on_error: Option<ErrorCallback<E>>,
    store: Option<Arc<dyn Store>>,
}

impl<E> Clone for LoaderOptions<E> {
    fn clone(&self) -> Self {
        LoaderOptions {
            interval: self.interval,
            ttl: self.ttl,
            run_immediately: self.run_immediately,
            on_error: self.on_error.clone(),
            store: self.store.clone(),
        }
    }
}

impl<E> LoaderOptions<E> {
    /// Refresh every `interval`.
    ///
    /// By default the value is cached for twice the interval, the first
    /// refresh runs during registration, and a new `LocalStore` holds it.
    pub fn new(interval: Duration) -> Self {
        LoaderOptions {
            interval,
            ttl: None,
            run_immediately: true,
            on_error: None,
            store: None,
        }
    }

    /// How long each refreshed value is cached.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Whether registration runs the first refresh before returning.
    pub fn run_immediately(mut self, run_immediately: bool) -> Self {
        self.run_immediately = run_immediately;
        self
    }

    /// Call `callback` with the error of every failed refresh.
    ///
    /// A panicking callback is logged and does not stop the loader.
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    /// Keep the value in `store` instead of a new `LocalStore`.
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Time between two refreshes.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// The configured ttl, or twice the interval.
    pub fn effective_ttl(&self) -> Duration {
        self.ttl.unwrap_or(self.interval.saturating_mul(2))
    }
}

impl<E> fmt::Debug for LoaderOptions<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderOptions")
            .field("interval", &self.interval)
            .field("ttl", &self.effective_ttl())
            .field("run_immediately", &self.run_immediately)
            .field("on_error", &self.on_error.is_some())
            .finish_non_exhaustive()
    }
}

/// The work done on every tick of one loader.
struct Refresh<V, P: Producer<(), V>> {
    key: String,
    ttl: Duration,
    store: Arc<dyn Store>,
    producer: Arc<P>,
    on_error: Option<ErrorCallback<P::Error>>,
    _marker: PhantomData<fn() -> V>,
}

impl<V, P> Refresh<V, P>
where
    V: Serialize + Send + Sync + 'static,
    P: Producer<(), V>,
    P::Error: From<CacheError> + fmt::Display,
{
    async fn run(&self) {
        let started = Instant::now();
        let result = match self.producer.produce(()).await {
            Ok(value) => self
                .store
                .set(&self.key, StoredValue::from_typed(value), self.ttl)
                .await
                .map_err(P::Error::from),
            Err(e) => Err(e),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let error = match result {
            Ok(()) => {
                tracing::info!(key = %self.key, duration_ms, "loader refreshed");
                return;
            }
            Err(e) => e,
        };

        tracing::error!(key = %self.key, duration_ms, error = %error, "loader refresh failed");
        if let Some(callback) = &self.on_error
            && catch_unwind(AssertUnwindSafe(|| callback(&error))).is_err()
        {
            tracing::error!(key = %self.key, "loader error callback panicked");
        }
    }
}

/// Handle to a registered loader.
pub struct Loader<V, P> {
    key: String,
    store: Arc<dyn Store>,
    producer: Arc<P>,
    _marker: PhantomData<fn() -> V>,
}

impl<V, P> Clone for Loader<V, P> {
    fn clone(&self) -> Self {
        Loader {
            key: self.key.clone(),
            store: Arc::clone(&self.store),
            producer: Arc::clone(&self.producer),
            _marker: PhantomData,
        }
    }
}

impl<V, P> Loader<V, P>
where
    V: Clone + DeserializeOwned + Send + Sync + 'static,
    P: Producer<(), V>,
{
    /// Return the cached value, or compute one directly.
    ///
    /// A directly computed value is not cached; only the scheduled refresh
    /// writes to the store.
    pub async fn get(&self) -> Result<V, P::Error> {
        match self.store.get(&self.key).await.map(StoredValue::into_typed::<V>) {
            Some(Ok(value)) => return Ok(value),
            Some(Err(e)) => {
                tracing::warn!(key = %self.key, error = %e, "cached value has unexpected type");
            }
            None => {
                tracing::debug!(key = %self.key, "loader cache empty, calling producer directly");
            }
        }
        self.producer.produce(()).await
    }

    /// The store key the value lives under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The store the scheduled refresh writes to.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }
}

/// Owns the scheduler that drives every loader registered with it.
///
/// The scheduler is created on first registration and dropped by
/// [`shutdown`](Self::shutdown); registering again afterwards starts a new
/// one.
#[derive(Default)]
pub struct LoaderRegistry {
    scheduler: Mutex<Option<Arc<Scheduler>>>,
}

impl LoaderRegistry {
    /// Create a registry. No scheduler exists until the first registration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a loader for `key`, replacing any loader with the same key.
    ///
    /// # Example
    /// ```ignore
    /// let registry = LoaderRegistry::new();
    /// let rates = registry
    ///     .register(
    ///         "exchange_rates",
    ///         || async { fetch_rates().await },
    ///         LoaderOptions::new(Duration::from_secs(300)),
    ///     )
    ///     .await;
    /// let current = rates.get().await?;
    /// ```
    pub async fn register<V, P>(
        &self,
        key: impl Into<String>,
        producer: P,
        options: LoaderOptions<P::Error>,
    ) -> Loader<V, P>
    where
        V: Serialize + Send + Sync + 'static,
        P: Producer<(), V>,
        P::Error: From<CacheError> + fmt::Display,
    {
        let key = key.into();
        let store = options
            .store
            .clone()
            .unwrap_or_else(|| Arc::new(LocalStore::default()));
        let producer = Arc::new(producer);

        let refresh = Arc::new(Refresh {
            key: key.clone(),
            ttl: options.effective_ttl(),
            store: Arc::clone(&store),
            producer: Arc::clone(&producer),
            on_error: options.on_error.clone(),
            _marker: PhantomData,
        });

        let job: Job = Arc::new(move || {
            let refresh = Arc::clone(&refresh);
            Box::pin(async move { refresh.run().await })
        });

        let scheduler = self.scheduler_or_init();
        scheduler.add_job(key.clone(), options.interval(), Arc::clone(&job));
        scheduler.start();
        if options.run_immediately {
            // Shares the tick lock, so it waits for a replaced loader's tick
            scheduler.run_now(&key, &job).await;
        }

        tracing::debug!(key = %key, interval_ms = options.interval().as_millis() as u64, "loader registered");

        Loader {
            key,
            store,
            producer,
            _marker: PhantomData,
        }
    }

    fn scheduler_or_init(&self) -> Arc<Scheduler> {
        let mut scheduler = self.scheduler.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(scheduler.get_or_insert_with(|| Arc::new(Scheduler::new())))
    }

    /// The current scheduler, if any loader has been registered.
    pub fn scheduler(&self) -> Option<Arc<Scheduler>> {
        self.scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether a scheduler exists and is running.
    pub fn is_running(&self) -> bool {
        self.scheduler().is_some_and(|scheduler| scheduler.is_running())
    }

    /// Stop all loaders. Their handles keep working by calling the producer
    /// directly once the cached values expire.
    pub async fn shutdown(&self, wait: bool) {
        let scheduler = self
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(scheduler) = scheduler {
            scheduler.shutdown(wait).await;
        }
    }
}

impl fmt::Debug for LoaderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderRegistry")
            .field("scheduler", &self.scheduler())
            .finish()
    }
}
