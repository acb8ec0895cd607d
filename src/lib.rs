//! advanced-cache - Function-result caching for async Rust
//!
//! This library wraps producers (async functions or closures computing a
//! value) with one of three caching policies:
//! - [`TtlCache`]: cache-aside with a fixed time-to-live
//! - [`SwrCache`]: stale-while-revalidate with a per-key refresh lock
//! - [`Loader`]: values refreshed on a schedule by a [`LoaderRegistry`]
//!
//! All policies work on top of the [`Store`] trait, implemented by an
//! in-process [`LocalStore`], a redis-backed [`RedisStore`] and a two-tier
//! [`HybridStore`] combining both.
//!
//! # Example
//!
//! ```ignore
//! use advanced_cache::{SwrCache, SwrOptions, TtlCache};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), MyError> {
//!     let users = TtlCache::new("user:{}", Duration::from_secs(60), |id: u64| async move {
//!         load_user(id).await
//!     });
//!     let user = users.invoke(42).await?;
//!
//!     let prices = SwrCache::new(
//!         "price:{}",
//!         SwrOptions::new(Duration::from_secs(30), Duration::from_secs(300)),
//!         |sku: String| async move { fetch_price(&sku).await },
//!     );
//!     let price = prices.invoke("A-100".to_string()).await?;
//!     Ok(())
//! }
//! ```

mod entry;
mod error;
mod key;
mod loader;
mod producer;
mod scheduler;
mod store;
pub mod stores;
mod swr;
mod ttl;
mod utils;

#[cfg(test)]
mod testing;

// Re-export public API
pub use entry::{CacheEntry, StorageMode, StoredEntry, StoredValue};
pub use error::CacheError;
pub use key::{KeyArgs, KeyStrategy, KeyTemplate};
pub use loader::{ErrorCallback, Loader, LoaderOptions, LoaderRegistry};
pub use producer::{Blocking, Producer, blocking};
pub use scheduler::{Job, Scheduler};
pub use store::{Store, StoreExt};
pub use stores::hybrid::{DEFAULT_L1_TTL, HybridStore};
pub use stores::local::{LocalStore, LocalStoreConfig};
pub use stores::redis::{RedisStore, RedisStoreConfig};
pub use swr::{RefreshExecutor, SwrCache, SwrOptions};
pub use ttl::TtlCache;
pub use utils::NEVER_EXPIRES;
