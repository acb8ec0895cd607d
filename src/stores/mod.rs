//! Store implementations for the cache library.

pub mod hybrid;
pub mod local;
pub mod redis;

pub use self::hybrid::{DEFAULT_L1_TTL, HybridStore};
pub use self::local::{LocalStore, LocalStoreConfig};
pub use self::redis::{RedisStore, RedisStoreConfig};
