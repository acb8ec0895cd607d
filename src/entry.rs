use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::CacheError;
use crate::utils::{NEVER_EXPIRES, deadline_after, now_ms};

/// A cache entry containing a value and its freshness timestamps.
///
/// Entries are immutable once built. A refresh creates a new entry that
/// replaces the old one in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    /// The cached value.
    pub value: V,

    /// Unix timestamp in milliseconds at which the entry was created.
    pub created_at: i64,

    /// Unix timestamp in milliseconds.
    /// Before this time the entry is considered fresh.
    /// `i64::MAX` means the entry never expires.
    pub fresh_until: i64,
}

/// The entry form every store works with.
pub type StoredEntry = CacheEntry<StoredValue>;

type Serializer = Arc<dyn Fn() -> Result<String, CacheError> + Send + Sync>;

/// Type-erased payload that supports both typed and serialized storage.
///
/// This enum allows stores to be type-agnostic while still supporting
/// zero-copy storage for in-memory stores (via `Typed`) and a JSON encoding
/// for remote stores (via `Serialized`).
#[derive(Clone)]
pub enum StoredValue {
    /// For in-memory stores: the value kept behind an `Arc<dyn Any>`.
    ///
    /// Cloning only bumps the reference count. The serializer converts the
    /// value to its JSON form when it has to cross into a remote tier.
    Typed {
        value: Arc<dyn Any + Send + Sync>,
        serializer: Option<Serializer>,
    },
    /// For remote stores: the JSON text of the value.
    Serialized(String),
}

/// Storage mode preference for stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    /// Store prefers typed values (in-memory stores).
    Typed,
    /// Store prefers serialized values (remote stores).
    Serialized,
}

impl<V> CacheEntry<V> {
    /// Create an entry that is fresh for `ttl` from now.
    ///
    /// A zero `ttl` creates an entry that never expires.
    pub fn new(value: V, ttl: Duration) -> Self {
        let now = now_ms();
        CacheEntry {
            value,
            created_at: now,
            fresh_until: deadline_after(now, ttl),
        }
    }

    /// Create an entry from explicit timestamps.
    ///
    /// `fresh_until` is clamped so that it never precedes `created_at`.
    pub fn with_timestamps(value: V, created_at: i64, fresh_until: i64) -> Self {
        CacheEntry {
            value,
            created_at,
            fresh_until: fresh_until.max(created_at),
        }
    }

    /// Check if the entry is still fresh.
    pub fn is_fresh(&self, now_ms: i64) -> bool {
        now_ms < self.fresh_until
    }

    /// Whether the entry was stored without an expiration.
    pub fn never_expires(&self) -> bool {
        self.fresh_until == NEVER_EXPIRES
    }

    /// Age of the entry in milliseconds.
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.created_at)
    }
}

impl StoredValue {
    /// Wrap a typed value without serialization support.
    ///
    /// Such a value can only live in typed stores. Use `from_typed` for
    /// values that may be written to a remote tier.
    pub fn from_typed_only<V>(value: V) -> Self
    where
        V: Send + Sync + 'static,
    {
        StoredValue::Typed {
            value: Arc::new(value),
            serializer: None,
        }
    }

    /// Wrap a typed value together with a serializer for it.
    pub fn from_typed<V>(value: V) -> Self
    where
        V: Serialize + Send + Sync + 'static,
    {
        let value_arc = Arc::new(value);
        let value_for_serializer = value_arc.clone();

        let serializer: Serializer = Arc::new(move || {
            serde_json::to_string(value_for_serializer.as_ref())
                .map_err(|e| CacheError::Serialization(format!("Serialization failed: {}", e)))
        });

        StoredValue::Typed {
            value: value_arc,
            serializer: Some(serializer),
        }
    }

    /// Convert the payload to an owned `V`.
    ///
    /// - `Typed`: downcasts the `Arc` and clones the value out of it
    /// - `Serialized`: deserializes the JSON text
    pub fn into_typed<V>(self) -> Result<V, CacheError>
    where
        V: Clone + DeserializeOwned + Send + Sync + 'static,
    {
        match self {
            StoredValue::Typed { value, .. } => {
                let typed_arc = value
                    .downcast::<V>()
                    .map_err(|_| CacheError::Serialization("Type downcast failed".to_string()))?;
                Ok((*typed_arc).clone())
            }
            StoredValue::Serialized(data) => serde_json::from_str(&data)
                .map_err(|e| CacheError::Serialization(format!("Deserialization failed: {}", e))),
        }
    }

    /// Return the JSON text of this payload.
    pub fn to_json(&self) -> Result<String, CacheError> {
        match self {
            StoredValue::Serialized(data) => Ok(data.clone()),
            StoredValue::Typed {
                serializer: Some(ser),
                ..
            } => ser(),
            StoredValue::Typed {
                serializer: None, ..
            } => Err(CacheError::Serialization(
                "Cannot serialize Typed value: no serializer available".to_string(),
            )),
        }
    }

    /// Convert the payload to match the target storage mode.
    ///
    /// Serialized payloads are kept as they are for typed stores; decoding
    /// happens lazily in `into_typed`.
    pub fn convert_for_mode(self, target_mode: StorageMode) -> Result<Self, CacheError> {
        match (&self, target_mode) {
            (StoredValue::Typed { .. }, StorageMode::Serialized) => {
                self.to_json().map(StoredValue::Serialized)
            }
            _ => Ok(self),
        }
    }
}

impl fmt::Debug for StoredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoredValue::Typed { serializer, .. } => f
                .debug_struct("Typed")
                .field("serializable", &serializer.is_some())
                .finish_non_exhaustive(),
            StoredValue::Serialized(data) => f.debug_tuple("Serialized").field(data).finish(),
        }
    }
}

impl StoredEntry {
    /// Convert the payload of this entry to `V`.
    pub fn into_typed<V>(self) -> Result<CacheEntry<V>, CacheError>
    where
        V: Clone + DeserializeOwned + Send + Sync + 'static,
    {
        Ok(CacheEntry {
            value: self.value.into_typed()?,
            created_at: self.created_at,
            fresh_until: self.fresh_until,
        })
    }

    /// Convert the payload of this entry to match the target storage mode.
    pub fn convert_for_mode(self, target_mode: StorageMode) -> Result<Self, CacheError> {
        Ok(CacheEntry {
            value: self.value.convert_for_mode(target_mode)?,
            created_at: self.created_at,
            fresh_until: self.fresh_until,
        })
    }
}
