/// Error type for cache operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// A hybrid store was built without its durable tier.
    #[error("hybrid store requires a durable (L2) tier")]
    MissingBackend,
    /// A storage tier could not serve a write.
    #[error("[{tier}] storage unavailable for key '{key}': {message}")]
    StorageUnavailable {
        tier: String,
        key: String,
        message: String,
    },
    /// Connecting to a remote tier failed.
    #[error("Connection error: {0}")]
    Connection(String),
    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CacheError {
    /// Create a new storage error.
    pub fn unavailable(
        tier: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        CacheError::StorageUnavailable {
            tier: tier.into(),
            key: key.into(),
            message: message.into(),
        }
    }
}
