//! Shared utilities for the cache library.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// `fresh_until` value of entries stored without expiration.
pub const NEVER_EXPIRES: i64 = i64::MAX;

/// Build a prefixed key.
///
/// Format: `{prefix}{key}`
pub fn prefixed_key(prefix: &str, key: &str) -> String {
    format!("{}{}", prefix, key)
}

/// Key of the SWR refresh lock guarding `key`.
pub fn refresh_lock_key(key: &str) -> String {
    format!("{}:refresh_lock", key)
}

/// Get the current time in milliseconds since UNIX epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Saturating millisecond count of a duration.
pub fn duration_ms(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

/// Expiry timestamp for an entry written at `now` with `ttl`.
///
/// A zero `ttl` means no expiration.
pub fn deadline_after(now: i64, ttl: Duration) -> i64 {
    if ttl.is_zero() {
        NEVER_EXPIRES
    } else {
        now.saturating_add(duration_ms(ttl))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_key() {
        assert_eq!(prefixed_key("app:", "user:123"), "app:user:123");
        assert_eq!(prefixed_key("", "user:123"), "user:123");
    }

    #[test]
    fn test_refresh_lock_key() {
        assert_eq!(refresh_lock_key("product:1"), "product:1:refresh_lock");
    }

    #[test]
    fn test_now_ms_is_positive() {
        let now = now_ms();
        assert!(now > 0);
    }

    #[test]
    fn test_deadline_after() {
        assert_eq!(deadline_after(1_000, Duration::ZERO), NEVER_EXPIRES);
        assert_eq!(deadline_after(1_000, Duration::from_millis(250)), 1_250);
        assert_eq!(deadline_after(i64::MAX - 1, Duration::from_secs(5)), i64::MAX);
    }
}
