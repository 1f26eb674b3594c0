//! Store trait for abstracting in-process and shared counting backends.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::Result;

use super::memory::MemoryStore;
use super::redis::RedisStore;

/// The state of one identity's current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRecord {
    /// Hits counted so far in this window
    pub count: u64,
    /// Absolute time (epoch milliseconds) at which the window resets
    pub expires_at_ms: i64,
}

impl WindowRecord {
    /// A fresh window holding a single hit.
    pub fn first_hit(window_ms: u64, now_ms: i64) -> Self {
        Self {
            count: 1,
            expires_at_ms: now_ms.saturating_add(i64::try_from(window_ms).unwrap_or(i64::MAX)),
        }
    }

    /// Whether a hit at `now_ms` falls outside this window.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms <= now_ms
    }
}

/// Trait for hit-counting backends.
///
/// Implementations must make the expiry check and the reset-or-increment a
/// single atomic step per key: two concurrent hits on an expired key never
/// both observe `count == 1`.
#[async_trait]
pub trait Store: Send + Sync {
    /// Count one hit for `key` and return the resulting window.
    ///
    /// If no window exists or it expired at or before `now_ms`, a new one is
    /// started with `count = 1` and `expires_at_ms = now_ms + window_ms`.
    /// Otherwise `count` is incremented and the expiry is left untouched.
    async fn increment(&self, key: &str, window_ms: u64, now_ms: i64) -> Result<WindowRecord>;
}

#[async_trait]
impl<S: Store + ?Sized> Store for Arc<S> {
    async fn increment(&self, key: &str, window_ms: u64, now_ms: i64) -> Result<WindowRecord> {
        (**self).increment(key, window_ms, now_ms).await
    }
}

#[async_trait]
impl<S: Store + ?Sized> Store for Box<S> {
    async fn increment(&self, key: &str, window_ms: u64, now_ms: i64) -> Result<WindowRecord> {
        (**self).increment(key, window_ms, now_ms).await
    }
}

/// Build the store selected by `config`.
pub async fn build_store(config: &StoreConfig) -> Result<Arc<dyn Store>> {
    config.validate()?;

    match config.backend {
        StoreBackend::Memory => {
            info!(backend = "memory", "Using in-process store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Redis => {
            let store = RedisStore::from_config(config).await?;
            info!(backend = "redis", "Using shared redis store");
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WindowgateError;

    #[test]
    fn test_first_hit() {
        let record = WindowRecord::first_hit(1_000, 5_000);
        assert_eq!(record.count, 1);
        assert_eq!(record.expires_at_ms, 6_000);
    }

    #[test]
    fn test_oversized_window_saturates() {
        let record = WindowRecord::first_hit(u64::MAX, 5_000);
        assert_eq!(record.expires_at_ms, i64::MAX);
        assert!(!record.is_expired(5_000));
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let record = WindowRecord::first_hit(1_000, 0);
        assert!(!record.is_expired(999));
        assert!(record.is_expired(1_000));
        assert!(record.is_expired(1_001));
    }

    #[tokio::test]
    async fn test_build_memory_store() {
        let store = build_store(&StoreConfig::default()).await.unwrap();
        let record = store.increment("limit:a", 1_000, 0).await.unwrap();
        assert_eq!(record.count, 1);
    }

    #[tokio::test]
    async fn test_build_redis_store_requires_url() {
        let config = StoreConfig {
            backend: StoreBackend::Redis,
            ..StoreConfig::default()
        };
        let result = build_store(&config).await;
        assert!(matches!(result, Err(WindowgateError::Config(_))));
    }
}
