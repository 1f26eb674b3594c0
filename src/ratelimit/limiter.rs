//! Core rate limiter implementation.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::clock::{Clock, SystemClock};
use super::store::Store;
use crate::error::{Result, WindowgateError};

/// Default window length: one hour.
pub const DEFAULT_DURATION_MS: u64 = 60 * 60 * 1000;
/// Default number of hits permitted per window.
pub const DEFAULT_MAX: u64 = 2500;
/// Longest accepted window, one hundred years. Keeps expiry arithmetic
/// exact in every store, including Lua's double-precision numbers.
pub const MAX_DURATION_MS: u64 = 100 * 365 * 24 * 60 * 60 * 1000;
/// Default namespace for store keys.
pub const DEFAULT_KEY_PREFIX: &str = "limit:";

/// Limits applied to one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Window length in milliseconds
    #[serde(default = "default_duration")]
    pub duration: u64,

    /// Maximum hits permitted per window
    #[serde(default = "default_max")]
    pub max: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            duration: default_duration(),
            max: default_max(),
        }
    }
}

fn default_duration() -> u64 {
    DEFAULT_DURATION_MS
}

fn default_max() -> u64 {
    DEFAULT_MAX
}

impl RateLimitConfig {
    /// Create a config with the given window (ms) and maximum.
    pub fn new(duration: u64, max: u64) -> Self {
        Self { duration, max }
    }

    /// Reject limits that could never admit a request.
    pub fn validate(&self) -> Result<()> {
        if self.duration == 0 {
            return Err(WindowgateError::Config(
                "limits.duration must be greater than zero".to_string(),
            ));
        }
        if self.duration > MAX_DURATION_MS {
            return Err(WindowgateError::Config(format!(
                "limits.duration must not exceed {} ms",
                MAX_DURATION_MS
            )));
        }
        if self.max == 0 {
            return Err(WindowgateError::Config(
                "limits.max must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// The outcome of one hit, as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    /// The configured maximum
    pub total: u64,
    /// Hits left in this window after this one, never negative
    pub remaining: u64,
    /// Epoch seconds at which the window resets
    pub reset: i64,
    /// Hits counted in this window, this one included
    pub count: u64,
    /// Exact time (epoch milliseconds) at which the window resets
    pub expires_at_ms: i64,
}

impl QuotaSnapshot {
    /// Build a snapshot from the store's view of the window.
    pub fn new(max: u64, count: u64, expires_at_ms: i64) -> Self {
        Self {
            total: max,
            remaining: max.saturating_sub(count),
            reset: expires_at_ms.div_euclid(1000),
            count,
            expires_at_ms,
        }
    }

    /// Whether this hit went over the limit and should be rejected.
    ///
    /// Decided on the raw count, not on `remaining`, which is clamped at
    /// zero and therefore cannot distinguish the last admitted hit from the
    /// first rejected one.
    pub fn is_exceeded(&self) -> bool {
        self.count > self.total
    }

    /// Whole seconds until the window resets, rounded up.
    pub fn retry_after_secs(&self, now_ms: i64) -> u64 {
        let delta_ms = self.reset_delta_ms(now_ms);
        (delta_ms + 999) / 1000
    }

    /// Milliseconds until the window resets, zero if it already has.
    ///
    /// Measured against the exact expiry, not the whole-second `reset`,
    /// which can lie up to a second earlier.
    pub fn reset_delta_ms(&self, now_ms: i64) -> u64 {
        self.expires_at_ms.saturating_sub(now_ms).max(0) as u64
    }
}

/// Counts hits per identity against a [`Store`].
///
/// The limiter holds no state of its own; every call performs exactly one
/// store increment and never retries.
pub struct RateLimiter<S, C = SystemClock> {
    /// Where hits are counted
    store: S,
    /// Time source for window arithmetic
    clock: C,
    /// Namespace prepended to identities
    key_prefix: String,
}

impl<S: Store> RateLimiter<S> {
    /// Create a limiter over `store` using the system clock.
    pub fn new(store: S) -> Self {
        Self::with_clock(store, SystemClock)
    }
}

impl<S: Store, C: Clock> RateLimiter<S, C> {
    /// Create a limiter with a custom clock.
    pub fn with_clock(store: S, clock: C) -> Self {
        Self {
            store,
            clock,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }

    /// Use a different key namespace.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// The store key for an identity.
    pub fn key_for(&self, identity: &str) -> String {
        format!("{}{}", self.key_prefix, identity)
    }

    /// The clock this limiter reads.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// The store this limiter counts against.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Count one hit for `identity` and report the resulting quota.
    ///
    /// Store failures are returned as-is; no verdict is guessed.
    pub async fn hit(&self, identity: &str, config: &RateLimitConfig) -> Result<QuotaSnapshot> {
        if identity.is_empty() {
            return Err(WindowgateError::InvalidIdentity(
                "identity must not be empty".to_string(),
            ));
        }

        let key = self.key_for(identity);
        let now_ms = self.clock.now_ms();

        let record = self
            .store
            .increment(&key, config.duration, now_ms)
            .await
            .map_err(|e| {
                warn!(key = %key, error = %e, "Rate limit store increment failed");
                e
            })?;

        let snapshot = QuotaSnapshot::new(config.max, record.count, record.expires_at_ms);

        trace!(
            key = %key,
            count = record.count,
            remaining = snapshot.remaining,
            reset = snapshot.reset,
            "Counted hit"
        );

        if snapshot.is_exceeded() {
            debug!(
                key = %key,
                count = record.count,
                limit = config.max,
                "Rate limit exceeded"
            );
        }

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::memory::MemoryStore;
    use crate::ratelimit::store::WindowRecord;
    use async_trait::async_trait;
    use std::sync::Arc;

    const T0: i64 = 1_700_000_000_123;

    fn test_limiter() -> RateLimiter<MemoryStore, Arc<ManualClock>> {
        RateLimiter::with_clock(MemoryStore::new(), Arc::new(ManualClock::new(T0)))
    }

    struct UnavailableStore;

    #[async_trait]
    impl Store for UnavailableStore {
        async fn increment(&self, _: &str, _: u64, _: i64) -> Result<WindowRecord> {
            Err(WindowgateError::store("connection reset"))
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = RateLimitConfig::default();
        assert_eq!(config.duration, 3_600_000);
        assert_eq!(config.max, 2500);
    }

    #[test]
    fn test_config_validation() {
        assert!(RateLimitConfig::new(1000, 1).validate().is_ok());
        assert!(RateLimitConfig::new(0, 1).validate().is_err());
        assert!(RateLimitConfig::new(1000, 0).validate().is_err());
        assert!(RateLimitConfig::new(MAX_DURATION_MS, 1).validate().is_ok());
        assert!(RateLimitConfig::new(MAX_DURATION_MS + 1, 1).validate().is_err());
        assert!(RateLimitConfig::new(u64::MAX, 1).validate().is_err());
    }

    #[test]
    fn test_snapshot_arithmetic() {
        let snapshot = QuotaSnapshot::new(10, 3, 1_700_000_001_999);
        assert_eq!(snapshot.total, 10);
        assert_eq!(snapshot.remaining, 7);
        assert_eq!(snapshot.reset, 1_700_000_001);
        assert!(!snapshot.is_exceeded());

        let over = QuotaSnapshot::new(10, 12, 0);
        assert_eq!(over.remaining, 0);
        assert!(over.is_exceeded());
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let snapshot = QuotaSnapshot::new(1, 2, 2_000);
        assert_eq!(snapshot.retry_after_secs(1_001), 1);
        assert_eq!(snapshot.retry_after_secs(0), 2);
        assert_eq!(snapshot.retry_after_secs(2_000), 0);
        assert_eq!(snapshot.retry_after_secs(5_000), 0);
    }

    #[test]
    fn test_retry_after_uses_exact_expiry() {
        // Window expires 123 ms past the whole second reported in `reset`
        let snapshot = QuotaSnapshot::new(1, 2, 1_700_000_001_123);
        assert_eq!(snapshot.reset, 1_700_000_001);
        assert_eq!(snapshot.reset_delta_ms(1_700_000_001_073), 50);
        assert_eq!(snapshot.retry_after_secs(1_700_000_001_073), 1);
        assert_eq!(snapshot.retry_after_secs(1_700_000_001_123), 0);
    }

    #[test]
    fn test_key_prefix() {
        let limiter = test_limiter();
        assert_eq!(limiter.key_for("10.0.0.1"), "limit:10.0.0.1");

        let limiter = limiter.with_key_prefix("api:");
        assert_eq!(limiter.key_for("bob"), "api:bob");
    }

    #[tokio::test]
    async fn test_remaining_counts_down_then_rejects() {
        let limiter = test_limiter();
        let config = RateLimitConfig::new(60_000, 5);

        let mut last_reset = None;
        for expected in (0..5).rev() {
            let snapshot = limiter.hit("alice", &config).await.unwrap();
            assert_eq!(snapshot.total, 5);
            assert_eq!(snapshot.remaining, expected);
            assert!(!snapshot.is_exceeded());
            if let Some(reset) = last_reset {
                assert!(snapshot.reset >= reset);
            }
            last_reset = Some(snapshot.reset);
            limiter.clock().advance(10);
        }

        let rejected = limiter.hit("alice", &config).await.unwrap();
        assert_eq!(rejected.remaining, 0);
        assert!(rejected.is_exceeded());
        assert_eq!(Some(rejected.reset), last_reset);
    }

    #[tokio::test]
    async fn test_window_resets_after_expiry() {
        let limiter = test_limiter();
        let config = RateLimitConfig::new(1_000, 3);

        for _ in 0..10 {
            limiter.hit("alice", &config).await.unwrap();
        }

        limiter.clock().advance(1_000);
        let snapshot = limiter.hit("alice", &config).await.unwrap();
        assert_eq!(snapshot.remaining, 2);
        assert_eq!(snapshot.count, 1);
        assert_eq!(snapshot.reset, (T0 + 2_000) / 1000);
    }

    #[tokio::test]
    async fn test_single_hit_window_scenario() {
        let limiter = test_limiter();
        let config = RateLimitConfig::new(1_000, 1);

        let first = limiter.hit("client", &config).await.unwrap();
        assert_eq!(first.total, 1);
        assert_eq!(first.remaining, 0);
        assert_eq!(first.reset, (T0 + 1_000) / 1000);
        assert!(!first.is_exceeded());

        limiter.clock().advance(50);
        let second = limiter.hit("client", &config).await.unwrap();
        assert!(second.is_exceeded());
        assert_eq!(second.retry_after_secs(limiter.clock().now_ms()), 1);

        limiter.clock().advance(1_000);
        let third = limiter.hit("client", &config).await.unwrap();
        assert_eq!(third.remaining, 0);
        assert!(!third.is_exceeded());
    }

    #[tokio::test]
    async fn test_late_rejection_retry_reaches_next_window() {
        let limiter = test_limiter();
        let config = RateLimitConfig::new(1_000, 1);

        limiter.hit("client", &config).await.unwrap();
        limiter.clock().advance(950);

        let rejected = limiter.hit("client", &config).await.unwrap();
        assert!(rejected.is_exceeded());
        assert_eq!(rejected.expires_at_ms, T0 + 1_000);
        let retry_after = rejected.retry_after_secs(limiter.clock().now_ms());
        assert_eq!(retry_after, 1);

        limiter.clock().advance(retry_after as i64 * 1000);
        let next = limiter.hit("client", &config).await.unwrap();
        assert!(!next.is_exceeded());
        assert_eq!(next.count, 1);
    }

    #[tokio::test]
    async fn test_identities_are_isolated() {
        let limiter = test_limiter();
        let config = RateLimitConfig::new(60_000, 2);

        for _ in 0..5 {
            limiter.hit("a", &config).await.unwrap();
        }

        let b = limiter.hit("b", &config).await.unwrap();
        assert_eq!(b.remaining, 1);
        assert!(!b.is_exceeded());
    }

    #[tokio::test]
    async fn test_empty_identity_is_rejected() {
        let limiter = test_limiter();
        let result = limiter.hit("", &RateLimitConfig::default()).await;
        assert!(matches!(result, Err(WindowgateError::InvalidIdentity(_))));
        assert!(limiter.store().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let limiter = RateLimiter::new(UnavailableStore);
        let result = limiter.hit("alice", &RateLimitConfig::default()).await;
        assert!(matches!(result, Err(WindowgateError::StoreUnavailable(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_hits_consume_exact_quota() {
        let limiter = Arc::new(test_limiter());
        let config = RateLimitConfig::new(60_000, 100);

        let handles: Vec<_> = (0..40)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.hit("shared", &config).await })
            })
            .collect();

        let snapshots: Vec<QuotaSnapshot> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .collect();

        assert!(snapshots.iter().all(|s| !s.is_exceeded()));

        let mut remaining: Vec<u64> = snapshots.iter().map(|s| s.remaining).collect();
        remaining.sort_unstable();
        assert_eq!(remaining, (60..100).collect::<Vec<u64>>());

        let next = limiter.hit("shared", &config).await.unwrap();
        assert_eq!(next.count, 41);
    }
}
