//! Request-level adapter around [`RateLimiter`].
//!
//! This module knows nothing about any particular HTTP framework. A caller
//! resolves each request to an [`Identity`], asks [`RateLimit::check`] for a
//! [`Verdict`] and renders the returned headers, status and body however its
//! framework expects.

mod format;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::ratelimit::{
    Clock, MemoryStore, QuotaSnapshot, RateLimitConfig, RateLimiter, RedisStore, Store,
    SystemClock, DEFAULT_DURATION_MS, DEFAULT_MAX,
};

pub use format::long_duration;

/// HTTP status for rejected requests.
pub const STATUS_TOO_MANY_REQUESTS: u16 = 429;

/// Maximum hits per window.
pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
/// Hits left in the current window.
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
/// Epoch seconds at which the window resets.
pub const HEADER_RESET: &str = "X-RateLimit-Reset";
/// Seconds to wait before retrying, sent only on rejection.
pub const HEADER_RETRY_AFTER: &str = "Retry-After";

/// Who a request is counted against.
///
/// `Option` converts with `None` meaning [`Identity::Skip`], so a resolver
/// reading an optional attribute leaves requests without it unlimited. Use
/// [`RateLimitOptions::by_peer_addr`] to count by client address instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Count the request against this key
    Key(String),
    /// Do not rate limit this request at all
    Skip,
}

impl From<String> for Identity {
    fn from(key: String) -> Self {
        Identity::Key(key)
    }
}

impl From<&str> for Identity {
    fn from(key: &str) -> Self {
        Identity::Key(key.to_string())
    }
}

impl<T: Into<Identity>> From<Option<T>> for Identity {
    fn from(key: Option<T>) -> Self {
        key.map_or(Identity::Skip, Into::into)
    }
}

/// Requests that know the address of the client that sent them.
pub trait PeerAddr {
    /// The client address, if the transport exposes one.
    fn peer_ip(&self) -> Option<IpAddr>;
}

impl PeerAddr for IpAddr {
    fn peer_ip(&self) -> Option<IpAddr> {
        Some(*self)
    }
}

impl PeerAddr for SocketAddr {
    fn peer_ip(&self) -> Option<IpAddr> {
        Some(self.ip())
    }
}

/// Maps a request to its identity.
pub type IdResolver<R> = Arc<dyn Fn(&R) -> Identity + Send + Sync>;

/// Per-middleware options.
pub struct RateLimitOptions<R> {
    /// Identity resolver
    pub id: IdResolver<R>,
    /// Window length in milliseconds
    pub duration: u64,
    /// Maximum hits per window
    pub max: u64,
}

impl<R> RateLimitOptions<R> {
    /// Options with the default window (one hour) and maximum (2500).
    pub fn new<F>(id: F) -> Self
    where
        F: Fn(&R) -> Identity + Send + Sync + 'static,
    {
        Self {
            id: Arc::new(id),
            duration: DEFAULT_DURATION_MS,
            max: DEFAULT_MAX,
        }
    }

    /// Set the window length in milliseconds.
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration = duration_ms;
        self
    }

    /// Set the maximum hits per window.
    pub fn with_max(mut self, max: u64) -> Self {
        self.max = max;
        self
    }

    /// The limits these options describe.
    pub fn limits(&self) -> RateLimitConfig {
        RateLimitConfig::new(self.duration, self.max)
    }
}

impl<R: PeerAddr + 'static> RateLimitOptions<R> {
    /// Options that count each request against its client address.
    ///
    /// A request without an address resolves to an empty identity, which
    /// [`RateLimit::check`] reports as [`WindowgateError::InvalidIdentity`]
    /// rather than letting it through.
    ///
    /// [`WindowgateError::InvalidIdentity`]: crate::error::WindowgateError::InvalidIdentity
    pub fn by_peer_addr() -> Self {
        Self::new(|req: &R| {
            Identity::Key(req.peer_ip().map(|ip| ip.to_string()).unwrap_or_default())
        })
    }
}

impl<R> Clone for RateLimitOptions<R> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            duration: self.duration,
            max: self.max,
        }
    }
}

/// Header values derived from a [`QuotaSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitHeaders {
    /// Value of `X-RateLimit-Limit`
    pub limit: u64,
    /// Value of `X-RateLimit-Remaining`
    pub remaining: u64,
    /// Value of `X-RateLimit-Reset`
    pub reset: i64,
    /// Value of `Retry-After`, only present on rejection
    pub retry_after: Option<u64>,
}

impl RateLimitHeaders {
    fn admitted(snapshot: &QuotaSnapshot) -> Self {
        Self {
            limit: snapshot.total,
            remaining: snapshot.remaining,
            reset: snapshot.reset,
            retry_after: None,
        }
    }

    /// Header name/value pairs in the order they should be set.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            (HEADER_LIMIT, self.limit.to_string()),
            (HEADER_REMAINING, self.remaining.to_string()),
            (HEADER_RESET, self.reset.to_string()),
        ];
        if let Some(retry_after) = self.retry_after {
            pairs.push((HEADER_RETRY_AFTER, retry_after.to_string()));
        }
        pairs
    }
}

/// What the caller should do with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The request was not rate limited; no headers are set
    Bypass,
    /// The request is within quota and continues down the chain
    Admit {
        /// Quota headers for the response
        headers: RateLimitHeaders,
    },
    /// The request is over quota and must not reach the handler
    Reject {
        /// Quota headers, `Retry-After` included
        headers: RateLimitHeaders,
        /// Response status, always [`STATUS_TOO_MANY_REQUESTS`]
        status: u16,
        /// Human-readable explanation for the client
        body: String,
    },
}

impl Verdict {
    /// Whether the request continues to the handler.
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Verdict::Reject { .. })
    }

    /// The headers to set on the response, empty for [`Verdict::Bypass`].
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        match self {
            Verdict::Bypass => Vec::new(),
            Verdict::Admit { headers } | Verdict::Reject { headers, .. } => headers.to_pairs(),
        }
    }
}

/// Rate limiting for requests of type `R`.
pub struct RateLimit<R, S = Arc<dyn Store>, C = SystemClock> {
    limiter: Arc<RateLimiter<S, C>>,
    id: IdResolver<R>,
    limits: RateLimitConfig,
}

impl<R> RateLimit<R, MemoryStore> {
    /// Count hits in a store owned by this middleware.
    pub fn memory(options: RateLimitOptions<R>) -> Result<Self> {
        Self::new(Arc::new(RateLimiter::new(MemoryStore::new())), options)
    }
}

impl<R> RateLimit<R, RedisStore> {
    /// Count hits in the Redis instance at `url`, shared by every process
    /// using it.
    pub async fn redis(options: RateLimitOptions<R>, url: Option<&str>) -> Result<Self> {
        let config = crate::config::StoreConfig {
            backend: crate::config::StoreBackend::Redis,
            url: url.map(str::to_string),
            ..Default::default()
        };
        let store = RedisStore::from_config(&config).await?;
        Self::new(Arc::new(RateLimiter::new(store)), options)
    }
}

impl<R, S: Store, C: Clock> RateLimit<R, S, C> {
    /// Wrap an existing limiter.
    pub fn new(limiter: Arc<RateLimiter<S, C>>, options: RateLimitOptions<R>) -> Result<Self> {
        let limits = options.limits();
        limits.validate()?;

        Ok(Self {
            limiter,
            id: options.id,
            limits,
        })
    }

    /// The underlying limiter.
    pub fn limiter(&self) -> &Arc<RateLimiter<S, C>> {
        &self.limiter
    }

    /// Count `request` and decide whether it may proceed.
    ///
    /// Store errors are returned unchanged so the caller can pick its own
    /// fail-open or fail-closed policy.
    pub async fn check(&self, request: &R) -> Result<Verdict> {
        let identity = match (self.id)(request) {
            Identity::Skip => return Ok(Verdict::Bypass),
            Identity::Key(key) => key,
        };

        let snapshot = self.limiter.hit(&identity, &self.limits).await?;
        let mut headers = RateLimitHeaders::admitted(&snapshot);

        debug!(
            identity = %identity,
            remaining = snapshot.remaining,
            total = snapshot.total,
            "Checked request quota"
        );

        if !snapshot.is_exceeded() {
            return Ok(Verdict::Admit { headers });
        }

        let now_ms = self.limiter.clock().now_ms();
        headers.retry_after = Some(snapshot.retry_after_secs(now_ms));

        Ok(Verdict::Reject {
            headers,
            status: STATUS_TOO_MANY_REQUESTS,
            body: format!(
                "Rate limit exceeded, retry in {}",
                long_duration(snapshot.reset_delta_ms(now_ms))
            ),
        })
    }
}

impl<R, S, C> Clone for RateLimit<R, S, C> {
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            id: self.id.clone(),
            limits: self.limits,
        }
    }
}
