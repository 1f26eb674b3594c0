//! Rate limiting logic and window stores.

mod clock;
mod limiter;
mod memory;
mod redis;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use limiter::{
    QuotaSnapshot, RateLimitConfig, RateLimiter, DEFAULT_DURATION_MS, DEFAULT_KEY_PREFIX,
    DEFAULT_MAX, MAX_DURATION_MS,
};
pub use memory::MemoryStore;
pub use self::redis::RedisStore;
pub use store::{build_store, Store, WindowRecord};
