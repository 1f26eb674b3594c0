//! Shared window store backed by Redis.
//!
//! The expiry check and the reset-or-increment run inside a single Lua
//! script, so every process pointing at the same Redis instance observes a
//! serialized sequence of hits per key.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::Script;
use tracing::{info, trace, warn};

use super::store::{Store, WindowRecord};
use crate::config::{StoreBackend, StoreConfig};
use crate::error::{Result, WindowgateError};

/// Window state lives in a hash with `count` and `expires` fields.
///
/// `KEYS[1]` is the window key, `ARGV[1]` the caller's time in epoch
/// milliseconds and `ARGV[2]` the window length in milliseconds. The key
/// also gets a server-side TTL of one window so abandoned identities are
/// reclaimed by Redis itself.
const INCREMENT_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local expires = tonumber(redis.call('HGET', KEYS[1], 'expires'))

if expires == nil or expires <= now then
  expires = now + window
  redis.call('HSET', KEYS[1], 'count', 1, 'expires', expires)
  redis.call('PEXPIRE', KEYS[1], window)
  return {1, expires}
end

local count = redis.call('HINCRBY', KEYS[1], 'count', 1)
return {count, expires}
"#;

fn manager_config(config: &StoreConfig) -> ConnectionManagerConfig {
    ConnectionManagerConfig::new()
        .set_number_of_retries(config.connect_retries)
        .set_max_delay(config.max_retry_delay_ms)
        .set_connection_timeout(Duration::from_millis(config.connect_timeout_ms))
}

/// A [`Store`] shared by every process connected to the same Redis.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    script: Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to the Redis instance at `url` with the default connection
    /// settings.
    ///
    /// A malformed URL is a configuration error; a server that cannot be
    /// reached is reported as [`WindowgateError::StoreUnavailable`].
    pub async fn connect(url: &str) -> Result<Self> {
        let config = StoreConfig {
            backend: StoreBackend::Redis,
            url: Some(url.to_string()),
            ..StoreConfig::default()
        };
        Self::from_config(&config).await
    }

    /// Build from the `store` section of the configuration.
    ///
    /// Connection attempts are bounded by `connect_timeout_ms`,
    /// `connect_retries` and `max_retry_delay_ms`, so an unreachable server
    /// fails construction promptly.
    pub async fn from_config(config: &StoreConfig) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| {
                WindowgateError::Config("store.url is required for the redis backend".to_string())
            })?;

        let client = redis::Client::open(url)
            .map_err(|e| WindowgateError::Config(format!("invalid redis url: {}", e)))?;

        let conn = ConnectionManager::new_with_config(client, manager_config(config))
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to connect to redis");
                WindowgateError::from(e)
            })?;

        info!("Connected to redis store");
        Ok(Self::with_connection(conn))
    }

    /// Wrap an already established connection.
    pub fn with_connection(conn: ConnectionManager) -> Self {
        Self {
            conn,
            script: Script::new(INCREMENT_SCRIPT),
        }
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn increment(&self, key: &str, window_ms: u64, now_ms: i64) -> Result<WindowRecord> {
        let mut conn = self.conn.clone();

        let (count, expires_at_ms): (u64, i64) = self
            .script
            .key(key)
            .arg(now_ms)
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(key = %key, error = %e, "Redis increment failed");
                WindowgateError::from(e)
            })?;

        trace!(key = %key, count = count, expires_at_ms = expires_at_ms, "Redis increment");

        Ok(WindowRecord {
            count,
            expires_at_ms,
        })
    }
}
