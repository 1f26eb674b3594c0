//! In-process window store.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::store::{Store, WindowRecord};
use crate::error::Result;

/// A [`Store`] backed by a map owned by this instance.
///
/// Counts are visible only to limiters holding this instance. Windows are
/// never evicted; a stale entry is overwritten the next time its key is hit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    windows: Mutex<HashMap<String, WindowRecord>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held, expired ones included.
    pub fn len(&self) -> usize {
        self.windows.lock().len()
    }

    /// Whether no key has ever been hit.
    pub fn is_empty(&self) -> bool {
        self.windows.lock().is_empty()
    }

    /// Look at a key's window without counting a hit.
    pub fn peek(&self, key: &str) -> Option<WindowRecord> {
        self.windows.lock().get(key).copied()
    }

    fn increment_locked(&self, key: &str, window_ms: u64, now_ms: i64) -> WindowRecord {
        let mut windows = self.windows.lock();

        if let Some(record) = windows.get_mut(key) {
            if !record.is_expired(now_ms) {
                record.count += 1;
                return *record;
            }
        }

        let record = WindowRecord::first_hit(window_ms, now_ms);
        debug!(
            key = %key,
            expires_at_ms = record.expires_at_ms,
            "Starting new window"
        );
        windows.insert(key.to_string(), record);
        record
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn increment(&self, key: &str, window_ms: u64, now_ms: i64) -> Result<WindowRecord> {
        Ok(self.increment_locked(key, window_ms, now_ms))
    }
}
