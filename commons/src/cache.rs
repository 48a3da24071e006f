//! In-memory key/value cache with per-entry expiry.
//!
//! One cache instance per storage engine; the sweeper task is tied to the
//! cache's lifetime and aborted on drop.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// Mirrors the rate-limit window of the big public registries: a manifest
/// resolved once can be served from cache for the rest of the window.
pub const DEFAULT_TTL: Duration = Duration::from_secs(6 * 60 * 60);

const SWEEP_PERIOD: Duration = Duration::from_secs(5);

struct Entry<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    fn expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// Concurrent map of `String -> V` with optional TTL per entry.
pub struct Cache<V> {
    entries: Arc<RwLock<HashMap<String, Entry<V>>>>,
    sweeper: tokio::task::JoinHandle<()>,
}

impl<V: Clone + Send + Sync + 'static> Cache<V> {
    /// Create a cache and start its expiry sweeper.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new() -> Self {
        let entries: Arc<RwLock<HashMap<String, Entry<V>>>> = Arc::default();
        let weak: Weak<RwLock<HashMap<String, Entry<V>>>> = Arc::downgrade(&entries);
        let sweeper = tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_PERIOD);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let entries = match weak.upgrade() {
                    Some(entries) => entries,
                    None => return,
                };
                let now = Instant::now();
                entries.write().retain(|_, e| !e.expired(now));
            }
        });
        Cache { entries, sweeper }
    }

    /// Insert or replace `key`, expiring after `ttl` if given.
    pub fn set<K: Into<String>>(&self, key: K, value: V, ttl: Option<Duration>) {
        let entry = Entry {
            value,
            expires_at: ttl.map(|d| Instant::now() + d),
        };
        self.entries.write().insert(key.into(), entry);
    }

    /// Fetch `key`, dropping it if it has expired.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(e) if !e.expired(now) => return Some(e.value.clone()),
                None => return None,
                _ => {}
            }
        }
        self.entries.write().remove(key);
        None
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

impl<V> Drop for Cache<V> {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_replace() {
        let cache: Cache<String> = Cache::new();
        assert_eq!(cache.get("k"), None);

        cache.set("k", "v1".to_string(), None);
        assert_eq!(cache.get("k").as_deref(), Some("v1"));

        cache.set("k", "v2".to_string(), Some(DEFAULT_TTL));
        assert_eq!(cache.get("k").as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn expired_entries_are_dropped_on_get() {
        let cache: Cache<u32> = Cache::new();
        cache.set("k", 7, Some(Duration::from_millis(1)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn entries_without_ttl_survive() {
        let cache: Cache<u32> = Cache::new();
        cache.set("k", 7, None);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get("k"), Some(7));
    }
}
