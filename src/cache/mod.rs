//! In-process expiring key/value store.
//!
//! Every named cache is an instance of [`TtlCache`] with its own TTL. Expired
//! entries are never returned: `get` and `size` evict them lazily, and
//! `cleanup` sweeps the whole map.

mod registry;

pub use registry::CacheRegistry;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expiration: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expiration
    }
}

/// Thread-safe TTL cache keyed by string.
///
/// All operations take a single lock and never call back into the cache while
/// holding it.
#[derive(Debug)]
pub struct TtlCache<V> {
    name: &'static str,
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Stores `value` until now + TTL, replacing any previous entry.
    pub fn set(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let entry = CacheEntry {
            value,
            expiration: Instant::now() + self.ttl,
        };
        debug!(cache = self.name, key = %key, ttl = ?self.ttl, "cache entry set");
        self.entries.lock().insert(key, entry);
    }

    /// Returns the live value for `key`. An expired entry is removed and
    /// reported exactly like a missing one.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                debug!(cache = self.name, key, "cache entry expired");
                None
            }
            None => None,
        }
    }

    pub fn delete(&self, key: &str) {
        self.entries.lock().remove(key);
        debug!(cache = self.name, key, "cache entry deleted");
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
        info!(cache = self.name, "cache cleared");
    }

    /// Number of live entries; expired ones found during the scan are evicted.
    pub fn size(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| !entry.is_expired(now));
        entries.len()
    }

    /// Removes every expired entry and returns how many were dropped.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(cache = self.name, removed, "expired cache entries cleaned up");
        }
        removed
    }
}

impl<V: Clone + Send + 'static> TtlCache<V> {
    /// Runs [`TtlCache::cleanup`] every `interval` until the handle is stopped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> SweeperHandle {
        let cache = Arc::clone(self);
        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = &mut cancel_rx => break,
                    _ = ticker.tick() => {
                        cache.cleanup();
                    }
                }
            }
            debug!(cache = cache.name, "cache sweeper stopped");
        });
        info!(cache = self.name, ?interval, "cache cleanup worker started");
        SweeperHandle { cancel_tx, join }
    }
}

pub struct SweeperHandle {
    cancel_tx: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl SweeperHandle {
    pub async fn stop(self) {
        let _ = self.cancel_tx.send(());
        let _ = self.join.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn get_after_set_returns_value() {
        let cache = TtlCache::new("test", Duration::from_secs(60));
        cache.set("a", 1);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn set_overwrites_existing_entry() {
        let cache = TtlCache::new("test", Duration::from_secs(60));
        cache.set("a", "old".to_string());
        cache.set("a", "new".to_string());
        assert_eq!(cache.get("a").as_deref(), Some("new"));
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn expired_entry_is_reported_missing() {
        let cache = TtlCache::new("test", Duration::from_millis(20));
        cache.set("a", 1);
        thread::sleep(Duration::from_millis(60));
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn size_evicts_expired_without_cleanup() {
        let cache = TtlCache::new("test", Duration::from_millis(20));
        cache.set("a", 1);
        cache.set("b", 2);
        assert_eq!(cache.size(), 2);
        thread::sleep(Duration::from_millis(60));
        cache.set("c", 3);
        assert_eq!(cache.size(), 1);
        assert_eq!(cache.cleanup(), 0);
    }

    #[test]
    fn cleanup_reports_removed_entries() {
        let cache = TtlCache::new("test", Duration::from_millis(20));
        cache.set("a", 1);
        cache.set("b", 2);
        thread::sleep(Duration::from_millis(60));
        assert_eq!(cache.cleanup(), 2);
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn delete_and_clear_remove_entries() {
        let cache = TtlCache::new("test", Duration::from_secs(60));
        cache.set("a", 1);
        cache.set("b", 2);
        cache.delete("a");
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.size(), 1);
        cache.clear();
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn concurrent_access_is_safe() {
        let cache = Arc::new(TtlCache::new("test", Duration::from_secs(60)));
        let workers: Vec<_> = (0..8)
            .map(|w| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..500 {
                        let key = format!("{}-{}", w, i % 50);
                        cache.set(key.clone(), i);
                        let _ = cache.get(&key);
                        if i % 7 == 0 {
                            cache.delete(&key);
                        }
                        let _ = cache.size();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert!(cache.size() <= 8 * 50);
    }

    #[tokio::test]
    async fn sweeper_removes_expired_entries() {
        let cache = Arc::new(TtlCache::new("test", Duration::from_millis(10)));
        cache.set("a", 1);
        let handle = cache.spawn_sweeper(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(cache.entries.lock().len(), 0);
        handle.stop().await;
    }

    #[tokio::test]
    async fn stop_does_not_wait_for_the_next_tick() {
        let cache: Arc<TtlCache<u8>> = Arc::new(TtlCache::new("test", Duration::from_secs(60)));
        let handle = cache.spawn_sweeper(Duration::from_secs(3600));
        tokio::time::timeout(Duration::from_secs(1), handle.stop())
            .await
            .expect("sweeper did not stop");
    }
}
