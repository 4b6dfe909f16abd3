use std::sync::Arc;
use std::time::Duration;

use crate::config::CacheConfig;
use crate::models::{ContentRecord, Source, UserRecord};

use super::{SweeperHandle, TtlCache};

/// The process-wide set of named caches.
///
/// Built once at startup and shared by handle with every component that
/// needs a cache. Each instance is typed by what it stores.
#[derive(Debug, Clone)]
pub struct CacheRegistry {
    /// Validated article content keyed by URL fingerprint.
    pub content: Arc<TtlCache<ContentRecord>>,
    /// Users keyed by chat id.
    pub users: Arc<TtlCache<UserRecord>>,
    /// The active source list, stored under a single key.
    pub sources: Arc<TtlCache<Vec<Source>>>,
    /// Subscriber chat ids keyed by source id.
    pub subscriptions: Arc<TtlCache<Vec<i64>>>,
    /// `source_id:link` pairs already published.
    pub seen_links: Arc<TtlCache<()>>,
}

impl CacheRegistry {
    pub fn new(config: &CacheConfig) -> Self {
        let secs = Duration::from_secs;
        Self {
            content: Arc::new(TtlCache::new("content", secs(config.content_ttl_secs))),
            users: Arc::new(TtlCache::new("users", secs(config.user_ttl_secs))),
            sources: Arc::new(TtlCache::new("sources", secs(config.source_ttl_secs))),
            subscriptions: Arc::new(TtlCache::new(
                "subscriptions",
                secs(config.subscription_ttl_secs),
            )),
            seen_links: Arc::new(TtlCache::new("seen_links", secs(config.seen_link_ttl_secs))),
        }
    }

    /// Starts one cleanup worker per cache.
    pub fn spawn_sweepers(&self, interval: Duration) -> Vec<SweeperHandle> {
        vec![
            self.content.spawn_sweeper(interval),
            self.users.spawn_sweeper(interval),
            self.sources.spawn_sweeper(interval),
            self.subscriptions.spawn_sweeper(interval),
            self.seen_links.spawn_sweeper(interval),
        ]
    }

    pub fn clear_all(&self) {
        self.content.clear();
        self.users.clear();
        self.sources.clear();
        self.subscriptions.clear();
        self.seen_links.clear();
    }
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}
