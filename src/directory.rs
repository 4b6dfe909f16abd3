//! Lookups the pipeline needs from the administrative side: which sources to
//! poll, who subscribes to them, and whether a user is still active.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use crate::cache::CacheRegistry;
use crate::config::Config;
use crate::error::Result;
use crate::models::{Source, UserRecord};

const SOURCES_KEY: &str = "active";

#[async_trait]
pub trait Directory: Send + Sync {
    async fn active_sources(&self) -> Result<Vec<Source>>;

    /// Chat ids subscribed to `source_id`. Empty for unknown sources.
    async fn subscribers(&self, source_id: i64) -> Result<Vec<i64>>;

    async fn user(&self, chat_id: i64) -> Result<Option<UserRecord>>;
}

/// Directory backed by the `[[sources]]` and `[[users]]` config tables.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    sources: Vec<Source>,
    subscribers: HashMap<i64, Vec<i64>>,
    users: HashMap<i64, UserRecord>,
}

impl StaticDirectory {
    pub fn from_config(config: &Config) -> Self {
        let mut directory = Self::default();
        for source in &config.sources {
            if source.active {
                directory.sources.push(Source {
                    id: source.id,
                    name: source.name.clone(),
                    url: source.url.clone(),
                });
            }
            directory
                .subscribers
                .entry(source.id)
                .or_default()
                .extend(source.subscribers.iter().copied());
        }
        directory.sources.sort_by_key(|s| s.id);
        for user in &config.users {
            directory.users.insert(user.chat_id, user.clone());
        }
        directory
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn active_sources(&self) -> Result<Vec<Source>> {
        Ok(self.sources.clone())
    }

    async fn subscribers(&self, source_id: i64) -> Result<Vec<i64>> {
        Ok(self.subscribers.get(&source_id).cloned().unwrap_or_default())
    }

    async fn user(&self, chat_id: i64) -> Result<Option<UserRecord>> {
        Ok(self.users.get(&chat_id).cloned())
    }
}

/// Read-through cache over another directory using the registry's
/// `sources`, `subscriptions` and `users` caches.
///
/// Misses are not cached for users, so a newly registered chat is seen on
/// the next lookup.
pub struct CachedDirectory<D> {
    inner: D,
    caches: CacheRegistry,
}

impl<D: Directory> CachedDirectory<D> {
    pub fn new(inner: D, caches: CacheRegistry) -> Self {
        Self { inner, caches }
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }
}

#[async_trait]
impl<D: Directory> Directory for CachedDirectory<D> {
    async fn active_sources(&self) -> Result<Vec<Source>> {
        if let Some(sources) = self.caches.sources.get(SOURCES_KEY) {
            return Ok(sources);
        }
        let sources = self.inner.active_sources().await?;
        debug!(count = sources.len(), "source list refreshed");
        self.caches.sources.set(SOURCES_KEY, sources.clone());
        Ok(sources)
    }

    async fn subscribers(&self, source_id: i64) -> Result<Vec<i64>> {
        let key = source_id.to_string();
        if let Some(chats) = self.caches.subscriptions.get(&key) {
            return Ok(chats);
        }
        let chats = self.inner.subscribers(source_id).await?;
        self.caches.subscriptions.set(key, chats.clone());
        Ok(chats)
    }

    async fn user(&self, chat_id: i64) -> Result<Option<UserRecord>> {
        let key = chat_id.to_string();
        if let Some(user) = self.caches.users.get(&key) {
            return Ok(Some(user));
        }
        let user = self.inner.user(chat_id).await?;
        if let Some(user) = &user {
            self.caches.users.set(key, user.clone());
        }
        Ok(user)
    }
}
