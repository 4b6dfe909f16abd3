//! One polling cycle: poll every active source, drop stale and already seen
//! items, scrape the rest, publish them and notify subscribers.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::bus::{NewsItem, Publisher};
use crate::cache::TtlCache;
use crate::config::FeedConfig;
use crate::directory::Directory;
use crate::error::Result;
use crate::feed::FeedFetcher;
use crate::models::{ContentRecord, FeedItem, Source};
use crate::scraper::Scraper;

/// Receives validated article content. Persistence lives behind this.
#[async_trait]
pub trait ContentSink: Send + Sync {
    async fn store(&self, item: &NewsItem, content: &ContentRecord) -> anyhow::Result<()>;
}

/// Sink that only logs what it was given.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl ContentSink for LogSink {
    async fn store(&self, item: &NewsItem, content: &ContentRecord) -> anyhow::Result<()> {
        info!(
            link = %item.link,
            source = %item.source_name,
            text_bytes = content.full_text.len(),
            images = content.images.len(),
            tags = content.tags.len(),
            "content ready"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CycleSettings {
    pub tz: Tz,
    pub max_item_age: chrono::Duration,
    pub concurrency: usize,
}

impl CycleSettings {
    pub fn from_config(config: &FeedConfig) -> Result<Self> {
        Ok(Self {
            tz: config.tz()?,
            max_item_age: config.max_item_age(),
            concurrency: config.concurrency.max(1),
        })
    }
}

/// Counters for one cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub sources_ok: usize,
    pub sources_failed: usize,
    pub items_found: usize,
    pub stale_skipped: usize,
    pub duplicates_skipped: usize,
    pub published: usize,
    pub publish_failures: usize,
    pub scraped: usize,
    pub scrape_failures: usize,
    pub notifications_sent: usize,
    pub notification_failures: usize,
}

#[derive(Default)]
struct ItemOutcome {
    scraped: bool,
    published: bool,
    notified: usize,
    notify_failed: usize,
}

pub struct Pipeline {
    fetcher: FeedFetcher,
    scraper: Arc<Scraper>,
    publisher: Publisher,
    directory: Arc<dyn Directory>,
    sink: Arc<dyn ContentSink>,
    seen: Arc<TtlCache<()>>,
    settings: CycleSettings,
}

impl Pipeline {
    pub fn new(
        fetcher: FeedFetcher,
        scraper: Arc<Scraper>,
        publisher: Publisher,
        directory: Arc<dyn Directory>,
        sink: Arc<dyn ContentSink>,
        seen: Arc<TtlCache<()>>,
        settings: CycleSettings,
    ) -> Self {
        Self {
            fetcher,
            scraper,
            publisher,
            directory,
            sink,
            seen,
            settings,
        }
    }

    /// Runs one cycle. Only a failure to list sources is an error; every
    /// per-source and per-item failure is logged and counted instead.
    ///
    /// An item is marked seen only once its `NewsItem` is acknowledged, so a
    /// failed publish is retried by the next cycle.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let sources = self.directory.active_sources().await?;
        let mut report = CycleReport::default();
        if sources.is_empty() {
            debug!("no active sources");
            return Ok(report);
        }

        let fetched = self
            .fetcher
            .fetch_all(sources, self.settings.tz, self.settings.concurrency)
            .await;

        let cutoff = Utc::now() - self.settings.max_item_age;
        let mut in_cycle = HashSet::new();
        let mut fresh: Vec<(Source, FeedItem)> = Vec::new();

        for (source, result) in fetched {
            let items = match result {
                Ok(items) => items,
                Err(_) => {
                    report.sources_failed += 1;
                    continue;
                }
            };
            report.sources_ok += 1;
            report.items_found += items.len();

            for item in items {
                if item.link.is_empty() || item.published_at < cutoff {
                    report.stale_skipped += 1;
                    continue;
                }
                let key = seen_key(source.id, &item.link);
                if self.seen.get(&key).is_some() || !in_cycle.insert(key) {
                    report.duplicates_skipped += 1;
                    continue;
                }
                fresh.push((source.clone(), item));
            }
        }

        let outcomes: Vec<ItemOutcome> = stream::iter(fresh)
            .map(|(source, item)| async move { self.process_item(&source, &item).await })
            .buffer_unordered(self.settings.concurrency)
            .collect()
            .await;

        for outcome in &outcomes {
            if outcome.scraped {
                report.scraped += 1;
            } else {
                report.scrape_failures += 1;
            }
            if outcome.published {
                report.published += 1;
            } else {
                report.publish_failures += 1;
            }
            report.notifications_sent += outcome.notified;
            report.notification_failures += outcome.notify_failed;
        }

        info!(
            sources_ok = report.sources_ok,
            sources_failed = report.sources_failed,
            items = report.items_found,
            published = report.published,
            notifications = report.notifications_sent,
            "poll cycle finished"
        );
        Ok(report)
    }

    async fn process_item(&self, source: &Source, item: &FeedItem) -> ItemOutcome {
        let mut outcome = ItemOutcome::default();
        let news = NewsItem::from_feed(item, source.id, &source.name);

        match self.scraper.scrape(&item.link).await {
            Ok(content) => {
                outcome.scraped = true;
                if let Err(e) = self.sink.store(&news, &content).await {
                    warn!(link = %item.link, "content sink failed: {:#}", e);
                }
            }
            Err(e) => warn!(link = %item.link, source = %source.name, "scrape failed: {}", e),
        }

        if let Err(e) = self.publisher.send_news_item(&news).await {
            warn!(link = %item.link, "news item not published: {}", e);
            return outcome;
        }
        outcome.published = true;
        self.seen.set(seen_key(source.id, &item.link), ());

        match self.directory.subscribers(source.id).await {
            Ok(chat_ids) if chat_ids.is_empty() => {}
            Ok(chat_ids) => {
                let fan_out = self
                    .publisher
                    .send_news_to_subscribers(&chat_ids, item, source.id, &source.name)
                    .await;
                outcome.notified = fan_out.sent;
                outcome.notify_failed = fan_out.failed;
            }
            Err(e) => warn!(source_id = source.id, "subscriber lookup failed: {}", e),
        }
        outcome
    }

    /// Runs a cycle now and then every `interval` until `shutdown` flips to
    /// true or its sender goes away. A cycle in progress is finished first.
    pub async fn run_forever(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(?interval, "poller started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!("poll cycle failed: {}", e);
                    }
                }
            }
        }
        info!("poller stopped");
    }
}

fn seen_key(source_id: i64, link: &str) -> String {
    format!("{}:{}", source_id, link)
}
