use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::messages::{NewsItem, NewsNotification, Topics};
use super::{AppendAck, BusError, MessageLog};
use crate::models::FeedItem;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to publish to {topic}: {source}")]
    Append {
        topic: String,
        #[source]
        source: BusError,
    },
}

/// Outcome of a notification fan-out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanOutReport {
    pub sent: usize,
    pub failed: usize,
}

/// Serializes messages and appends them to their topics.
///
/// Nothing is retried here: a failed send is returned to the caller, who
/// decides whether to send again.
#[derive(Clone)]
pub struct Publisher {
    log: Arc<dyn MessageLog>,
    topics: Topics,
    ack_timeout: Duration,
}

impl Publisher {
    pub fn new(log: Arc<dyn MessageLog>, topics: Topics, ack_timeout: Duration) -> Self {
        Self {
            log,
            topics,
            ack_timeout,
        }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Keyed by link so repeats of one item share a partition.
    pub async fn send_news_item(&self, item: &NewsItem) -> Result<AppendAck, PublishError> {
        self.send(&self.topics.items, &item.link, item).await
    }

    /// Keyed by chat so one subscriber's notifications stay in order.
    pub async fn send_news_notification(
        &self,
        notification: &NewsNotification,
    ) -> Result<AppendAck, PublishError> {
        let key = notification.chat_id.to_string();
        self.send(&self.topics.notifications, &key, notification).await
    }

    /// Sends one notification per distinct chat id, in ascending order.
    /// A failed recipient is logged and skipped.
    pub async fn send_news_to_subscribers(
        &self,
        chat_ids: &[i64],
        item: &FeedItem,
        source_id: i64,
        source_name: &str,
    ) -> FanOutReport {
        let mut chat_ids = chat_ids.to_vec();
        chat_ids.sort_unstable();
        chat_ids.dedup();

        let news = NewsItem::from_feed(item, source_id, source_name);
        let mut report = FanOutReport::default();
        for chat_id in chat_ids {
            let notification = NewsNotification::for_chat(chat_id, 0, &news);
            match self.send_news_notification(&notification).await {
                Ok(_) => report.sent += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(chat_id, link = %news.link, "failed to notify subscriber: {}", e);
                }
            }
        }
        report
    }

    async fn send<T: Serialize>(
        &self,
        topic: &str,
        key: &str,
        message: &T,
    ) -> Result<AppendAck, PublishError> {
        let payload = serde_json::to_vec(message)?;
        let append = self.log.append(topic, key, payload);
        let result = match tokio::time::timeout(self.ack_timeout, append).await {
            Ok(result) => result,
            Err(_) => Err(BusError::Timeout(self.ack_timeout)),
        };

        match result {
            Ok(ack) => {
                counter!("bus_published_total", "topic" => topic.to_string()).increment(1);
                debug!(topic, partition = ack.partition, offset = ack.offset, "message published");
                Ok(ack)
            }
            Err(source) => {
                counter!("bus_publish_errors_total", "topic" => topic.to_string()).increment(1);
                Err(PublishError::Append {
                    topic: topic.to_string(),
                    source,
                })
            }
        }
    }
}
