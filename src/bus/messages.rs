use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::FeedItem;

/// Layout of `published_at` on the wire.
pub const PUBLISHED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A freshly polled item, published once per item to the items topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsItem {
    pub source_id: i64,
    pub source_name: String,
    pub title: String,
    pub description: String,
    pub link: String,
    pub published_at: String,
}

impl NewsItem {
    pub fn from_feed(item: &FeedItem, source_id: i64, source_name: &str) -> Self {
        Self {
            source_id,
            source_name: source_name.to_string(),
            title: item.title.clone(),
            description: item.description.clone(),
            link: item.link.clone(),
            published_at: item.published_at.format(PUBLISHED_AT_FORMAT).to_string(),
        }
    }

    /// Natural key for idempotent handling.
    pub fn dedup_key(&self) -> String {
        format!("item:{}", self.link)
    }
}

/// One item addressed to one subscriber.
///
/// `news_id` is assigned by the persistence layer; it stays 0 for
/// notifications sent before the item was stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsNotification {
    pub chat_id: i64,
    pub news_id: i64,
    pub source_id: i64,
    pub source_name: String,
    pub title: String,
    pub description: String,
    pub link: String,
    pub published_at: String,
}

impl NewsNotification {
    pub fn for_chat(chat_id: i64, news_id: i64, item: &NewsItem) -> Self {
        Self {
            chat_id,
            news_id,
            source_id: item.source_id,
            source_name: item.source_name.clone(),
            title: item.title.clone(),
            description: item.description.clone(),
            link: item.link.clone(),
            published_at: item.published_at.clone(),
        }
    }

    /// The link is part of the key because `news_id` is 0 until persisted.
    pub fn dedup_key(&self) -> String {
        format!("notify:{}:{}:{}", self.chat_id, self.news_id, self.link)
    }
}

/// Topic names the bus reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub items: String,
    pub notifications: String,
}

impl Topics {
    pub fn new(items: impl Into<String>, notifications: impl Into<String>) -> Self {
        Self {
            items: items.into(),
            notifications: notifications.into(),
        }
    }

    pub fn all(&self) -> Vec<String> {
        vec![self.items.clone(), self.notifications.clone()]
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self::new("news-items", "news-notifications")
    }
}

/// A consumed message, decoded according to the topic it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusMessage {
    Item(NewsItem),
    Notification(NewsNotification),
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("message from unexpected topic {0:?}")]
    UnknownTopic(String),

    #[error("malformed payload on {topic}: {source}")]
    Json {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
}

impl BusMessage {
    pub fn decode(topics: &Topics, topic: &str, payload: &[u8]) -> Result<Self, DecodeError> {
        let json_err = |source| DecodeError::Json {
            topic: topic.to_string(),
            source,
        };
        if topic == topics.items {
            serde_json::from_slice(payload).map(BusMessage::Item).map_err(json_err)
        } else if topic == topics.notifications {
            serde_json::from_slice(payload)
                .map(BusMessage::Notification)
                .map_err(json_err)
        } else {
            Err(DecodeError::UnknownTopic(topic.to_string()))
        }
    }

    pub fn dedup_key(&self) -> String {
        match self {
            BusMessage::Item(item) => item.dedup_key(),
            BusMessage::Notification(n) => n.dedup_key(),
        }
    }
}
