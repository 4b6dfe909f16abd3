use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// One entry of a syndication feed, normalized by the poller.
///
/// `link` identifies the item within a polling cycle; it is not guaranteed to
/// be unique across sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub title: String,
    pub description: String,
    pub link: String,
    pub published_at: DateTime<FixedOffset>,
}

/// A feed source as supplied by the administrative layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub chat_id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}
