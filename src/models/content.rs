use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Full article content scraped from a source page.
///
/// A record is built by the scraper, sanitized in place by the validator and
/// only then cached or handed out. Tags keep insertion order and are unique
/// case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub full_text: String,
    pub author: String,
    pub category: String,
    pub tags: Vec<String>,
    pub images: Vec<String>,
    pub published_at: Option<DateTime<FixedOffset>>,
    pub meta_keywords: String,
    pub meta_description: String,
    pub meta_data: BTreeMap<String, String>,
    pub content_html: String,
}

impl ContentRecord {
    /// Appends `tag` unless an equal tag (ignoring case) is already present.
    pub fn push_tag(&mut self, tag: &str) -> bool {
        let tag = tag.trim();
        if tag.is_empty() || self.tags.iter().any(|t| t.to_lowercase() == tag.to_lowercase()) {
            return false;
        }
        self.tags.push(tag.to_string());
        true
    }

    /// Appends `url` unless it is already present.
    pub fn push_image(&mut self, url: &str) -> bool {
        if url.is_empty() || self.images.iter().any(|u| u == url) {
            return false;
        }
        self.images.push(url.to_string());
        true
    }
}
