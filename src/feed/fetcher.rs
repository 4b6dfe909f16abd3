use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use chrono_tz::Tz;
use feed_rs::model::Entry;
use feed_rs::parser;
use futures::stream::{self, StreamExt};
use reqwest::{Client, StatusCode};
use thiserror::Error;

use crate::models::{FeedItem, Source};

/// A feed could not be retrieved or understood. The cycle that asked for it
/// skips the source; nothing is retried here.
#[derive(Error, Debug)]
#[error("failed to fetch feed {url}: {cause}")]
pub struct FetchError {
    pub url: String,
    #[source]
    pub cause: FetchCause,
}

#[derive(Error, Debug)]
pub enum FetchCause {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    Status(StatusCode),

    #[error("invalid feed document: {0}")]
    Parse(#[from] parser::ParseFeedError),
}

pub struct FeedFetcher {
    client: Client,
}

impl FeedFetcher {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(concat!("news-relay/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Fetches and normalizes one feed. Entries without a usable date are
    /// stamped with the current time in `tz` instead of being dropped.
    pub async fn fetch(&self, url: &str, tz: Tz) -> Result<Vec<FeedItem>, FetchError> {
        let fail = |cause: FetchCause| FetchError {
            url: url.to_string(),
            cause,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fail(e.into()))?;

        if response.status() != StatusCode::OK {
            return Err(fail(FetchCause::Status(response.status())));
        }

        let bytes = response.bytes().await.map_err(|e| fail(e.into()))?;
        let feed = parser::parse(&bytes[..]).map_err(|e| fail(e.into()))?;

        let now = Utc::now();
        let items: Vec<FeedItem> = feed
            .entries
            .into_iter()
            .map(|entry| to_feed_item(entry, tz, now))
            .collect();

        tracing::debug!(url, items = items.len(), "feed fetched");
        Ok(items)
    }

    /// Fetch several sources concurrently, at most `concurrency` at a time.
    /// Results come back in completion order, one per source.
    pub async fn fetch_all(
        &self,
        sources: Vec<Source>,
        tz: Tz,
        concurrency: usize,
    ) -> Vec<(Source, Result<Vec<FeedItem>, FetchError>)> {
        stream::iter(sources)
            .map(|source| async move {
                let result = self.fetch(&source.url, tz).await;
                if let Err(e) = &result {
                    tracing::warn!(source = %source.name, "{}", e);
                }
                (source, result)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await
    }
}

fn to_feed_item(entry: Entry, tz: Tz, now: DateTime<Utc>) -> FeedItem {
    let published = entry.published.or(entry.updated).unwrap_or(now);

    FeedItem {
        title: entry.title.map(|t| t.content).unwrap_or_default(),
        description: entry.summary.map(|s| s.content).unwrap_or_default(),
        link: entry
            .links
            .first()
            .map(|l| l.href.clone())
            .unwrap_or_default(),
        published_at: in_zone(published, tz),
    }
}

fn in_zone(at: DateTime<Utc>, tz: Tz) -> DateTime<FixedOffset> {
    at.with_timezone(&tz).fixed_offset()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Test</title>
    <link>https://example.com/</link>
    <description>Test feed</description>
    <item>
      <title>Dated</title>
      <link>https://example.com/dated</link>
      <description>Has a date</description>
      <pubDate>Mon, 21 Oct 2024 07:28:00 GMT</pubDate>
    </item>
    <item>
      <title>Undated</title>
      <link>https://example.com/undated</link>
      <description>No date at all</description>
    </item>
  </channel>
</rss>"#;

    fn parse_items(tz: Tz, now: DateTime<Utc>) -> Vec<FeedItem> {
        let feed = parser::parse(RSS.as_bytes()).unwrap();
        feed.entries
            .into_iter()
            .map(|e| to_feed_item(e, tz, now))
            .collect()
    }

    #[test]
    fn dated_entries_are_converted_to_zone() {
        let items = parse_items(chrono_tz::Europe::Moscow, Utc::now());
        let dated = &items[0];
        assert_eq!(dated.title, "Dated");
        assert_eq!(dated.link, "https://example.com/dated");
        assert_eq!(dated.description, "Has a date");
        assert_eq!(dated.published_at.offset().local_minus_utc(), 3 * 3600);
        assert_eq!(
            dated.published_at.to_rfc3339(),
            "2024-10-21T10:28:00+03:00"
        );
    }

    #[test]
    fn missing_date_becomes_now_in_zone() {
        let now = Utc::now();
        let items = parse_items(chrono_tz::Europe::Moscow, now);
        let undated = &items[1];
        assert_eq!(undated.title, "Undated");
        assert_eq!(undated.published_at.with_timezone(&Utc), now);
        assert_eq!(undated.published_at.offset().local_minus_utc(), 3 * 3600);
    }
}
