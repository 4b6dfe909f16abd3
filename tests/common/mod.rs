#![allow(dead_code)]

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;

use news_relay::cache::TtlCache;
use news_relay::config::ScraperConfig;
use news_relay::models::ContentRecord;
use news_relay::scraper::Scraper;

pub const ARTICLE_HTML: &str = r#"<!DOCTYPE html>
<html><head>
  <title>Rates held</title>
  <meta name="keywords" content="Economy, rates">
  <meta name="description" content="The central bank held rates.">
  <meta property="og:image" content="//cdn.example.com/lead.jpg">
  <meta property="og:title" content="Rates held">
</head><body>
  <article>
    <h1>Rates held</h1>
    <span class="author">Jane Doe</span>
    <p>The central bank kept its key rate unchanged on Tuesday, citing persistent inflation
    pressures and a tight labour market that continues to push wages higher.</p>
    <p>Analysts had widely expected the decision, although a minority forecast a cut given
    the slowdown in consumer lending over the last quarter.</p>
    <img src="https://cdn.example.com/chart.png">
    <img src="/relative/only.png">
  </article>
</body></html>"#;

/// One retry step of 100ms and a short per-attempt timeout.
pub fn fast_scraper_config() -> ScraperConfig {
    ScraperConfig {
        timeout_secs: 5,
        backoff_step_ms: 100,
        ..ScraperConfig::default()
    }
}

pub fn scraper(config: ScraperConfig) -> Scraper {
    let cache: Arc<TtlCache<ContentRecord>> =
        Arc::new(TtlCache::new("content", Duration::from_secs(60)));
    Scraper::new(config, cache).unwrap()
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// RSS 2.0 document with one `<item>` per `(title, link, published)`.
pub fn rss(items: &[(&str, &str, DateTime<Utc>)]) -> String {
    let mut body = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel><title>Test Feed</title><link>http://example.com/</link><description>Test</description>"#,
    );
    for (title, link, published) in items {
        body.push_str(&format!(
            "<item><title>{}</title><link>{}</link><guid>{}</guid><pubDate>{}</pubDate><description>About {}</description></item>",
            title,
            link,
            link,
            published.to_rfc2822(),
            title
        ));
    }
    body.push_str("</channel></rss>");
    body
}
