mod dates;
pub mod decompress;
pub mod extract;
pub mod validator;

pub use dates::parse_date;
pub use decompress::{DecompressError, Encoding};
pub use extract::ExtractError;
pub use validator::{validate_and_sanitize, ContentValidationError, Violation};

use std::sync::Arc;

use metrics::counter;
use reqwest::header::{
    HeaderMap, HeaderValue, InvalidHeaderValue, ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE,
    CACHE_CONTROL, CONTENT_ENCODING,
};
use reqwest::{Client, Response, StatusCode};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::TtlCache;
use crate::config::ScraperConfig;
use crate::models::ContentRecord;

use extract::Strategies;

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const ACCEPT_CODINGS: &str = "gzip, deflate, br";

/// Compressed bodies may legitimately exceed the decoded cap; stop reading
/// the wire at this multiple of it.
const RAW_BODY_FACTOR: usize = 4;

#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("invalid article URL {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("request failed after {attempts} attempts: {source}")]
    Transport {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected HTTP status {status} after {attempts} attempts")]
    Status { attempts: u32, status: StatusCode },

    #[error("failed to read response body: {0}")]
    Body(#[source] reqwest::Error),

    #[error(transparent)]
    Decompress(#[from] DecompressError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Validation(#[from] ContentValidationError),

    #[error("extraction task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("invalid header value in scraper config: {0}")]
    Header(#[from] InvalidHeaderValue),

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Cache key for an article URL: hex SHA-256, fixed length whatever the URL.
pub fn fingerprint(url: &str) -> String {
    hex::encode(Sha256::digest(url.as_bytes()))
}

/// Fetches article pages and turns them into validated content records.
///
/// Cheap to share behind an `Arc`. Concurrent scrapes of one URL are not
/// coalesced; the loser just overwrites an identical cache entry.
pub struct Scraper {
    client: Client,
    config: ScraperConfig,
    cache: Arc<TtlCache<ContentRecord>>,
    strategies: Arc<Strategies>,
}

impl Scraper {
    pub fn new(config: ScraperConfig, cache: Arc<TtlCache<ContentRecord>>) -> Result<Self, ScrapeError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_str(&config.accept_language)?);
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static(ACCEPT_CODINGS));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .connect_timeout(config.timeout())
            .build()
            .map_err(ScrapeError::Client)?;

        Ok(Self {
            client,
            config,
            cache,
            strategies: Arc::new(Strategies::compile()?),
        })
    }

    /// Returns the validated content of `article_url`, from cache when a
    /// live entry exists.
    pub async fn scrape(&self, article_url: &str) -> Result<ContentRecord, ScrapeError> {
        let key = fingerprint(article_url);
        if let Some(cached) = self.cache.get(&key) {
            counter!("scrape_cache_hits_total").increment(1);
            debug!(url = article_url, "content served from cache");
            return Ok(cached);
        }

        match self.scrape_uncached(article_url).await {
            Ok(record) => {
                self.cache.set(key, record.clone());
                Ok(record)
            }
            Err(e) => {
                counter!("scrape_failures_total").increment(1);
                Err(e)
            }
        }
    }

    async fn scrape_uncached(&self, article_url: &str) -> Result<ContentRecord, ScrapeError> {
        let url = Url::parse(article_url).map_err(|source| ScrapeError::InvalidUrl {
            url: article_url.to_string(),
            source,
        })?;

        let response = self.fetch_with_retry(&url).await?;
        let content_encoding = response
            .headers()
            .get(CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let raw = self.read_body(response, &url).await?;
        let raw_len = raw.len();

        let limit = self.config.max_body_bytes;
        let strategies = Arc::clone(&self.strategies);
        let page_url = url.clone();

        // Decoding and DOM work are CPU bound.
        let record = tokio::task::spawn_blocking(move || -> Result<ContentRecord, ScrapeError> {
            let decoded = decompress::decode(&raw, content_encoding.as_deref(), limit)?;
            if decoded.truncated {
                warn!(url = %page_url, max_bytes = limit, "page exceeded size cap and was truncated");
            }
            if decoded.sniffed {
                debug!(
                    url = %page_url,
                    encoding = %decoded.encoding,
                    header = content_encoding.as_deref().unwrap_or(""),
                    "compressed body detected from signature"
                );
            }
            let html = String::from_utf8_lossy(&decoded.body);
            let mut record = extract::extract(&html, &page_url, &strategies)?;
            validate_and_sanitize(&mut record)?;
            Ok(record)
        })
        .await??;

        info!(
            url = %url,
            wire_bytes = raw_len,
            text_bytes = record.full_text.len(),
            images = record.images.len(),
            tags = record.tags.len(),
            "article scraped"
        );
        Ok(record)
    }

    /// GET with a fresh timeout per attempt and linear backoff between
    /// attempts. Only a 200 counts as success.
    async fn fetch_with_retry(&self, url: &Url) -> Result<Response, ScrapeError> {
        let attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            counter!("scrape_attempts_total").increment(1);
            let result = self
                .client
                .get(url.clone())
                .timeout(self.config.timeout())
                .send()
                .await;

            let err = match result {
                Ok(response) if response.status() == StatusCode::OK => return Ok(response),
                Ok(response) => ScrapeError::Status {
                    attempts: attempt,
                    status: response.status(),
                },
                Err(source) => ScrapeError::Transport {
                    attempts: attempt,
                    source,
                },
            };

            if attempt >= attempts {
                warn!(url = %url, attempts, "giving up on article: {}", err);
                return Err(err);
            }

            let delay = self.config.backoff_step() * attempt;
            debug!(url = %url, attempt, max_attempts = attempts, ?delay, "attempt failed: {}", err);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn read_body(&self, mut response: Response, url: &Url) -> Result<Vec<u8>, ScrapeError> {
        let cap = self.config.max_body_bytes.saturating_mul(RAW_BODY_FACTOR);
        let mut raw = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(ScrapeError::Body)? {
            raw.extend_from_slice(&chunk);
            if raw.len() > cap {
                warn!(url = %url, max_bytes = cap, "response body exceeded wire cap, truncating");
                raw.truncate(cap);
                break;
            }
        }
        Ok(raw)
    }
}
