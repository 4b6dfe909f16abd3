use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AppError, Result};
use crate::models::UserRecord;

pub const ENV_CONFIG_PATH: &str = "NEWS_RELAY_CONFIG";
pub const ENV_TZ: &str = "NEWS_RELAY_TZ";
pub const ENV_BROKERS: &str = "NEWS_RELAY_BROKERS";
pub const ENV_GROUP_ID: &str = "NEWS_RELAY_GROUP_ID";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub feed: FeedConfig,
    pub scraper: ScraperConfig,
    pub cache: CacheConfig,
    pub bus: BusConfig,
    pub sources: Vec<SourceConfig>,
    pub users: Vec<UserRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub timeout_secs: u64,
    /// IANA name used for items without a usable publish date.
    pub time_zone: String,
    pub poll_interval_secs: u64,
    pub max_item_age_hours: u64,
    pub concurrency: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 8,
            time_zone: "Europe/Moscow".to_string(),
            poll_interval_secs: 300,
            max_item_age_hours: 24,
            concurrency: 6,
        }
    }
}

impl FeedConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn max_item_age(&self) -> chrono::Duration {
        chrono::Duration::hours(self.max_item_age_hours as i64)
    }

    pub fn tz(&self) -> Result<Tz> {
        self.time_zone
            .parse::<Tz>()
            .map_err(|e| AppError::Config(format!("unknown time zone {:?}: {}", self.time_zone, e)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub timeout_secs: u64,
    pub max_attempts: u32,
    /// Delay before retry `n` is `n * backoff_step_ms`.
    pub backoff_step_ms: u64,
    pub max_body_bytes: usize,
    pub user_agent: String,
    pub accept_language: String,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 12,
            max_attempts: 3,
            backoff_step_ms: 1000,
            max_body_bytes: 2 * 1024 * 1024,
            user_agent: "Mozilla/5.0 (compatible; NewsRelay/1.0)".to_string(),
            accept_language: "ru-RU,ru;q=0.9,en-US;q=0.8,en;q=0.7".to_string(),
        }
    }
}

impl ScraperConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff_step(&self) -> Duration {
        Duration::from_millis(self.backoff_step_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub content_ttl_secs: u64,
    pub user_ttl_secs: u64,
    pub source_ttl_secs: u64,
    pub subscription_ttl_secs: u64,
    pub seen_link_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            content_ttl_secs: 30 * 60,
            user_ttl_secs: 5 * 60,
            source_ttl_secs: 10 * 60,
            subscription_ttl_secs: 5 * 60,
            seen_link_ttl_secs: 24 * 60 * 60,
            sweep_interval_secs: 5 * 60,
        }
    }
}

impl CacheConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusBackend {
    #[default]
    Memory,
    Kafka,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub backend: BusBackend,
    pub brokers: Vec<String>,
    pub items_topic: String,
    pub notifications_topic: String,
    pub group_id: String,
    /// Partition count for the in-memory log.
    pub partitions: usize,
    pub ack_timeout_secs: u64,
    pub rejoin_delay_secs: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            backend: BusBackend::Memory,
            brokers: vec!["localhost:9092".to_string()],
            items_topic: "news-items".to_string(),
            notifications_topic: "news-notifications".to_string(),
            group_id: "tg-bot-group".to_string(),
            partitions: 3,
            ack_timeout_secs: 10,
            rejoin_delay_secs: 5,
        }
    }
}

impl BusConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }

    pub fn rejoin_delay(&self) -> Duration {
        Duration::from_secs(self.rejoin_delay_secs)
    }

    pub fn topics(&self) -> [&str; 2] {
        [&self.items_topic, &self.notifications_topic]
    }
}

/// A feed source declared in the config file, with its subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: i64,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub subscribers: Vec<i64>,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Resolves and loads the configuration.
    ///
    /// Lookup order: `explicit` path, `$NEWS_RELAY_CONFIG`, the per-user config
    /// file, then built-in defaults. A `.env` file is read first so it can
    /// supply any of the variables involved.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut config = match Self::resolve_path(explicit)? {
            Some(path) => {
                info!(path = %path.display(), "loading configuration");
                Self::from_file(&path)?
            }
            None => {
                debug!("no configuration file found, using defaults");
                Self::default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("reading {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// `<config_dir>/news-relay/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("news-relay").join("config.toml"))
    }

    fn resolve_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            return Ok(Some(path.to_path_buf()));
        }
        if let Ok(path) = std::env::var(ENV_CONFIG_PATH) {
            let path = PathBuf::from(path);
            if !path.exists() {
                return Err(AppError::Config(format!(
                    "{} points to missing file {}",
                    ENV_CONFIG_PATH,
                    path.display()
                )));
            }
            return Ok(Some(path));
        }
        Ok(Self::default_path().filter(|p| p.exists()))
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(tz) = std::env::var(ENV_TZ) {
            if !tz.trim().is_empty() {
                self.feed.time_zone = tz.trim().to_string();
            }
        }
        if let Ok(brokers) = std::env::var(ENV_BROKERS) {
            let brokers: Vec<String> = brokers
                .split(',')
                .map(str::trim)
                .filter(|b| !b.is_empty())
                .map(str::to_string)
                .collect();
            if !brokers.is_empty() {
                self.bus.brokers = brokers;
            }
        }
        if let Ok(group) = std::env::var(ENV_GROUP_ID) {
            if !group.trim().is_empty() {
                self.bus.group_id = group.trim().to_string();
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.feed.tz()?;

        if self.scraper.max_attempts == 0 {
            return Err(AppError::Config("scraper.max_attempts must be at least 1".into()));
        }
        if self.feed.poll_interval_secs == 0 {
            return Err(AppError::Config("feed.poll_interval_secs must be at least 1".into()));
        }
        if self.cache.sweep_interval_secs == 0 {
            return Err(AppError::Config("cache.sweep_interval_secs must be at least 1".into()));
        }
        if self.feed.concurrency == 0 {
            return Err(AppError::Config("feed.concurrency must be at least 1".into()));
        }
        if self.bus.items_topic.is_empty() || self.bus.notifications_topic.is_empty() {
            return Err(AppError::Config("bus topics must not be empty".into()));
        }
        if self.bus.items_topic == self.bus.notifications_topic {
            return Err(AppError::Config(
                "bus.items_topic and bus.notifications_topic must differ".into(),
            ));
        }
        if self.bus.partitions == 0 {
            return Err(AppError::Config("bus.partitions must be at least 1".into()));
        }
        if self.bus.backend == BusBackend::Kafka && self.bus.brokers.is_empty() {
            return Err(AppError::Config("kafka backend needs at least one broker".into()));
        }
        Ok(())
    }
}
