use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use news_relay::bus::{
    BusMessage, ConsumerGroup, MessageHandler, MessageLog, MemoryLog, Publisher, Subscriber, Topics,
};
use news_relay::cache::{CacheRegistry, TtlCache};
use news_relay::config::{BusBackend, BusConfig, Config};
use news_relay::directory::{CachedDirectory, Directory, StaticDirectory};
use news_relay::feed::FeedFetcher;
use news_relay::pipeline::{CycleSettings, LogSink, Pipeline};
use news_relay::scraper::Scraper;
use news_relay::{telemetry, Result};

#[derive(Parser)]
#[command(name = "news-relay", version, about)]
struct Cli {
    /// Config file; overrides $NEWS_RELAY_CONFIG and the per-user default.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log as JSON lines.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Poll feeds on an interval and consume the bus until Ctrl-C (default).
    Run,
    /// Run a single poll cycle, print its report and exit.
    Once,
    /// Scrape one article and print the validated record as JSON.
    Scrape { url: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json);
    telemetry::describe_metrics();

    let config = Config::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Once => once(config).await,
        Command::Scrape { url } => scrape(config, &url).await,
    }
}

fn init_logging(json: bool) {
    // html5ever is noisy about malformed markup, which is most of the web
    let mut env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if let Ok(directive) = "html5ever=error".parse() {
        env_filter = env_filter.add_directive(directive);
    }

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(config: Config) -> Result<()> {
    let caches = CacheRegistry::new(&config.cache);
    let mut sweepers = caches.spawn_sweepers(config.cache.sweep_interval());

    let directory: Arc<dyn Directory> = Arc::new(CachedDirectory::new(
        StaticDirectory::from_config(&config),
        caches.clone(),
    ));
    let (log, group) = connect_bus(&config.bus)?;
    let topics = Topics::new(&config.bus.items_topic, &config.bus.notifications_topic);

    let handler = RelayHandler::new(
        Arc::clone(&directory),
        Duration::from_secs(config.cache.seen_link_ttl_secs),
    );
    sweepers.push(handler.delivered.spawn_sweeper(config.cache.sweep_interval()));
    let consumer = Subscriber::new(group, topics.clone(), config.bus.rejoin_delay())
        .start_consuming(handler);

    let publisher = Publisher::new(log, topics, config.bus.ack_timeout());
    let pipeline = Arc::new(build_pipeline(&config, &caches, publisher, directory)?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = {
        let pipeline = Arc::clone(&pipeline);
        let interval = config.feed.poll_interval();
        tokio::spawn(async move { pipeline.run_forever(interval, shutdown_rx).await })
    };

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    let _ = shutdown_tx.send(true);
    if let Err(e) = poller.await {
        error!("poller task panicked: {}", e);
    }
    consumer.shutdown().await;
    for sweeper in sweepers {
        sweeper.stop().await;
    }
    info!("shutdown complete");
    Ok(())
}

async fn once(config: Config) -> Result<()> {
    let caches = CacheRegistry::new(&config.cache);
    let directory: Arc<dyn Directory> = Arc::new(StaticDirectory::from_config(&config));
    let (log, _group) = connect_bus(&config.bus)?;
    let topics = Topics::new(&config.bus.items_topic, &config.bus.notifications_topic);
    let publisher = Publisher::new(log, topics, config.bus.ack_timeout());

    let pipeline = build_pipeline(&config, &caches, publisher, directory)?;
    let report = pipeline.run_cycle().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn scrape(config: Config, url: &str) -> Result<()> {
    let caches = CacheRegistry::new(&config.cache);
    let scraper = Scraper::new(config.scraper.clone(), caches.content)?;
    let record = scraper.scrape(url).await?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

fn build_pipeline(
    config: &Config,
    caches: &CacheRegistry,
    publisher: Publisher,
    directory: Arc<dyn Directory>,
) -> Result<Pipeline> {
    let fetcher = FeedFetcher::new(config.feed.timeout())?;
    let scraper = Scraper::new(config.scraper.clone(), Arc::clone(&caches.content))?;
    Ok(Pipeline::new(
        fetcher,
        Arc::new(scraper),
        publisher,
        directory,
        Arc::new(LogSink),
        Arc::clone(&caches.seen_links),
        CycleSettings::from_config(&config.feed)?,
    ))
}

fn connect_bus(config: &BusConfig) -> Result<(Arc<dyn MessageLog>, Arc<dyn ConsumerGroup>)> {
    match config.backend {
        BusBackend::Memory => {
            let log = MemoryLog::new(config.partitions);
            let group = log.group(config.group_id.as_str());
            info!(partitions = config.partitions, "using in-memory message log");
            Ok((Arc::new(log), Arc::new(group)))
        }
        BusBackend::Kafka => connect_kafka(config),
    }
}

#[cfg(feature = "kafka")]
fn connect_kafka(config: &BusConfig) -> Result<(Arc<dyn MessageLog>, Arc<dyn ConsumerGroup>)> {
    use news_relay::bus::kafka::{KafkaGroup, KafkaLog};

    let log = KafkaLog::connect(&config.brokers, config.ack_timeout())?;
    let group = KafkaGroup::new(&config.brokers, config.group_id.as_str());
    Ok((Arc::new(log), Arc::new(group)))
}

#[cfg(not(feature = "kafka"))]
fn connect_kafka(_config: &BusConfig) -> Result<(Arc<dyn MessageLog>, Arc<dyn ConsumerGroup>)> {
    Err(news_relay::AppError::Config(
        "bus.backend = \"kafka\" needs a build with the `kafka` feature".into(),
    ))
}

/// Reference consumer: drops redelivered messages by their natural key and
/// skips notifications addressed to deactivated users.
struct RelayHandler {
    directory: Arc<dyn Directory>,
    delivered: Arc<TtlCache<()>>,
}

impl RelayHandler {
    fn new(directory: Arc<dyn Directory>, remember_for: Duration) -> Self {
        Self {
            directory,
            delivered: Arc::new(TtlCache::new("delivered", remember_for)),
        }
    }
}

#[async_trait]
impl MessageHandler for RelayHandler {
    async fn handle(&self, message: BusMessage) -> anyhow::Result<()> {
        let key = message.dedup_key();
        if self.delivered.get(&key).is_some() {
            debug!(key = %key, "duplicate delivery ignored");
            return Ok(());
        }

        match &message {
            BusMessage::Item(item) => {
                info!(link = %item.link, source = %item.source_name, "news item received");
            }
            BusMessage::Notification(n) => {
                let user = self.directory.user(n.chat_id).await?;
                if user.is_some_and(|u| !u.active) {
                    info!(chat_id = n.chat_id, "user inactive, notification dropped");
                } else {
                    info!(chat_id = n.chat_id, link = %n.link, "notification ready for delivery");
                }
            }
        }

        self.delivered.set(key, ());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use news_relay::bus::{NewsItem, NewsNotification};
    use news_relay::models::UserRecord;

    struct Users(Vec<UserRecord>);

    #[async_trait]
    impl Directory for Users {
        async fn active_sources(&self) -> Result<Vec<news_relay::models::Source>> {
            Ok(Vec::new())
        }

        async fn subscribers(&self, _: i64) -> Result<Vec<i64>> {
            Ok(Vec::new())
        }

        async fn user(&self, chat_id: i64) -> Result<Option<UserRecord>> {
            Ok(self.0.iter().find(|u| u.chat_id == chat_id).cloned())
        }
    }

    fn item() -> NewsItem {
        NewsItem {
            source_id: 1,
            source_name: "S".into(),
            title: "T".into(),
            description: "D".into(),
            link: "https://example.com/a".into(),
            published_at: "2024-03-05 10:15:00".into(),
        }
    }

    #[tokio::test]
    async fn redelivery_is_remembered() {
        let handler = RelayHandler::new(Arc::new(Users(Vec::new())), Duration::from_secs(60));
        let message = BusMessage::Item(item());
        handler.handle(message.clone()).await.unwrap();
        assert!(handler.delivered.get(&message.dedup_key()).is_some());
        handler.handle(message).await.unwrap();
        assert_eq!(handler.delivered.size(), 1);
    }

    #[tokio::test]
    async fn notifications_are_keyed_per_chat() {
        let users = vec![UserRecord {
            chat_id: 2,
            username: None,
            active: false,
        }];
        let handler = RelayHandler::new(Arc::new(Users(users)), Duration::from_secs(60));
        for chat_id in [1, 2] {
            let note = NewsNotification::for_chat(chat_id, 0, &item());
            handler.handle(BusMessage::Notification(note)).await.unwrap();
        }
        assert_eq!(handler.delivered.size(), 2);
    }
}
