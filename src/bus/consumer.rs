use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::messages::{BusMessage, Topics};
use super::{BusError, ConsumerGroup, GroupSession};

/// Application callback for consumed messages.
///
/// Delivery is at least once, so implementations must tolerate duplicates;
/// [`BusMessage::dedup_key`] gives the natural key to deduplicate on.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: BusMessage) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(BusMessage) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, message: BusMessage) -> anyhow::Result<()> {
        (self)(message).await
    }
}

/// Runs a consumer group over the items and notifications topics.
pub struct Subscriber {
    group: Arc<dyn ConsumerGroup>,
    topics: Topics,
    rejoin_delay: Duration,
}

impl Subscriber {
    pub fn new(group: Arc<dyn ConsumerGroup>, topics: Topics, rejoin_delay: Duration) -> Self {
        Self {
            group,
            topics,
            rejoin_delay,
        }
    }

    /// Spawns the consume loop and returns at once.
    ///
    /// Every message is committed after the handler returns, whatever it
    /// returned; handler errors are only logged. Undecodable messages are
    /// committed and skipped. Broker errors make the loop sleep and rejoin;
    /// it ends only when the group is closed.
    pub fn start_consuming<H>(&self, handler: H) -> ConsumerHandle
    where
        H: MessageHandler + 'static,
    {
        let group = Arc::clone(&self.group);
        let topics = self.topics.clone();
        let rejoin_delay = self.rejoin_delay;
        let join = tokio::spawn(supervise(Arc::clone(&group), topics, rejoin_delay, handler));
        ConsumerHandle { group, join }
    }
}

async fn supervise<H: MessageHandler>(
    group: Arc<dyn ConsumerGroup>,
    topics: Topics,
    rejoin_delay: Duration,
    handler: H,
) {
    let names = topics.all();
    loop {
        let outcome = match group.join(&names).await {
            Ok(mut session) => {
                info!(topics = ?names, "consumer session started");
                consume(session.as_mut(), &topics, &handler).await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Err(BusError::Closed) => break,
            Err(e) => {
                error!(?rejoin_delay, "consumer error, rejoining: {}", e);
                tokio::time::sleep(rejoin_delay).await;
            }
            Ok(()) => {}
        }
    }
    info!("consumer stopped");
}

/// Consumes until the session fails. Never returns `Ok` on its own.
async fn consume<H: MessageHandler>(
    session: &mut dyn GroupSession,
    topics: &Topics,
    handler: &H,
) -> Result<(), BusError> {
    loop {
        let delivery = session.next().await?;
        counter!("bus_consumed_total", "topic" => delivery.topic.clone()).increment(1);

        match BusMessage::decode(topics, &delivery.topic, &delivery.payload) {
            Ok(message) => {
                if let Err(e) = handler.handle(message).await {
                    warn!(
                        topic = %delivery.topic,
                        partition = delivery.partition,
                        offset = delivery.offset,
                        "handler failed: {:#}", e
                    );
                }
            }
            Err(e) => {
                counter!("bus_decode_errors_total", "topic" => delivery.topic.clone()).increment(1);
                warn!(
                    partition = delivery.partition,
                    offset = delivery.offset,
                    bytes = delivery.payload.len(),
                    "skipping undecodable message: {}", e
                );
            }
        }

        session.commit(&delivery).await?;
        debug!(topic = %delivery.topic, partition = delivery.partition, offset = delivery.offset, "committed");
    }
}

/// Handle to a running consume loop.
pub struct ConsumerHandle {
    group: Arc<dyn ConsumerGroup>,
    join: JoinHandle<()>,
}

impl ConsumerHandle {
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Closes the group and waits for the loop to exit.
    pub async fn shutdown(self) {
        self.group.close().await;
        if let Err(e) = self.join.await {
            error!("consumer task panicked: {}", e);
        }
    }
}
