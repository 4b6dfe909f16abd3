//! Publish/subscribe over a partitioned message log.
//!
//! The log itself sits behind [`MessageLog`] and [`ConsumerGroup`] so the
//! pipeline runs unchanged against the in-process [`MemoryLog`] or, with the
//! `kafka` feature, a Kafka-compatible broker.

mod consumer;
mod memory;
mod messages;
mod publisher;

#[cfg(feature = "kafka")]
pub mod kafka;

pub use consumer::{ConsumerHandle, MessageHandler, Subscriber};
pub use memory::{MemoryGroup, MemoryLog};
pub use messages::{BusMessage, DecodeError, NewsItem, NewsNotification, Topics, PUBLISHED_AT_FORMAT};
pub use publisher::{FanOutReport, PublishError, Publisher};

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The log or group was shut down. Terminal for consumers.
    #[error("message bus is closed")]
    Closed,

    #[error("broker did not acknowledge within {0:?}")]
    Timeout(Duration),

    #[error("broker error: {0}")]
    Broker(String),
}

/// Where an appended message landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendAck {
    pub partition: i32,
    pub offset: i64,
}

/// A message handed to a consumer, owned so it can outlive the poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait MessageLog: Send + Sync {
    /// Appends one message and waits for the broker to acknowledge it.
    /// Messages with the same key land on the same partition, in order.
    async fn append(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<AppendAck, BusError>;
}

#[async_trait]
pub trait ConsumerGroup: Send + Sync {
    /// Joins the group for `topics`. Uncommitted messages are delivered
    /// again to the new session.
    async fn join(&self, topics: &[String]) -> Result<Box<dyn GroupSession>, BusError>;

    /// Closes the group. Pending and future `next` calls return
    /// [`BusError::Closed`].
    async fn close(&self);
}

#[async_trait]
pub trait GroupSession: Send {
    async fn next(&mut self) -> Result<Delivery, BusError>;

    async fn commit(&mut self, delivery: &Delivery) -> Result<(), BusError>;
}
