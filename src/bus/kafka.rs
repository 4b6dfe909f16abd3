//! Kafka-compatible broker backend (Kafka, Redpanda) built on librdkafka.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use tokio::sync::Notify;
use tracing::info;

use super::{AppendAck, BusError, ConsumerGroup, Delivery, GroupSession, MessageLog};

fn broker_error(e: KafkaError) -> BusError {
    BusError::Broker(e.to_string())
}

/// Producer waiting for acknowledgement from all in-sync replicas.
pub struct KafkaLog {
    producer: FutureProducer,
    delivery_timeout: Duration,
}

impl KafkaLog {
    pub fn connect(brokers: &[String], delivery_timeout: Duration) -> Result<Self, BusError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers.join(","))
            .set("acks", "all")
            .set("message.send.max.retries", "5")
            .set("message.timeout.ms", delivery_timeout.as_millis().to_string())
            .create()
            .map_err(broker_error)?;
        info!(brokers = %brokers.join(","), "kafka producer created");
        Ok(Self {
            producer,
            delivery_timeout,
        })
    }
}

#[async_trait]
impl MessageLog for KafkaLog {
    async fn append(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<AppendAck, BusError> {
        let record = FutureRecord::to(topic).key(key).payload(&payload);
        match self
            .producer
            .send(record, Timeout::After(self.delivery_timeout))
            .await
        {
            Ok((partition, offset)) => Ok(AppendAck { partition, offset }),
            Err((e, _message)) => Err(broker_error(e)),
        }
    }
}

/// Consumer group with manual commits.
pub struct KafkaGroup {
    brokers: String,
    group_id: String,
    closed: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl KafkaGroup {
    pub fn new(brokers: &[String], group_id: impl Into<String>) -> Self {
        Self {
            brokers: brokers.join(","),
            group_id: group_id.into(),
            closed: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl ConsumerGroup for KafkaGroup {
    async fn join(&self, topics: &[String]) -> Result<Box<dyn GroupSession>, BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "latest")
            .create()
            .map_err(broker_error)?;
        let names: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer.subscribe(&names).map_err(broker_error)?;
        info!(group = %self.group_id, ?topics, "joined kafka consumer group");

        Ok(Box::new(KafkaSession {
            consumer,
            closed: Arc::clone(&self.closed),
            notify: Arc::clone(&self.notify),
        }))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

struct KafkaSession {
    consumer: StreamConsumer,
    closed: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

#[async_trait]
impl GroupSession for KafkaSession {
    async fn next(&mut self) -> Result<Delivery, BusError> {
        let notified = self.notify.notified();
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        tokio::select! {
            _ = notified => Err(BusError::Closed),
            received = self.consumer.recv() => {
                let message = received.map_err(broker_error)?;
                Ok(Delivery {
                    topic: message.topic().to_string(),
                    partition: message.partition(),
                    offset: message.offset(),
                    key: message
                        .key()
                        .map(|k| String::from_utf8_lossy(k).into_owned()),
                    payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                })
            }
        }
    }

    async fn commit(&mut self, delivery: &Delivery) -> Result<(), BusError> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                &delivery.topic,
                delivery.partition,
                Offset::Offset(delivery.offset + 1),
            )
            .map_err(broker_error)?;
        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(broker_error)
    }
}
