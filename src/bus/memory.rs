use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info};

use super::{AppendAck, BusError, ConsumerGroup, Delivery, GroupSession, MessageLog};

/// In-process partitioned log with consumer groups.
///
/// Topics are created on first append. Each group tracks committed offsets
/// and a shared delivery cursor; joining resets the cursor to the committed
/// offsets, so anything delivered but not committed is delivered again.
#[derive(Clone)]
pub struct MemoryLog {
    inner: Arc<Inner>,
}

struct Inner {
    partitions: usize,
    state: Mutex<State>,
    /// Bumped on every change that could unblock a reader.
    version: watch::Sender<u64>,
}

#[derive(Default)]
struct State {
    closed: bool,
    topics: HashMap<String, Vec<Vec<Stored>>>,
    groups: HashMap<String, GroupState>,
}

struct Stored {
    key: String,
    payload: Vec<u8>,
}

#[derive(Default)]
struct GroupState {
    committed: HashMap<(String, usize), i64>,
    delivered: HashMap<(String, usize), i64>,
}

impl MemoryLog {
    pub fn new(partitions: usize) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                partitions: partitions.max(1),
                state: Mutex::new(State::default()),
                version,
            }),
        }
    }

    pub fn group(&self, group_id: impl Into<String>) -> MemoryGroup {
        MemoryGroup {
            inner: Arc::clone(&self.inner),
            group_id: group_id.into(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Rejects further appends and ends every consumer session.
    pub fn close(&self) {
        self.inner.state.lock().closed = true;
        self.inner.notify();
        info!("memory log closed");
    }

    /// All messages on `topic`, by partition then offset.
    pub fn messages(&self, topic: &str) -> Vec<Delivery> {
        let state = self.inner.state.lock();
        let Some(partitions) = state.topics.get(topic) else {
            return Vec::new();
        };
        partitions
            .iter()
            .enumerate()
            .flat_map(|(partition, records)| {
                records.iter().enumerate().map(move |(offset, stored)| Delivery {
                    topic: topic.to_string(),
                    partition: partition as i32,
                    offset: offset as i64,
                    key: Some(stored.key.clone()),
                    payload: stored.payload.clone(),
                })
            })
            .collect()
    }

    pub fn partition_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.inner.partitions as u64) as usize
    }
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new(1)
    }
}

impl Inner {
    fn notify(&self) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }
}

#[async_trait]
impl MessageLog for MemoryLog {
    async fn append(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<AppendAck, BusError> {
        let partition = self.partition_for(key);
        let offset = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(BusError::Closed);
            }
            let partitions = state
                .topics
                .entry(topic.to_string())
                .or_insert_with(|| (0..self.inner.partitions).map(|_| Vec::new()).collect());
            let records = &mut partitions[partition];
            records.push(Stored {
                key: key.to_string(),
                payload,
            });
            records.len() as i64 - 1
        };
        self.inner.notify();
        Ok(AppendAck {
            partition: partition as i32,
            offset,
        })
    }
}

/// A member of one consumer group on a [`MemoryLog`].
///
/// Members created with the same group id share committed offsets. Closing
/// a member (and its clones) ends only its own sessions.
#[derive(Clone)]
pub struct MemoryGroup {
    inner: Arc<Inner>,
    group_id: String,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl ConsumerGroup for MemoryGroup {
    async fn join(&self, topics: &[String]) -> Result<Box<dyn GroupSession>, BusError> {
        {
            let mut state = self.inner.state.lock();
            if state.closed || self.closed.load(Ordering::SeqCst) {
                return Err(BusError::Closed);
            }
            let group = state.groups.entry(self.group_id.clone()).or_default();
            group.delivered = group.committed.clone();
        }
        debug!(group = %self.group_id, ?topics, "joined consumer group");
        Ok(Box::new(MemorySession {
            inner: Arc::clone(&self.inner),
            group_id: self.group_id.clone(),
            closed: Arc::clone(&self.closed),
            topics: topics.to_vec(),
            version: self.inner.version.subscribe(),
        }))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.inner.notify();
        info!(group = %self.group_id, "consumer group closed");
    }
}

struct MemorySession {
    inner: Arc<Inner>,
    group_id: String,
    closed: Arc<AtomicBool>,
    topics: Vec<String>,
    version: watch::Receiver<u64>,
}

impl MemorySession {
    fn try_next(&self) -> Result<Option<Delivery>, BusError> {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        if state.closed || self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        let group = state.groups.entry(self.group_id.clone()).or_default();

        for topic in &self.topics {
            let Some(partitions) = state.topics.get(topic) else {
                continue;
            };
            for (partition, records) in partitions.iter().enumerate() {
                let cursor = group
                    .delivered
                    .entry((topic.clone(), partition))
                    .or_insert(0);
                if let Some(stored) = records.get(*cursor as usize) {
                    let delivery = Delivery {
                        topic: topic.clone(),
                        partition: partition as i32,
                        offset: *cursor,
                        key: Some(stored.key.clone()),
                        payload: stored.payload.clone(),
                    };
                    *cursor += 1;
                    return Ok(Some(delivery));
                }
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl GroupSession for MemorySession {
    async fn next(&mut self) -> Result<Delivery, BusError> {
        loop {
            // Mark the current version seen before scanning so an append
            // racing with the scan still wakes us.
            self.version.borrow_and_update();
            if let Some(delivery) = self.try_next()? {
                return Ok(delivery);
            }
            if self.version.changed().await.is_err() {
                return Err(BusError::Closed);
            }
        }
    }

    async fn commit(&mut self, delivery: &Delivery) -> Result<(), BusError> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(BusError::Closed);
        }
        let group = state.groups.entry(self.group_id.clone()).or_default();
        let committed = group
            .committed
            .entry((delivery.topic.clone(), delivery.partition as usize))
            .or_insert(0);
        *committed = (*committed).max(delivery.offset + 1);
        Ok(())
    }
}
