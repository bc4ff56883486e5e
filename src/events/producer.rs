//! Event producers: where encoded events end up.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};

use crate::error::PublishError;
use crate::types::now_millis;

const TOPIC_TREE_PREFIX: &str = "topic:";
const OFFSET_KEY_PAD: usize = 20;

/// Transport port shared by both emitters.
pub trait EventProducer: Send + Sync {
    fn send(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), PublishError>;

    fn flush(&self) -> Result<(), PublishError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducedMessage {
    pub topic: String,
    pub offset: u64,
    pub key: String,
    pub payload: Vec<u8>,
    pub ts_ms: u64,
}

/// Keeps every message in memory in send order.
#[derive(Default)]
pub struct MemoryProducer {
    messages: Mutex<Vec<ProducedMessage>>,
    failing_topics: Mutex<HashSet<String>>,
}

impl MemoryProducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn messages(&self, topic: &str) -> Vec<ProducedMessage> {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    pub fn count(&self, topic: &str) -> usize {
        self.messages.lock().iter().filter(|m| m.topic == topic).count()
    }

    /// Sends to `topic` fail until [`MemoryProducer::recover_topic`] is called.
    pub fn fail_topic(&self, topic: &str) {
        self.failing_topics.lock().insert(topic.to_string());
    }

    pub fn recover_topic(&self, topic: &str) {
        self.failing_topics.lock().remove(topic);
    }
}

impl EventProducer for MemoryProducer {
    fn send(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        if self.failing_topics.lock().contains(topic) {
            return Err(PublishError::Failed {
                topic: topic.to_string(),
                reason: "injected broker failure".to_string(),
            });
        }
        let mut messages = self.messages.lock();
        let offset = messages.iter().filter(|m| m.topic == topic).count() as u64;
        messages.push(ProducedMessage {
            topic: topic.to_string(),
            offset,
            key: key.to_string(),
            payload,
            ts_ms: now_millis(),
        });
        Ok(())
    }
}

/// Durable, ordered per-topic log in sled.
///
/// Each topic lives in its own tree; offsets come from `Db::generate_id`, so they
/// are strictly increasing across topics and restarts.
#[derive(Clone)]
pub struct SledTopicLog {
    db: Db,
}

impl SledTopicLog {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn shared(db: Db) -> Arc<Self> {
        Arc::new(Self::new(db))
    }

    fn topic_tree(&self, topic: &str) -> Result<Tree, PublishError> {
        self.db
            .open_tree(format!("{TOPIC_TREE_PREFIX}{topic}"))
            .map_err(|e| to_publish_failed(topic, e))
    }

    /// Messages of `topic` with offset greater than `after`, oldest first.
    pub fn read_after(&self, topic: &str, after: Option<u64>) -> Result<Vec<ProducedMessage>, PublishError> {
        let tree = self.topic_tree(topic)?;
        let iter = match after {
            Some(offset) => tree.range(encode_offset_key(offset + 1)..),
            None => tree.iter(),
        };
        let mut out = Vec::new();
        for item in iter {
            let (_, value) = item.map_err(|e| to_publish_failed(topic, e))?;
            let message: ProducedMessage = serde_json::from_slice(&value)
                .map_err(|e| PublishError::Deserialization(e.to_string()))?;
            out.push(message);
        }
        Ok(out)
    }

    pub fn read_all(&self, topic: &str) -> Result<Vec<ProducedMessage>, PublishError> {
        self.read_after(topic, None)
    }
}

impl EventProducer for SledTopicLog {
    fn send(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        let tree = self.topic_tree(topic)?;
        let offset = self.db.generate_id().map_err(|e| to_publish_failed(topic, e))?;
        let message = ProducedMessage {
            topic: topic.to_string(),
            offset,
            key: key.to_string(),
            payload,
            ts_ms: now_millis(),
        };
        let value =
            serde_json::to_vec(&message).map_err(|e| PublishError::Serialization(e.to_string()))?;
        tree.insert(encode_offset_key(offset).as_bytes(), value)
            .map_err(|e| to_publish_failed(topic, e))?;
        Ok(())
    }

    fn flush(&self) -> Result<(), PublishError> {
        self.db
            .flush()
            .map_err(|e| to_publish_failed("*", e))?;
        Ok(())
    }
}

fn encode_offset_key(offset: u64) -> String {
    format!("{:0width$}", offset, width = OFFSET_KEY_PAD)
}

fn to_publish_failed(topic: &str, err: sled::Error) -> PublishError {
    PublishError::Failed {
        topic: topic.to_string(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_producer_assigns_offsets_per_topic() {
        let producer = MemoryProducer::new();
        producer.send("a", "k1", vec![1]).unwrap();
        producer.send("b", "k1", vec![2]).unwrap();
        producer.send("a", "k2", vec![3]).unwrap();
        let a = producer.messages("a");
        assert_eq!(a.len(), 2);
        assert_eq!(a[1].offset, 1);
        assert_eq!(a[1].payload, vec![3]);
        assert_eq!(producer.count("b"), 1);
    }

    #[test]
    fn memory_producer_failure_injection() {
        let producer = MemoryProducer::new();
        producer.fail_topic("a");
        assert!(producer.send("a", "k", vec![]).is_err());
        producer.recover_topic("a");
        assert!(producer.send("a", "k", vec![]).is_ok());
    }

    #[test]
    fn sled_topic_log_orders_and_separates_topics() {
        let dir = tempfile::TempDir::new().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let log = SledTopicLog::new(db);
        for i in 0..12u8 {
            log.send("history", "upgrade", vec![i]).unwrap();
        }
        log.send("changes", "urn", vec![99]).unwrap();

        let history = log.read_all("history").unwrap();
        assert_eq!(history.len(), 12);
        assert!(history.windows(2).all(|w| w[0].offset < w[1].offset));
        assert_eq!(history.last().unwrap().payload, vec![11]);

        let tail = log.read_after("history", Some(history[9].offset)).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(log.read_all("changes").unwrap().len(), 1);
    }
}
