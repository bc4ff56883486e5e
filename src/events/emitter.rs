//! Topic-bound emitters.

use std::marker::PhantomData;
use std::sync::Arc;

use tracing::debug;

use crate::error::PublishError;
use crate::events::codec::EventCodec;
use crate::events::producer::{EventProducer, ProducedMessage};
use crate::events::{ChangeLogEvent, TopicEvent, UpgradeHistoryEvent};

/// Publishes one event type to one fixed topic with one codec.
pub struct TopicEmitter<E> {
    topic: String,
    codec: Arc<dyn EventCodec>,
    producer: Arc<dyn EventProducer>,
    _event: PhantomData<fn(E)>,
}

/// Entity mutation events.
pub type ChangeLogEmitter = TopicEmitter<ChangeLogEvent>;
/// Upgrade outcome events.
pub type HistoryEmitter = TopicEmitter<UpgradeHistoryEvent>;

impl<E> Clone for TopicEmitter<E> {
    fn clone(&self) -> Self {
        Self {
            topic: self.topic.clone(),
            codec: Arc::clone(&self.codec),
            producer: Arc::clone(&self.producer),
            _event: PhantomData,
        }
    }
}

impl<E: TopicEvent> TopicEmitter<E> {
    pub fn new(
        topic: impl Into<String>,
        codec: Arc<dyn EventCodec>,
        producer: Arc<dyn EventProducer>,
    ) -> Self {
        Self {
            topic: topic.into(),
            codec,
            producer,
            _event: PhantomData,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn codec(&self) -> &dyn EventCodec {
        self.codec.as_ref()
    }

    pub fn producer(&self) -> &Arc<dyn EventProducer> {
        &self.producer
    }

    pub fn emit(&self, event: &E) -> Result<(), PublishError> {
        let value =
            serde_json::to_value(event).map_err(|e| PublishError::Serialization(e.to_string()))?;
        let payload = self.codec.encode(&value)?;
        let key = event.key();
        debug!(topic = %self.topic, key = %key, bytes = payload.len(), "Publishing event");
        self.producer.send(&self.topic, &key, payload)
    }

    /// Decode a message previously produced by an emitter with the same codec.
    pub fn decode(&self, message: &ProducedMessage) -> Result<E, PublishError> {
        let value = self.codec.decode(&message.payload)?;
        serde_json::from_value(value).map_err(|e| PublishError::Deserialization(e.to_string()))
    }
}
