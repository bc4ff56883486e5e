//! Pluggable event serialization.
//!
//! Business logic only ever sees [`EventCodec`]; which implementation backs a
//! topic is a configuration choice.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::error::PublishError;

/// Serializer/deserializer pair for one topic.
pub trait EventCodec: Send + Sync {
    fn name(&self) -> &'static str;
    fn encode(&self, value: &Value) -> Result<Vec<u8>, PublishError>;
    fn decode(&self, bytes: &[u8]) -> Result<Value, PublishError>;
}

/// Plain JSON bodies.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl EventCodec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, PublishError> {
        serde_json::to_vec(value).map_err(|e| PublishError::Serialization(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, PublishError> {
        serde_json::from_slice(bytes).map_err(|e| PublishError::Deserialization(e.to_string()))
    }
}

/// Registry-free codec for test and single-node deployments.
///
/// Keeps the schema-registry wire framing (magic byte, 4-byte big-endian schema
/// id) around a JSON body, so consumers that strip the header keep working, but
/// never talks to a registry.
#[derive(Debug, Clone, Copy)]
pub struct InternalCodec {
    schema_id: u32,
}

const MAGIC_BYTE: u8 = 0;
const HEADER_LEN: usize = 5;

impl InternalCodec {
    pub fn new(schema_id: u32) -> Self {
        Self { schema_id }
    }

    pub fn schema_id(&self) -> u32 {
        self.schema_id
    }
}

impl Default for InternalCodec {
    fn default() -> Self {
        Self::new(0)
    }
}

impl EventCodec for InternalCodec {
    fn name(&self) -> &'static str {
        "internal"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, PublishError> {
        let body = serde_json::to_vec(value).map_err(|e| PublishError::Serialization(e.to_string()))?;
        let mut framed = Vec::with_capacity(HEADER_LEN + body.len());
        framed.push(MAGIC_BYTE);
        framed.extend_from_slice(&self.schema_id.to_be_bytes());
        framed.extend_from_slice(&body);
        Ok(framed)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, PublishError> {
        if bytes.len() < HEADER_LEN || bytes[0] != MAGIC_BYTE {
            return Err(PublishError::Deserialization(
                "missing internal codec header".to_string(),
            ));
        }
        let mut id = [0u8; 4];
        id.copy_from_slice(&bytes[1..HEADER_LEN]);
        let schema_id = u32::from_be_bytes(id);
        if schema_id != self.schema_id {
            return Err(PublishError::Deserialization(format!(
                "schema id {} does not match expected {}",
                schema_id, self.schema_id
            )));
        }
        serde_json::from_slice(&bytes[HEADER_LEN..])
            .map_err(|e| PublishError::Deserialization(e.to_string()))
    }
}

/// Codec selection as it appears in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    #[default]
    Json,
    Internal,
}

impl CodecKind {
    pub fn build(self) -> Arc<dyn EventCodec> {
        match self {
            CodecKind::Json => Arc::new(JsonCodec),
            CodecKind::Internal => Arc::new(InternalCodec::default()),
        }
    }
}
