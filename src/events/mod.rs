//! Event schema for the two outbound streams.
//!
//! The change log carries one event per entity mutation; the upgrade history
//! carries one event per upgrade execution. They travel on separate topics,
//! each with its own codec.

pub mod codec;
pub mod emitter;
pub mod producer;

pub use codec::{CodecKind, EventCodec, InternalCodec, JsonCodec};
pub use emitter::{ChangeLogEmitter, HistoryEmitter, TopicEmitter};
pub use producer::{EventProducer, MemoryProducer, ProducedMessage, SledTopicLog};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::upgrade::UpgradeReport;

pub const METADATA_CHANGE_LOG_VERSIONED_TOPIC: &str = "MetadataChangeLog_Versioned_v1";
pub const UPGRADE_HISTORY_TOPIC: &str = "DataHubUpgradeHistory_v1";

/// Anything published through a [`TopicEmitter`].
pub trait TopicEvent: Serialize + serde::de::DeserializeOwned {
    /// Partition key; events sharing a key keep their relative order.
    fn key(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Upsert,
    /// Re-announcement of an unchanged aspect so consumers can rebuild.
    Restate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetadata {
    pub run_id: String,
    pub actor: String,
    pub last_observed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLogEvent {
    pub entity_urn: String,
    pub entity_type: String,
    pub aspect_name: String,
    pub change_type: ChangeType,
    pub aspect: Value,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub previous_aspect: Option<Value>,
    pub version: u64,
    pub system_metadata: SystemMetadata,
}

impl TopicEvent for ChangeLogEvent {
    fn key(&self) -> String {
        self.entity_urn.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradeHistoryEvent {
    pub ts: String,
    pub engine_version: String,
    pub report: UpgradeReport,
}

impl UpgradeHistoryEvent {
    pub fn new(report: UpgradeReport) -> Self {
        Self {
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            report,
        }
    }
}

impl TopicEvent for UpgradeHistoryEvent {
    fn key(&self) -> String {
        self.report.upgrade_name.clone()
    }
}
