//! Entity write path: store first, then the change log.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::error::{StoreError, UpgradeError};
use crate::events::{ChangeLogEmitter, ChangeLogEvent, ChangeType, SystemMetadata};
use crate::store::{AspectRecord, AspectStore};
use crate::types::{entity_type_of, now_millis};
use crate::upgrade::OperationContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Leave the store and the change log untouched when the stored payload
    /// already equals the new one.
    IfChanged,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Written { version: u64 },
    Unchanged,
}

impl IngestOutcome {
    pub fn written(&self) -> bool {
        matches!(self, IngestOutcome::Written { .. })
    }
}

/// Every engine mutation goes through here so that each write is followed by
/// exactly one change-log event.
#[derive(Clone)]
pub struct EntityService {
    store: Arc<dyn AspectStore>,
    change_log: ChangeLogEmitter,
}

impl EntityService {
    pub fn new(store: Arc<dyn AspectStore>, change_log: ChangeLogEmitter) -> Self {
        Self { store, change_log }
    }

    pub fn store(&self) -> &Arc<dyn AspectStore> {
        &self.store
    }

    pub fn change_log(&self) -> &ChangeLogEmitter {
        &self.change_log
    }

    pub fn ingest(
        &self,
        op_context: &OperationContext,
        run_id: &str,
        urn: &str,
        aspect_name: &str,
        payload: &Value,
        mode: WriteMode,
    ) -> Result<IngestOutcome, UpgradeError> {
        let entity_type = entity_type(urn)?;
        let previous = self.store.get_aspect(urn, aspect_name)?;
        if mode == WriteMode::IfChanged {
            if let Some(existing) = &previous {
                if &existing.payload == payload {
                    debug!(urn = %urn, aspect = %aspect_name, "Aspect unchanged, not writing");
                    return Ok(IngestOutcome::Unchanged);
                }
            }
        }

        let record = self.store.put_aspect(urn, aspect_name, payload)?;
        let event = ChangeLogEvent {
            entity_urn: record.urn.clone(),
            entity_type: entity_type.to_string(),
            aspect_name: record.aspect_name.clone(),
            change_type: ChangeType::Upsert,
            aspect: record.payload.clone(),
            previous_aspect: previous.map(|p| p.payload),
            version: record.version,
            system_metadata: self.system_metadata(op_context, run_id),
        };
        self.change_log.emit(&event)?;
        Ok(IngestOutcome::Written {
            version: record.version,
        })
    }

    /// Re-announce a stored aspect without writing it.
    pub fn restate(
        &self,
        op_context: &OperationContext,
        run_id: &str,
        record: &AspectRecord,
    ) -> Result<(), UpgradeError> {
        let entity_type = entity_type(&record.urn)?;
        let event = ChangeLogEvent {
            entity_urn: record.urn.clone(),
            entity_type: entity_type.to_string(),
            aspect_name: record.aspect_name.clone(),
            change_type: ChangeType::Restate,
            aspect: record.payload.clone(),
            previous_aspect: None,
            version: record.version,
            system_metadata: self.system_metadata(op_context, run_id),
        };
        self.change_log.emit(&event)?;
        Ok(())
    }

    fn system_metadata(&self, op_context: &OperationContext, run_id: &str) -> SystemMetadata {
        SystemMetadata {
            run_id: run_id.to_string(),
            actor: op_context.actor.clone(),
            last_observed_ms: now_millis(),
        }
    }
}

fn entity_type(urn: &str) -> Result<&str, StoreError> {
    entity_type_of(urn).ok_or_else(|| StoreError::InvalidArgs(format!("malformed entity urn: {urn}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{JsonCodec, MemoryProducer, TopicEmitter, METADATA_CHANGE_LOG_VERSIONED_TOPIC};
    use crate::store::InMemoryAspectStore;
    use serde_json::json;

    fn service() -> (EntityService, Arc<InMemoryAspectStore>, Arc<MemoryProducer>) {
        let store = Arc::new(InMemoryAspectStore::new());
        let producer = MemoryProducer::shared();
        let change_log =
            TopicEmitter::new(METADATA_CHANGE_LOG_VERSIONED_TOPIC, Arc::new(JsonCodec), producer.clone());
        (EntityService::new(store.clone(), change_log), store, producer)
    }

    #[test]
    fn if_changed_skips_identical_payloads() {
        let (svc, store, producer) = service();
        let op = OperationContext::system();
        let payload = json!({"name": "PII"});

        let first = svc
            .ingest(&op, "run", "urn:li:tag:pii", "tagProperties", &payload, WriteMode::IfChanged)
            .unwrap();
        assert_eq!(first, IngestOutcome::Written { version: 1 });

        let second = svc
            .ingest(&op, "run", "urn:li:tag:pii", "tagProperties", &payload, WriteMode::IfChanged)
            .unwrap();
        assert_eq!(second, IngestOutcome::Unchanged);
        assert_eq!(store.write_count(), 1);
        assert_eq!(producer.count(METADATA_CHANGE_LOG_VERSIONED_TOPIC), 1);

        let forced = svc
            .ingest(&op, "run", "urn:li:tag:pii", "tagProperties", &payload, WriteMode::Always)
            .unwrap();
        assert_eq!(forced, IngestOutcome::Written { version: 2 });
        let sent = producer.messages(METADATA_CHANGE_LOG_VERSIONED_TOPIC);
        let event = svc.change_log().decode(&sent[1]).unwrap();
        assert_eq!(event.previous_aspect, Some(payload));
        assert_eq!(event.entity_type, "tag");
    }

    #[test]
    fn restate_emits_without_writing() {
        let (svc, store, producer) = service();
        store.seed("urn:li:tag:pii", "tagProperties", json!({"name": "PII"}));
        let record = store.get_aspect("urn:li:tag:pii", "tagProperties").unwrap().unwrap();
        svc.restate(&OperationContext::system(), "run", &record).unwrap();

        assert_eq!(store.write_count(), 0);
        let sent = producer.messages(METADATA_CHANGE_LOG_VERSIONED_TOPIC);
        let event = svc.change_log().decode(&sent[0]).unwrap();
        assert_eq!(event.change_type, ChangeType::Restate);
    }

    #[test]
    fn malformed_urns_are_rejected_before_writing() {
        let (svc, store, _) = service();
        let err = svc
            .ingest(&OperationContext::system(), "run", "not-a-urn", "x", &json!({}), WriteMode::Always)
            .unwrap_err();
        assert!(matches!(err, UpgradeError::Store(StoreError::InvalidArgs(_))));
        assert!(store.is_empty());
    }
}
