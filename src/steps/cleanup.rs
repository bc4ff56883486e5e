//! Cleanup step run after every system upgrade.

use tracing::debug;

use crate::entity::EntityService;
use crate::error::UpgradeError;
use crate::upgrade::{StepContext, StepResult, UpgradeStep};

pub const STEP_ID: &str = "FlushStore";

/// Flushes the aspect store and the event producer.
pub struct FlushStore {
    entities: EntityService,
}

impl FlushStore {
    pub fn new(entities: EntityService) -> Self {
        Self { entities }
    }
}

impl UpgradeStep for FlushStore {
    fn id(&self) -> &str {
        STEP_ID
    }

    fn execute(&self, ctx: &StepContext<'_>) -> Result<StepResult, UpgradeError> {
        debug!(upgrade = %ctx.upgrade_name(), "Flushing store and producer");
        self.entities.store().flush()?;
        self.entities.change_log().producer().flush()?;
        Ok(StepResult::succeeded(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{JsonCodec, SledTopicLog, TopicEmitter};
    use crate::store::SledAspectStore;
    use crate::upgrade::{OperationContext, ShutdownSignal, StepStatus};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn flushes_sled_backed_store_and_topic_log() {
        let dir = TempDir::new().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let store = Arc::new(SledAspectStore::from_db(db.clone()).unwrap());
        let producer = SledTopicLog::shared(db);
        let change_log = TopicEmitter::new("changes", Arc::new(JsonCodec), producer);
        let step = FlushStore::new(EntityService::new(store, change_log));

        let op = OperationContext::system();
        let shutdown = ShutdownSignal::new();
        let ctx = StepContext::new("U", "run-1", &[], &op, &[], &shutdown, None);
        assert_eq!(step.execute(&ctx).unwrap().status, StepStatus::Succeeded);
    }
}
