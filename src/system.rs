//! Wiring of the built-in system upgrades.
//!
//! `SystemUpdateBlocking` applies the blocking bootstrap templates and must
//! finish before the platform reports ready. `SystemUpdateNonBlocking` applies
//! the remaining templates and the data job lineage reindex. `RestoreIndices`
//! is run on demand.

use std::sync::Arc;

use tracing::warn;

use crate::config::UpgradeConfig;
use crate::entity::EntityService;
use crate::error::{StoreError, UpgradeError};
use crate::events::{HistoryEmitter, SledTopicLog, TopicEmitter};
use crate::steps::bootstrap::{load_manifest, BootstrapStep, BootstrapTemplate};
use crate::steps::{restore, FlushStore, ReindexDataJobViaNodesCll, RestoreIndicesStep};
use crate::store::SledAspectStore;
use crate::upgrade::{Upgrade, UpgradeManager, UpgradeStep};

/// Split templates into (blocking, non-blocking), keeping manifest order.
pub fn partition_templates(
    templates: Vec<BootstrapTemplate>,
) -> (Vec<BootstrapTemplate>, Vec<BootstrapTemplate>) {
    templates.into_iter().partition(|t| t.blocking)
}

fn bootstrap_steps(
    templates: &[BootstrapTemplate],
    config: &UpgradeConfig,
    entities: &EntityService,
) -> Vec<Box<dyn UpgradeStep>> {
    templates
        .iter()
        .map(|template| {
            let enabled = config.bootstrap.is_enabled(&template.name);
            Box::new(BootstrapStep::new(template.clone(), entities.clone()).with_enabled(enabled))
                as Box<dyn UpgradeStep>
        })
        .collect()
}

fn cleanup_steps(entities: &EntityService) -> Vec<Box<dyn UpgradeStep>> {
    vec![Box::new(FlushStore::new(entities.clone()))]
}

pub fn blocking_upgrade(
    templates: &[BootstrapTemplate],
    config: &UpgradeConfig,
    entities: &EntityService,
) -> Result<Upgrade, UpgradeError> {
    Upgrade::blocking(bootstrap_steps(templates, config, entities), cleanup_steps(entities))
}

/// Fails with a configuration defect if any of `templates` is blocking.
pub fn non_blocking_upgrade(
    templates: &[BootstrapTemplate],
    config: &UpgradeConfig,
    entities: &EntityService,
) -> Result<Upgrade, UpgradeError> {
    let mut steps = bootstrap_steps(templates, config, entities);
    steps.push(Box::new(ReindexDataJobViaNodesCll::new(
        config.reindex.clone(),
        entities.clone(),
    )));
    Upgrade::non_blocking(steps, cleanup_steps(entities))
}

pub fn restore_indices_upgrade(
    config: &UpgradeConfig,
    entities: &EntityService,
) -> Result<Upgrade, UpgradeError> {
    Upgrade::new(
        restore::STEP_ID,
        vec![Box::new(RestoreIndicesStep::new(
            config.restore.clone(),
            entities.clone(),
        ))],
        cleanup_steps(entities),
    )
}

/// Build a manager with every system upgrade registered.
pub fn build_manager(
    config: &UpgradeConfig,
    entities: &EntityService,
    history: HistoryEmitter,
) -> Result<UpgradeManager, UpgradeError> {
    let templates = load_manifest(config.bootstrap.manifest.as_deref())?;
    for name in config.bootstrap.templates.keys() {
        if !templates.iter().any(|t| &t.name == name) {
            warn!(template = %name, "Toggle refers to an unknown bootstrap template");
        }
    }
    let (blocking, non_blocking) = partition_templates(templates);

    let mut manager = UpgradeManager::new()
        .with_history(history)
        .with_policy(config.execution.policy());
    manager.register(blocking_upgrade(&blocking, config, entities)?)?;
    manager.register(non_blocking_upgrade(&non_blocking, config, entities)?)?;
    manager.register(restore_indices_upgrade(config, entities)?)?;
    Ok(manager)
}

/// Durable collaborators backed by one sled database.
pub struct SledSystem {
    pub entities: EntityService,
    pub history: HistoryEmitter,
    pub topic_log: Arc<SledTopicLog>,
}

impl SledSystem {
    pub fn open(config: &UpgradeConfig) -> Result<Self, UpgradeError> {
        if let Some(parent) = config.storage.path.parent() {
            std::fs::create_dir_all(parent).map_err(StoreError::from)?;
        }
        let db = sled::open(&config.storage.path).map_err(StoreError::from)?;
        let store = Arc::new(SledAspectStore::from_db(db.clone())?);
        let topic_log = SledTopicLog::shared(db);

        let change_log = TopicEmitter::new(
            config.events.change_log_topic.clone(),
            config.events.change_log_codec.build(),
            topic_log.clone(),
        );
        let history = TopicEmitter::new(
            config.events.history_topic.clone(),
            config.events.history_codec.build(),
            topic_log.clone(),
        );
        Ok(Self {
            entities: EntityService::new(store, change_log),
            history,
            topic_log,
        })
    }
}
