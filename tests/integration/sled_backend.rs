//! Upgrades against the sled-backed store and topic log

use catalog_upgrade::config::UpgradeConfig;
use catalog_upgrade::events::{ChangeType, CodecKind};
use catalog_upgrade::store::{AspectStore, RestoreIndicesArgs, SledAspectStore};
use catalog_upgrade::system::{build_manager, SledSystem};
use catalog_upgrade::upgrade::{
    OperationContext, UpgradeOutcome, SYSTEM_UPDATE_BLOCKING, SYSTEM_UPDATE_NON_BLOCKING,
};
use tempfile::TempDir;

use crate::integration::test_utils::{job_io, job_urn};

fn config_in(dir: &TempDir) -> UpgradeConfig {
    let mut config = UpgradeConfig::default();
    config.storage.path = dir.path().join("store");
    config.events.history_codec = CodecKind::Internal;
    config.reindex.batch_size = 4;
    config
}

#[test]
fn system_upgrades_persist_across_reopen() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);

    {
        let system = SledSystem::open(&config).unwrap();
        for i in 0..10 {
            system
                .entities
                .store()
                .put_aspect(&job_urn(i), "dataJobInputOutput", &job_io(i))
                .unwrap();
        }
        let manager = build_manager(&config, &system.entities, system.history.clone()).unwrap();
        let op = OperationContext::system();
        assert!(manager.execute(&op, SYSTEM_UPDATE_BLOCKING, &[]).unwrap().succeeded());
        let report = manager.execute(&op, SYSTEM_UPDATE_NON_BLOCKING, &[]).unwrap();
        assert_eq!(report.overall, UpgradeOutcome::Succeeded);
        assert!(report.step("ReindexDataJobViaNodesCll").unwrap().result.action_performed);
    }

    let system = SledSystem::open(&config).unwrap();
    let derived = system
        .entities
        .store()
        .get_aspect(&job_urn(9), "dataJobLineageEdges")
        .unwrap()
        .unwrap();
    assert_eq!(derived.version, 1);

    // Internal framing on the history topic, JSON on the change log.
    let history = system.topic_log.read_all(&config.events.history_topic).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].payload[0], 0);
    let first = system.history.decode(&history[0]).unwrap();
    assert_eq!(first.report.upgrade_name, SYSTEM_UPDATE_BLOCKING);

    let changes = system.topic_log.read_all(&config.events.change_log_topic).unwrap();
    let last = system.entities.change_log().decode(changes.last().unwrap()).unwrap();
    assert_eq!(last.change_type, ChangeType::Upsert);

    // Second run over the reopened database: everything already applied.
    let manager = build_manager(&config, &system.entities, system.history.clone()).unwrap();
    let op = OperationContext::system();
    let rerun = manager.execute(&op, SYSTEM_UPDATE_NON_BLOCKING, &[]).unwrap();
    assert!(rerun.steps.iter().all(|s| !s.result.action_performed));
    assert_eq!(
        system.topic_log.read_all(&config.events.change_log_topic).unwrap().len(),
        changes.len()
    );
}

#[test]
fn restore_indices_restates_from_sled() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    let system = SledSystem::open(&config).unwrap();
    for i in 0..7 {
        system
            .entities
            .store()
            .put_aspect(&job_urn(i), "dataJobInputOutput", &job_io(i))
            .unwrap();
    }
    let manager = build_manager(&config, &system.entities, system.history.clone()).unwrap();

    let report = manager
        .execute(
            &OperationContext::system(),
            "RestoreIndices",
            &["batchSize=3".to_string(), "limit=5".to_string()],
        )
        .unwrap();
    assert!(report.succeeded());

    let changes = system.topic_log.read_all(&config.events.change_log_topic).unwrap();
    assert_eq!(changes.len(), 5);
    let event = system.entities.change_log().decode(&changes[0]).unwrap();
    assert_eq!(event.change_type, ChangeType::Restate);
    assert_eq!(event.entity_urn, job_urn(0));
}

#[test]
fn sled_scan_matches_in_memory_paging() {
    let dir = TempDir::new().unwrap();
    let store = SledAspectStore::new(dir.path()).unwrap();
    for i in 0..23 {
        store.put_aspect(&job_urn(i), "dataJobInputOutput", &job_io(i)).unwrap();
        store.put_aspect(&job_urn(i), "dataJobInfo", &job_io(i)).unwrap();
    }
    let args = RestoreIndicesArgs::new()
        .batch_size(10)
        .aspect_name("dataJobInputOutput")
        .urn_like("urn:li:dataJob:%");
    let sizes: Vec<usize> = store
        .stream_aspect_batches(&args)
        .map(|batch| batch.unwrap().len())
        .collect();
    assert_eq!(sizes, vec![10, 10, 3]);
}
