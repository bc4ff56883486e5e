//! End-to-end runs of the system upgrades over in-memory collaborators

use catalog_upgrade::config::UpgradeConfig;
use catalog_upgrade::error::UpgradeError;
use catalog_upgrade::events::UPGRADE_HISTORY_TOPIC;
use catalog_upgrade::steps::bootstrap::{load_manifest, parse_manifest, UPGRADE_RESULT_ASPECT};
use catalog_upgrade::store::AspectStore;
use catalog_upgrade::system::{build_manager, non_blocking_upgrade, partition_templates};
use catalog_upgrade::upgrade::{
    OperationContext, StepStatus, UpgradeOutcome, SYSTEM_UPDATE_BLOCKING,
    SYSTEM_UPDATE_NON_BLOCKING,
};

use crate::integration::test_utils::{job_urn, seed_data_jobs, Harness};

fn op() -> OperationContext {
    OperationContext::system()
}

#[test]
fn rerunning_applied_bootstrap_changes_nothing() {
    let harness = Harness::new();
    let manager = build_manager(&UpgradeConfig::default(), &harness.entities, harness.history.clone()).unwrap();

    let first = manager.execute(&op(), SYSTEM_UPDATE_BLOCKING, &[]).unwrap();
    assert_eq!(first.overall, UpgradeOutcome::Succeeded);
    assert!(first.steps.iter().all(|s| s.result.action_performed));
    let events_after_first = harness.change_log_count();
    assert!(events_after_first > 0);

    let second = manager.execute(&op(), SYSTEM_UPDATE_BLOCKING, &[]).unwrap();
    assert_eq!(second.overall, UpgradeOutcome::Succeeded);
    assert!(second
        .steps
        .iter()
        .all(|s| s.result.status == StepStatus::Succeeded && !s.result.action_performed));
    assert_eq!(harness.change_log_count(), events_after_first);
    assert_eq!(harness.history_count(), 2);
}

#[test]
fn bootstrap_writes_a_marker_per_template() {
    let harness = Harness::new();
    let manager = build_manager(&UpgradeConfig::default(), &harness.entities, harness.history.clone()).unwrap();
    manager.execute(&op(), SYSTEM_UPDATE_BLOCKING, &[]).unwrap();

    let (blocking, _) = partition_templates(load_manifest(None).unwrap());
    for template in blocking {
        let marker = harness
            .store
            .get_aspect(&template.marker_urn(), UPGRADE_RESULT_ASPECT)
            .unwrap()
            .expect("marker written");
        assert_eq!(marker.payload["contentHash"], template.content_hash());
    }
}

#[test]
fn non_blocking_runs_are_stable() {
    let harness = Harness::new();
    seed_data_jobs(&harness.store, 12);
    let mut config = UpgradeConfig::default();
    config.reindex.batch_size = 5;
    let manager = build_manager(&config, &harness.entities, harness.history.clone()).unwrap();

    let first = manager.execute(&op(), SYSTEM_UPDATE_NON_BLOCKING, &[]).unwrap();
    let second = manager.execute(&op(), SYSTEM_UPDATE_NON_BLOCKING, &[]).unwrap();

    assert_eq!(first.overall, UpgradeOutcome::Succeeded);
    assert_eq!(first.statuses(), second.statuses());
    let reindex = second.step("ReindexDataJobViaNodesCll").unwrap();
    assert!(!reindex.result.action_performed);
    assert!(harness
        .store
        .get_aspect(&job_urn(11), "dataJobLineageEdges")
        .unwrap()
        .is_some());
}

#[test]
fn blocking_template_in_non_blocking_upgrade_is_a_defect() {
    let harness = Harness::new();
    let templates = parse_manifest(
        r#"
        [[template]]
        name = "late"
        version = 1

        [[template]]
        name = "urgent"
        version = 1
        blocking = true
        "#,
    )
    .unwrap();

    let err = non_blocking_upgrade(&templates, &UpgradeConfig::default(), &harness.entities).unwrap_err();
    assert!(matches!(err, UpgradeError::ConfigurationDefect(_)));
    assert_eq!(harness.change_log_count(), 0);
    assert!(harness.store.is_empty());
}

#[test]
fn failing_template_aborts_and_leaves_later_templates_untouched() {
    let harness = Harness::new();
    harness.store.fail_writes_for("urn:li:dataPlatform:kafka");
    let mut config = UpgradeConfig::default();
    config.execution.retry_delay_ms = 0;
    let manager = build_manager(&config, &harness.entities, harness.history.clone()).unwrap();

    let report = manager.execute(&op(), SYSTEM_UPDATE_BLOCKING, &[]).unwrap();
    assert_eq!(report.overall, UpgradeOutcome::Aborted);
    assert_eq!(report.steps.len(), 1);
    assert_eq!(report.steps[0].step_id, "bootstrap-data-platforms");
    assert!(report.steps[0].result.is_failed());
    // Retried up to max_attempts before giving up.
    assert_eq!(report.steps[0].attempts, 3);
    assert!(harness
        .store
        .get_aspect("urn:li:corpuser:datahub", "corpUserInfo")
        .unwrap()
        .is_none());
    assert_eq!(report.cleanup.len(), 1);
    assert_eq!(report.cleanup[0].result.status, StepStatus::Succeeded);
    assert_eq!(harness.history_count(), 1);
}

#[test]
fn toggled_off_templates_are_skipped() {
    let harness = Harness::new();
    let mut config = UpgradeConfig::default();
    config.bootstrap.templates.insert("root-user".to_string(), false);
    config.reindex.enabled = false;
    let manager = build_manager(&config, &harness.entities, harness.history.clone()).unwrap();

    let report = manager.execute(&op(), SYSTEM_UPDATE_BLOCKING, &[]).unwrap();
    assert_eq!(report.overall, UpgradeOutcome::Succeeded);
    assert_eq!(
        report.step("bootstrap-root-user").unwrap().result.status,
        StepStatus::Skipped
    );

    let report = manager.execute(&op(), SYSTEM_UPDATE_NON_BLOCKING, &[]).unwrap();
    assert_eq!(
        report.step("ReindexDataJobViaNodesCll").unwrap().result.status,
        StepStatus::Skipped
    );
}

#[test]
fn history_event_carries_the_report() {
    let harness = Harness::new();
    let manager = build_manager(&UpgradeConfig::default(), &harness.entities, harness.history.clone()).unwrap();
    let report = manager
        .execute(&op(), "RestoreIndices", &["batchSize=50".to_string()])
        .unwrap();

    let sent = harness.producer.messages(UPGRADE_HISTORY_TOPIC);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].key, "RestoreIndices");
    let event = harness.history.decode(&sent[0]).unwrap();
    assert_eq!(event.report, report);
    assert_eq!(event.engine_version, env!("CARGO_PKG_VERSION"));
}
