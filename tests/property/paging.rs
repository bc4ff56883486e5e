//! Batch-size invariance and limit properties of the paged reindex

use catalog_upgrade::config::ReindexConfig;
use catalog_upgrade::entity::EntityService;
use catalog_upgrade::events::{JsonCodec, MemoryProducer, TopicEmitter, METADATA_CHANGE_LOG_VERSIONED_TOPIC};
use catalog_upgrade::steps::ReindexDataJobViaNodesCll;
use catalog_upgrade::store::{AspectStore, InMemoryAspectStore, RestoreIndicesArgs};
use catalog_upgrade::upgrade::{OperationContext, ShutdownSignal, StepContext, StepStatus, UpgradeStep};
use proptest::prelude::*;
use proptest::test_runner::{Config, TestRunner};
use serde_json::json;
use std::sync::Arc;

fn seeded_store(jobs: usize) -> Arc<InMemoryAspectStore> {
    let store = Arc::new(InMemoryAspectStore::new());
    for i in 0..jobs {
        store.seed(
            &format!("urn:li:dataJob:(urn:li:dataFlow:(airflow,etl,prod),t{:04})", i),
            "dataJobInputOutput",
            json!({"inputDatasets": [format!("urn:li:dataset:in{}", i)], "outputDatasets": []}),
        );
    }
    store
}

fn run_reindex(store: &Arc<InMemoryAspectStore>, batch_size: usize, limit: usize) -> (StepStatus, usize) {
    let producer = MemoryProducer::shared();
    let change_log =
        TopicEmitter::new(METADATA_CHANGE_LOG_VERSIONED_TOPIC, Arc::new(JsonCodec), producer.clone());
    let step = ReindexDataJobViaNodesCll::new(
        ReindexConfig {
            batch_size,
            limit,
            ..ReindexConfig::default()
        },
        EntityService::new(store.clone(), change_log),
    );
    let op = OperationContext::system();
    let shutdown = ShutdownSignal::new();
    let ctx = StepContext::new("U", "run", &[], &op, &[], &shutdown, None);
    let result = step.execute(&ctx).unwrap();
    (result.status, producer.count(METADATA_CHANGE_LOG_VERSIONED_TOPIC))
}

/// ceil(M/B) batches and M derived writes, whatever the batch size.
#[test]
fn test_batch_size_invariance() {
    let mut runner = TestRunner::new(Config::with_cases(48));
    runner
        .run(&(0usize..60, 1usize..17), |(jobs, batch_size)| {
            let store = seeded_store(jobs);
            let args = RestoreIndicesArgs::new()
                .batch_size(batch_size)
                .aspect_name("dataJobInputOutput");
            let batches: Vec<usize> = store
                .stream_aspect_batches(&args)
                .map(|b| b.unwrap().len())
                .collect();
            prop_assert_eq!(batches.len(), (jobs + batch_size - 1) / batch_size);
            prop_assert!(batches.iter().all(|&len| len > 0 && len <= batch_size));

            let (status, writes) = run_reindex(&store, batch_size, 0);
            prop_assert_eq!(status, StepStatus::Succeeded);
            prop_assert_eq!(writes, jobs);
            prop_assert_eq!(store.write_count(), jobs);
            Ok(())
        })
        .unwrap();
}

/// With 0 < L < M exactly L records are written.
#[test]
fn test_limit_bounds_writes() {
    let mut runner = TestRunner::new(Config::with_cases(48));
    runner
        .run(&(2usize..50, 1usize..12, any::<prop::sample::Index>()), |(jobs, batch_size, pick)| {
            let limit = 1 + pick.index(jobs - 1);
            prop_assume!(limit < jobs);
            let store = seeded_store(jobs);
            let (status, writes) = run_reindex(&store, batch_size, limit);
            prop_assert_eq!(status, StepStatus::Succeeded);
            prop_assert_eq!(writes, limit);
            prop_assert_eq!(store.write_count(), limit);
            Ok(())
        })
        .unwrap();
}
