//! Shared test utilities for integration tests
//!
//! In-memory collaborators for the upgrade engine, seed helpers, and isolated
//! config directories for tests that go through `ConfigLoader`.

use catalog_upgrade::entity::EntityService;
use catalog_upgrade::events::{
    HistoryEmitter, JsonCodec, MemoryProducer, TopicEmitter, METADATA_CHANGE_LOG_VERSIONED_TOPIC,
    UPGRADE_HISTORY_TOPIC,
};
use catalog_upgrade::store::InMemoryAspectStore;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Serializes HOME / XDG_CONFIG_HOME access across tests running in parallel.
static XDG_ENV_MUTEX: Mutex<()> = Mutex::new(());

/// Memory-backed store, producer and emitters sharing one producer.
pub struct Harness {
    pub store: Arc<InMemoryAspectStore>,
    pub producer: Arc<MemoryProducer>,
    pub entities: EntityService,
    pub history: HistoryEmitter,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryAspectStore::new());
        let producer = MemoryProducer::shared();
        let change_log = TopicEmitter::new(
            METADATA_CHANGE_LOG_VERSIONED_TOPIC,
            Arc::new(JsonCodec),
            producer.clone(),
        );
        let history = TopicEmitter::new(UPGRADE_HISTORY_TOPIC, Arc::new(JsonCodec), producer.clone());
        Self {
            entities: EntityService::new(store.clone(), change_log),
            store,
            producer,
            history,
        }
    }

    pub fn change_log_count(&self) -> usize {
        self.producer.count(METADATA_CHANGE_LOG_VERSIONED_TOPIC)
    }

    pub fn history_count(&self) -> usize {
        self.producer.count(UPGRADE_HISTORY_TOPIC)
    }
}

pub fn job_urn(i: usize) -> String {
    format!("urn:li:dataJob:(urn:li:dataFlow:(airflow,etl,prod),task_{:04})", i)
}

pub fn job_io(i: usize) -> Value {
    json!({
        "inputDatasets": [format!("urn:li:dataset:(urn:li:dataPlatform:hive,raw.t{},PROD)", i)],
        "outputDatasets": [format!("urn:li:dataset:(urn:li:dataPlatform:hive,clean.t{},PROD)", i)],
    })
}

/// Seed `n` data jobs carrying a `dataJobInputOutput` aspect.
pub fn seed_data_jobs(store: &InMemoryAspectStore, n: usize) {
    for i in 0..n {
        store.seed(&job_urn(i), "dataJobInputOutput", job_io(i));
    }
}

/// Run `f` with HOME and XDG_CONFIG_HOME pointing inside `test_dir`, restoring
/// both afterwards.
pub fn with_isolated_home<F, R>(test_dir: &TempDir, f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = XDG_ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let home = std::env::var("HOME").ok();
    let xdg_config_home = std::env::var("XDG_CONFIG_HOME").ok();

    let test_home = test_dir.path().join("home");
    std::fs::create_dir_all(&test_home).unwrap();
    std::env::set_var("HOME", &test_home);
    std::env::set_var("XDG_CONFIG_HOME", test_home.join(".config"));

    let result = f();

    match home {
        Some(orig) => std::env::set_var("HOME", orig),
        None => std::env::remove_var("HOME"),
    }
    match xdg_config_home {
        Some(orig) => std::env::set_var("XDG_CONFIG_HOME", orig),
        None => std::env::remove_var("XDG_CONFIG_HOME"),
    }
    result
}
