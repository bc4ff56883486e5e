//! Configuration System
//!
//! Layered configuration for the upgrade engine: built-in defaults, the global
//! config file, workspace config files, then `CATALOG_UPGRADE__SECTION__KEY`
//! environment variables. Tests included.

use crate::error::UpgradeError;
use crate::events::{CodecKind, METADATA_CHANGE_LOG_VERSIONED_TOPIC, UPGRADE_HISTORY_TOPIC};
use crate::logging::LoggingConfig;
use crate::store::{RestoreIndicesArgs, DEFAULT_BATCH_SIZE};
use crate::upgrade::ExecutionPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod merge {
    pub mod merge_policy;
}
mod sources {
    pub mod global_file;
    pub mod workspace_file;
}

pub const ENV_PREFIX: &str = "CATALOG_UPGRADE";

/// Default location of the sled database, under the platform data directory.
pub fn default_store_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "catalog-upgrade")
        .map(|dirs| dirs.data_dir().join("store"))
        .unwrap_or_else(|| PathBuf::from(".catalog-upgrade/store"))
}

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpgradeConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub events: EventsConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Data job lineage reindex step
    #[serde(default)]
    pub reindex: ReindexConfig,

    /// Generic restore-indices step
    #[serde(default)]
    pub restore: RestoreConfig,

    #[serde(default)]
    pub bootstrap: BootstrapConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory of the sled database holding aspects and topic logs
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_change_log_topic")]
    pub change_log_topic: String,

    #[serde(default)]
    pub change_log_codec: CodecKind,

    #[serde(default = "default_history_topic")]
    pub history_topic: String,

    #[serde(default)]
    pub history_codec: CodecKind,
}

fn default_change_log_topic() -> String {
    METADATA_CHANGE_LOG_VERSIONED_TOPIC.to_string()
}

fn default_history_topic() -> String {
    UPGRADE_HISTORY_TOPIC.to_string()
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            change_log_topic: default_change_log_topic(),
            change_log_codec: CodecKind::default(),
            history_topic: default_history_topic(),
            history_codec: CodecKind::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Per-step budget, checked at batch boundaries
    #[serde(default)]
    pub step_timeout_secs: Option<u64>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            step_timeout_secs: None,
        }
    }
}

impl ExecutionConfig {
    pub fn policy(&self) -> ExecutionPolicy {
        ExecutionPolicy {
            max_attempts: self.max_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            step_timeout: self.step_timeout_secs.map(Duration::from_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReindexConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// 0 processes the whole population
    #[serde(default)]
    pub limit: usize,

    /// Pause between batches
    #[serde(default)]
    pub delay_ms: u64,

    /// Rewrite derived records even when unchanged
    #[serde(default)]
    pub restate_derived: bool,
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

impl Default for ReindexConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: default_batch_size(),
            limit: 0,
            delay_ms: 0,
            restate_derived: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default)]
    pub limit: usize,

    #[serde(default)]
    pub aspect_name: Option<String>,

    /// SQL LIKE pattern over entity urns
    #[serde(default)]
    pub urn_like: Option<String>,

    #[serde(default)]
    pub delay_ms: u64,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            limit: 0,
            aspect_name: None,
            urn_like: None,
            delay_ms: 0,
        }
    }
}

impl RestoreConfig {
    /// Scan descriptor before run arguments are applied.
    pub fn base_args(&self) -> RestoreIndicesArgs {
        let mut args = RestoreIndicesArgs::new()
            .batch_size(self.batch_size)
            .limit(self.limit);
        if let Some(aspect_name) = &self.aspect_name {
            args = args.aspect_name(aspect_name.clone());
        }
        if let Some(urn_like) = &self.urn_like {
            args = args.urn_like(urn_like.clone());
        }
        args
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Manifest replacing the built-in templates
    #[serde(default)]
    pub manifest: Option<PathBuf>,

    /// Per-template toggles; templates not listed are enabled
    #[serde(default)]
    pub templates: BTreeMap<String, bool>,
}

impl BootstrapConfig {
    pub fn is_enabled(&self, template: &str) -> bool {
        self.templates.get(template).copied().unwrap_or(true)
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    Storage(String),
    Events(String),
    Execution(String),
    Step(String, String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Storage(msg) => write!(f, "Storage: {}", msg),
            ValidationError::Events(msg) => write!(f, "Events: {}", msg),
            ValidationError::Execution(msg) => write!(f, "Execution: {}", msg),
            ValidationError::Step(name, msg) => write!(f, "Step '{}': {}", name, msg),
            ValidationError::Logging(msg) => write!(f, "Logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl UpgradeConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.storage.path.as_os_str().is_empty() {
            errors.push(ValidationError::Storage("Store path cannot be empty".to_string()));
        }

        if self.events.change_log_topic.trim().is_empty() {
            errors.push(ValidationError::Events("Change log topic cannot be empty".to_string()));
        }
        if self.events.history_topic.trim().is_empty() {
            errors.push(ValidationError::Events("History topic cannot be empty".to_string()));
        }
        if self.events.change_log_topic == self.events.history_topic {
            errors.push(ValidationError::Events(format!(
                "Change log and history share topic '{}'",
                self.events.history_topic
            )));
        }

        if self.execution.max_attempts == 0 {
            errors.push(ValidationError::Execution(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.execution.step_timeout_secs == Some(0) {
            errors.push(ValidationError::Execution(
                "step_timeout_secs must be positive when set".to_string(),
            ));
        }

        if self.reindex.batch_size == 0 {
            errors.push(ValidationError::Step(
                "ReindexDataJobViaNodesCll".to_string(),
                "batch_size must be positive".to_string(),
            ));
        }
        if let Err(e) = self.restore.base_args().validate() {
            errors.push(ValidationError::Step("RestoreIndices".to_string(), e.to_string()));
        }

        if let Err(e) = self.logging.validate() {
            errors.push(ValidationError::Logging(e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Loads [`UpgradeConfig`] from its layered sources.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Defaults, global file, workspace files, environment.
    pub fn load(workspace_root: &Path) -> Result<UpgradeConfig, UpgradeError> {
        let builder = merge::merge_policy::builder_with_defaults()?;
        let builder = sources::global_file::add_to_builder(builder)?;
        let builder = sources::workspace_file::add_to_builder(builder, workspace_root)?;
        let config = builder.add_source(Self::environment()).build()?;
        Ok(config.try_deserialize()?)
    }

    /// Defaults overlaid with a single file; no environment.
    pub fn load_from_file(path: &Path) -> Result<UpgradeConfig, UpgradeError> {
        let config = merge::merge_policy::builder_with_defaults()?
            .add_source(::config::File::from(path))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    pub fn global_config_path() -> Option<PathBuf> {
        sources::global_file::global_config_path()
    }

    fn environment() -> ::config::Environment {
        ::config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
    }
}

/// Turn validation failures into one configuration error.
pub fn validation_failure(errors: &[ValidationError]) -> UpgradeError {
    let msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    UpgradeError::ConfigError(format!(
        "Configuration validation failed:\n{}",
        msgs.join("\n")
    ))
}
