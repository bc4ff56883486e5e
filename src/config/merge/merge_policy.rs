//! Merge rules: defaults, override order, conflict handling.

use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

use crate::events::{METADATA_CHANGE_LOG_VERSIONED_TOPIC, UPGRADE_HISTORY_TOPIC};

/// Create a Config builder with merge policy defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError>
{
    let store_path = crate::config::default_store_path();
    Config::builder()
        .set_default("storage.path", store_path.to_string_lossy().to_string())?
        .set_default("events.change_log_topic", METADATA_CHANGE_LOG_VERSIONED_TOPIC)?
        .set_default("events.history_topic", UPGRADE_HISTORY_TOPIC)?
        .set_default("execution.max_attempts", 3i64)?
        .set_default("execution.retry_delay_ms", 500i64)
}
