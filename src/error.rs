//! Error types for the upgrade engine.

use thiserror::Error;

/// Aspect store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store operation timed out after {0} ms")]
    Timeout(u64),

    #[error("Invalid scan arguments: {0}")]
    InvalidArgs(String),

    #[error("Corrupt aspect record for {urn}/{aspect}: {reason}")]
    Corrupt {
        urn: String,
        aspect: String,
        reason: String,
    },

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Event publication errors
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Failed to publish to topic {topic}: {reason}")]
    Failed { topic: String, reason: String },

    #[error("Publish to topic {0} timed out")]
    Timeout(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Deserialization failed: {0}")]
    Deserialization(String),
}

/// Orchestration errors.
///
/// `UnknownUpgrade`, `DuplicateRegistration` and `ConfigurationDefect` reach the
/// caller directly. Everything raised inside a step is folded into a failed
/// step result by the manager.
#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("Unknown upgrade: {0}")]
    UnknownUpgrade(String),

    #[error("Upgrade already registered: {0}")]
    DuplicateRegistration(String),

    #[error("Upgrade {0} is already running in this process")]
    AlreadyRunning(String),

    #[error("Configuration defect: {0}")]
    ConfigurationDefect(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<config::ConfigError> for UpgradeError {
    fn from(err: config::ConfigError) -> Self {
        UpgradeError::ConfigError(err.to_string())
    }
}

impl UpgradeError {
    /// Transient errors worth another attempt when the step is retryable.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            UpgradeError::Store(StoreError::Unavailable(_))
                | UpgradeError::Store(StoreError::Timeout(_))
                | UpgradeError::Publish(PublishError::Failed { .. })
                | UpgradeError::Publish(PublishError::Timeout(_))
        )
    }
}
