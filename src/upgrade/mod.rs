//! Upgrades and the steps they are made of.

pub mod context;
pub mod manager;
pub mod report;

pub use context::{Interruption, OperationContext, ShutdownSignal, StepContext, SYSTEM_ACTOR};
pub use manager::{ExecutionPolicy, UpgradeManager};
pub use report::{StepReport, StepResult, StepStatus, UpgradeOutcome, UpgradeReport};

use std::collections::HashSet;

use crate::error::UpgradeError;
use crate::steps::bootstrap::BootstrapStep;

pub const SYSTEM_UPDATE_BLOCKING: &str = "SystemUpdateBlocking";
pub const SYSTEM_UPDATE_NON_BLOCKING: &str = "SystemUpdateNonBlocking";

/// A single unit of migration work.
///
/// `id` must stay stable across releases: history records and completion
/// markers are keyed by it.
pub trait UpgradeStep: Send + Sync {
    fn id(&self) -> &str;

    /// A failure of this step is recorded but does not stop the upgrade.
    fn skippable(&self) -> bool {
        false
    }

    /// A failed attempt may be repeated under the manager's retry policy.
    fn retryable(&self) -> bool {
        false
    }

    /// Checked before execution; `Some(reason)` records the step as skipped.
    fn skip(&self, _ctx: &StepContext<'_>) -> Option<String> {
        None
    }

    fn execute(&self, ctx: &StepContext<'_>) -> Result<StepResult, UpgradeError>;

    fn as_bootstrap(&self) -> Option<&BootstrapStep> {
        None
    }
}

/// Named, ordered migration procedure. Immutable once built.
pub struct Upgrade {
    name: String,
    steps: Vec<Box<dyn UpgradeStep>>,
    cleanup_steps: Vec<Box<dyn UpgradeStep>>,
}

impl std::fmt::Debug for Upgrade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upgrade")
            .field("name", &self.name)
            .field("steps", &self.step_ids())
            .field("cleanup_steps", &self.cleanup_steps.iter().map(|s| s.id()).collect::<Vec<_>>())
            .finish()
    }
}

impl Upgrade {
    /// Build an upgrade. Step ids must be unique across main and cleanup steps.
    pub fn new(
        name: impl Into<String>,
        steps: Vec<Box<dyn UpgradeStep>>,
        cleanup_steps: Vec<Box<dyn UpgradeStep>>,
    ) -> Result<Self, UpgradeError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(UpgradeError::ConfigurationDefect(
                "upgrade name cannot be empty".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for step in steps.iter().chain(cleanup_steps.iter()) {
            if !seen.insert(step.id().to_string()) {
                return Err(UpgradeError::ConfigurationDefect(format!(
                    "upgrade {} declares step id {} twice",
                    name,
                    step.id()
                )));
            }
        }
        Ok(Self {
            name,
            steps,
            cleanup_steps,
        })
    }

    /// The upgrade that runs before the platform reports ready.
    pub fn blocking(
        steps: Vec<Box<dyn UpgradeStep>>,
        cleanup_steps: Vec<Box<dyn UpgradeStep>>,
    ) -> Result<Self, UpgradeError> {
        Self::new(SYSTEM_UPDATE_BLOCKING, steps, cleanup_steps)
    }

    /// The upgrade that may run after readiness. Refuses blocking bootstrap
    /// templates.
    pub fn non_blocking(
        steps: Vec<Box<dyn UpgradeStep>>,
        cleanup_steps: Vec<Box<dyn UpgradeStep>>,
    ) -> Result<Self, UpgradeError> {
        let blocking: Vec<&str> = steps
            .iter()
            .chain(cleanup_steps.iter())
            .filter_map(|s| s.as_bootstrap())
            .filter(|b| b.template().blocking)
            .map(|b| b.template().name.as_str())
            .collect();
        if !blocking.is_empty() {
            return Err(UpgradeError::ConfigurationDefect(format!(
                "Found blocking step: {:?} (expected non-blocking only)",
                blocking
            )));
        }
        Self::new(SYSTEM_UPDATE_NON_BLOCKING, steps, cleanup_steps)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Box<dyn UpgradeStep>] {
        &self.steps
    }

    pub fn cleanup_steps(&self) -> &[Box<dyn UpgradeStep>] {
        &self.cleanup_steps
    }

    pub fn step_ids(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.id()).collect()
    }

    pub fn bootstrap_steps(&self) -> impl Iterator<Item = &BootstrapStep> {
        self.steps.iter().filter_map(|s| s.as_bootstrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop(&'static str);

    impl UpgradeStep for Noop {
        fn id(&self) -> &str {
            self.0
        }

        fn execute(&self, _ctx: &StepContext<'_>) -> Result<StepResult, UpgradeError> {
            Ok(StepResult::succeeded(false))
        }
    }

    #[test]
    fn duplicate_step_ids_are_a_configuration_defect() {
        let err = Upgrade::new(
            "U",
            vec![Box::new(Noop("a")), Box::new(Noop("b"))],
            vec![Box::new(Noop("a"))],
        )
        .unwrap_err();
        assert!(matches!(err, UpgradeError::ConfigurationDefect(_)));
    }

    #[test]
    fn empty_name_is_rejected() {
        assert!(Upgrade::new(" ", vec![], vec![]).is_err());
    }

    #[test]
    fn non_blocking_accepts_plain_steps() {
        let upgrade = Upgrade::non_blocking(vec![Box::new(Noop("a"))], vec![]).unwrap();
        assert_eq!(upgrade.name(), SYSTEM_UPDATE_NON_BLOCKING);
        assert_eq!(upgrade.step_ids(), vec!["a"]);
        assert_eq!(upgrade.bootstrap_steps().count(), 0);
    }
}
