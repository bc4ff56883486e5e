//! CLI output: error mapping from domain errors to stable CLI surface.

use crate::error::UpgradeError;
use crate::upgrade::{UpgradeOutcome, UpgradeReport};

pub const EXIT_SUCCEEDED: i32 = 0;
pub const EXIT_UPGRADE_FAILED: i32 = 1;
pub const EXIT_UNKNOWN_UPGRADE: i32 = 2;
pub const EXIT_CONFIGURATION: i32 = 3;
pub const EXIT_OTHER: i32 = 4;

/// Map domain errors to a string for CLI output.
pub fn map_error(e: &UpgradeError) -> String {
    match e {
        UpgradeError::UnknownUpgrade(name) => format!(
            "Unknown upgrade '{}' (run `catalog-upgrade list` to see registered upgrades)",
            name
        ),
        _ => e.to_string(),
    }
}

pub fn exit_code_for_error(e: &UpgradeError) -> i32 {
    match e {
        UpgradeError::UnknownUpgrade(_) => EXIT_UNKNOWN_UPGRADE,
        UpgradeError::DuplicateRegistration(_)
        | UpgradeError::ConfigurationDefect(_)
        | UpgradeError::ConfigError(_) => EXIT_CONFIGURATION,
        _ => EXIT_OTHER,
    }
}

pub fn exit_code_for_report(report: &UpgradeReport) -> i32 {
    match report.overall {
        UpgradeOutcome::Succeeded => EXIT_SUCCEEDED,
        UpgradeOutcome::Aborted | UpgradeOutcome::Failed => EXIT_UPGRADE_FAILED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    #[test]
    fn errors_map_to_stable_exit_codes() {
        assert_eq!(exit_code_for_error(&UpgradeError::UnknownUpgrade("X".into())), 2);
        assert_eq!(exit_code_for_error(&UpgradeError::DuplicateRegistration("X".into())), 3);
        assert_eq!(exit_code_for_error(&UpgradeError::ConfigurationDefect("x".into())), 3);
        assert_eq!(
            exit_code_for_error(&UpgradeError::Store(StoreError::Unavailable("down".into()))),
            4
        );
        assert!(map_error(&UpgradeError::UnknownUpgrade("Nope".into())).contains("'Nope'"));
    }
}
