//! Step results and the per-execution upgrade report.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Succeeded,
    Failed,
    Skipped,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Succeeded => "SUCCEEDED",
            StepStatus::Failed => "FAILED",
            StepStatus::Skipped => "SKIPPED",
        };
        f.write_str(s)
    }
}

/// Outcome of one step invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub status: StepStatus,
    /// False when the step found its work already done.
    pub action_performed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StepResult {
    pub fn succeeded(action_performed: bool) -> Self {
        Self {
            status: StepStatus::Succeeded,
            action_performed,
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Failed,
            action_performed: false,
            message: Some(message.into()),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Skipped,
            action_performed: false,
            message: Some(reason.into()),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_failed(&self) -> bool {
        self.status == StepStatus::Failed
    }
}

/// A step result as recorded by the manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    pub step_id: String,
    pub result: StepResult,
    pub attempts: u32,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpgradeOutcome {
    Succeeded,
    /// Interrupted from outside (shutdown signal) before all steps ran.
    Failed,
    /// Stopped or degraded by a failed step.
    Aborted,
}

impl fmt::Display for UpgradeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UpgradeOutcome::Succeeded => "SUCCEEDED",
            UpgradeOutcome::Failed => "FAILED",
            UpgradeOutcome::Aborted => "ABORTED",
        };
        f.write_str(s)
    }
}

/// Immutable summary of one execution. Steps that never ran are absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradeReport {
    pub upgrade_name: String,
    pub run_id: String,
    pub overall: UpgradeOutcome,
    pub args: Vec<String>,
    pub steps: Vec<StepReport>,
    pub cleanup: Vec<StepReport>,
    pub started_at: String,
    pub finished_at: String,
}

impl UpgradeReport {
    pub fn step(&self, step_id: &str) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    pub fn statuses(&self) -> Vec<(String, StepStatus)> {
        self.steps
            .iter()
            .map(|s| (s.step_id.clone(), s.result.status))
            .collect()
    }

    pub fn succeeded(&self) -> bool {
        self.overall == UpgradeOutcome::Succeeded
    }
}
