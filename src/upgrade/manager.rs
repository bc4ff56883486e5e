//! Upgrade registry and step sequencing.

use std::collections::{BTreeMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::error::UpgradeError;
use crate::events::{HistoryEmitter, UpgradeHistoryEvent};
use crate::types::new_run_id;
use crate::upgrade::context::{OperationContext, ShutdownSignal, StepContext};
use crate::upgrade::report::{StepReport, StepResult, UpgradeOutcome, UpgradeReport};
use crate::upgrade::{Upgrade, UpgradeStep};

/// Retry and timeout settings applied to every step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPolicy {
    /// Attempts granted to a retryable step (non-retryable steps get one).
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// Budget for one step across all of its attempts.
    pub step_timeout: Option<Duration>,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_millis(500),
            step_timeout: None,
        }
    }
}

/// Registry of named upgrades and the engine that runs them.
///
/// Steps of one upgrade run strictly in order on the calling thread. Distinct
/// upgrades may be executed concurrently from different threads; the same
/// upgrade is refused while it is already running in this process.
pub struct UpgradeManager {
    upgrades: BTreeMap<String, Arc<Upgrade>>,
    history: Option<HistoryEmitter>,
    policy: ExecutionPolicy,
    shutdown: ShutdownSignal,
    running: Mutex<HashSet<String>>,
}

impl Default for UpgradeManager {
    fn default() -> Self {
        Self::new()
    }
}

impl UpgradeManager {
    pub fn new() -> Self {
        Self {
            upgrades: BTreeMap::new(),
            history: None,
            policy: ExecutionPolicy::default(),
            shutdown: ShutdownSignal::new(),
            running: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_history(mut self, history: HistoryEmitter) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    pub fn register(&mut self, upgrade: Upgrade) -> Result<(), UpgradeError> {
        let name = upgrade.name().to_string();
        if self.upgrades.contains_key(&name) {
            return Err(UpgradeError::DuplicateRegistration(name));
        }
        info!(upgrade = %name, steps = upgrade.steps().len(), "Registered upgrade");
        self.upgrades.insert(name, Arc::new(upgrade));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Upgrade>> {
        self.upgrades.get(name).cloned()
    }

    /// Registered upgrade names, sorted.
    pub fn upgrade_names(&self) -> Vec<&str> {
        self.upgrades.keys().map(String::as_str).collect()
    }

    /// Run the named upgrade and publish its report to the history topic.
    ///
    /// Only lookup and re-entrancy problems are returned as errors; anything a
    /// step does wrong ends up in the report.
    pub fn execute(
        &self,
        op_context: &OperationContext,
        name: &str,
        args: &[String],
    ) -> Result<UpgradeReport, UpgradeError> {
        let upgrade = self
            .upgrades
            .get(name)
            .cloned()
            .ok_or_else(|| UpgradeError::UnknownUpgrade(name.to_string()))?;
        let _guard = RunningGuard::acquire(&self.running, name)?;

        let run_id = new_run_id();
        let started_at = timestamp();
        info!(
            upgrade = %name,
            run_id = %run_id,
            actor = %op_context.actor,
            request_id = %op_context.request_id,
            args = ?args,
            "Starting upgrade"
        );

        let mut steps: Vec<StepReport> = Vec::with_capacity(upgrade.steps().len());
        let mut overall = UpgradeOutcome::Succeeded;

        for step in upgrade.steps() {
            if self.shutdown.is_triggered() {
                warn!(upgrade = %name, next_step = %step.id(), "Shutdown requested, not starting further steps");
                overall = UpgradeOutcome::Failed;
                break;
            }

            let report = self.run_step(&upgrade, step.as_ref(), &run_id, args, op_context, &steps);
            let failed = report.result.is_failed();
            steps.push(report);

            if failed {
                // A failed step always degrades the run; only skippable steps let it continue.
                overall = UpgradeOutcome::Aborted;
                if !step.skippable() {
                    error!(upgrade = %name, step = %step.id(), "Step failed, aborting upgrade");
                    break;
                }
                warn!(upgrade = %name, step = %step.id(), "Skippable step failed, continuing");
            }
        }

        let mut cleanup = Vec::with_capacity(upgrade.cleanup_steps().len());
        for step in upgrade.cleanup_steps() {
            let report = self.run_step(&upgrade, step.as_ref(), &run_id, args, op_context, &steps);
            if report.result.is_failed() {
                warn!(
                    upgrade = %name,
                    step = %step.id(),
                    message = ?report.result.message,
                    "Cleanup step failed"
                );
            }
            cleanup.push(report);
        }

        let report = UpgradeReport {
            upgrade_name: name.to_string(),
            run_id,
            overall,
            args: args.to_vec(),
            steps,
            cleanup,
            started_at,
            finished_at: timestamp(),
        };

        info!(
            upgrade = %name,
            run_id = %report.run_id,
            overall = %report.overall,
            steps_run = report.steps.len(),
            "Upgrade finished"
        );
        self.publish(&report);
        Ok(report)
    }

    fn run_step(
        &self,
        upgrade: &Upgrade,
        step: &dyn UpgradeStep,
        run_id: &str,
        args: &[String],
        op_context: &OperationContext,
        previous: &[StepReport],
    ) -> StepReport {
        let started = Instant::now();
        let deadline = self.policy.step_timeout.map(|t| started + t);
        let ctx = StepContext::new(
            upgrade.name(),
            run_id,
            args,
            op_context,
            previous,
            &self.shutdown,
            deadline,
        );

        if let Some(reason) = step.skip(&ctx) {
            info!(upgrade = %upgrade.name(), step = %step.id(), reason = %reason, "Skipping step");
            return StepReport {
                step_id: step.id().to_string(),
                result: StepResult::skipped(reason),
                attempts: 0,
                duration_ms: 0,
            };
        }

        let max_attempts = if step.retryable() {
            self.policy.max_attempts.max(1)
        } else {
            1
        };

        let mut attempts = 0u32;
        let result = loop {
            attempts += 1;
            info!(upgrade = %upgrade.name(), step = %step.id(), attempt = attempts, "Executing step");
            let (result, may_retry) = invoke(step, &ctx);
            if !result.is_failed() || !may_retry || attempts >= max_attempts {
                break result;
            }
            if let Some(interruption) = ctx.interruption() {
                warn!(step = %step.id(), %interruption, "Not retrying interrupted step");
                break result;
            }
            warn!(
                upgrade = %upgrade.name(),
                step = %step.id(),
                attempt = attempts,
                max_attempts,
                message = ?result.message,
                "Step attempt failed, retrying"
            );
            if !self.policy.retry_delay.is_zero() {
                std::thread::sleep(self.policy.retry_delay);
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            upgrade = %upgrade.name(),
            step = %step.id(),
            status = %result.status,
            action_performed = result.action_performed,
            duration_ms,
            "Step finished"
        );
        StepReport {
            step_id: step.id().to_string(),
            result,
            attempts,
            duration_ms,
        }
    }

    fn publish(&self, report: &UpgradeReport) {
        let Some(history) = &self.history else {
            return;
        };
        if let Err(e) = history.emit(&UpgradeHistoryEvent::new(report.clone())) {
            error!(
                upgrade = %report.upgrade_name,
                run_id = %report.run_id,
                topic = %history.topic(),
                error = %e,
                "Failed to publish upgrade history"
            );
        }
    }
}

/// Run one attempt, folding errors and panics into a failed result. The flag
/// tells whether another attempt could help.
fn invoke(step: &dyn UpgradeStep, ctx: &StepContext<'_>) -> (StepResult, bool) {
    match catch_unwind(AssertUnwindSafe(|| step.execute(ctx))) {
        Ok(Ok(result)) => (result, true),
        Ok(Err(e)) => {
            let transient = e.is_transient();
            (StepResult::failed(e.to_string()), transient)
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            (StepResult::failed(format!("step panicked: {}", message)), false)
        }
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

struct RunningGuard<'a> {
    running: &'a Mutex<HashSet<String>>,
    name: String,
}

impl<'a> RunningGuard<'a> {
    fn acquire(running: &'a Mutex<HashSet<String>>, name: &str) -> Result<Self, UpgradeError> {
        if !running.lock().insert(name.to_string()) {
            return Err(UpgradeError::AlreadyRunning(name.to_string()));
        }
        Ok(Self {
            running,
            name: name.to_string(),
        })
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.running.lock().remove(&self.name);
    }
}
