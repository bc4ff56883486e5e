//! Execution-scoped state handed to steps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::upgrade::report::StepReport;

pub const SYSTEM_ACTOR: &str = "urn:li:corpuser:__system";

/// Ambient identity and telemetry for an execution. Opaque to the engine apart
/// from being stamped onto emitted events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationContext {
    pub actor: String,
    pub request_id: String,
}

impl OperationContext {
    pub fn new(actor: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            request_id: request_id.into(),
        }
    }

    /// Context of the platform itself, used by the CLI.
    pub fn system() -> Self {
        Self::new(SYSTEM_ACTOR, crate::types::new_run_id())
    }
}

/// Cooperative shutdown flag shared between the signal handler and the engine.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why a step should stop at the next safe boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interruption {
    Shutdown,
    DeadlineExceeded,
}

impl std::fmt::Display for Interruption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Interruption::Shutdown => f.write_str("shutdown requested"),
            Interruption::DeadlineExceeded => f.write_str("step deadline exceeded"),
        }
    }
}

pub struct StepContext<'a> {
    upgrade_name: &'a str,
    run_id: &'a str,
    args: &'a [String],
    op_context: &'a OperationContext,
    previous: &'a [StepReport],
    shutdown: &'a ShutdownSignal,
    deadline: Option<Instant>,
}

impl<'a> StepContext<'a> {
    pub fn new(
        upgrade_name: &'a str,
        run_id: &'a str,
        args: &'a [String],
        op_context: &'a OperationContext,
        previous: &'a [StepReport],
        shutdown: &'a ShutdownSignal,
        deadline: Option<Instant>,
    ) -> Self {
        Self {
            upgrade_name,
            run_id,
            args,
            op_context,
            previous,
            shutdown,
            deadline,
        }
    }

    pub fn upgrade_name(&self) -> &str {
        self.upgrade_name
    }

    pub fn run_id(&self) -> &str {
        self.run_id
    }

    pub fn args(&self) -> &[String] {
        self.args
    }

    pub fn op_context(&self) -> &OperationContext {
        self.op_context
    }

    /// Results of the steps executed earlier in this run, in execution order.
    pub fn previous_results(&self) -> &[StepReport] {
        self.previous
    }

    /// Value of the last `key=value` argument with the given key.
    pub fn arg_value(&self, key: &str) -> Option<&str> {
        self.args.iter().rev().find_map(|arg| {
            let (k, v) = arg.split_once('=')?;
            (k.trim() == key).then(|| v.trim())
        })
    }

    pub fn interruption(&self) -> Option<Interruption> {
        if self.shutdown.is_triggered() {
            return Some(Interruption::Shutdown);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Interruption::DeadlineExceeded),
            _ => None,
        }
    }
}
