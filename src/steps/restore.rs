//! Re-announces stored aspects on the change log so index consumers rebuild.

use std::str::FromStr;
use std::time::Duration;

use tracing::info;

use crate::config::RestoreConfig;
use crate::entity::EntityService;
use crate::error::{StoreError, UpgradeError};
use crate::steps::paged::{self, CheckpointSlot};
use crate::store::{RestoreIndicesArgs, ScanCursor};
use crate::upgrade::{StepContext, StepResult, UpgradeStep};

pub const STEP_ID: &str = "RestoreIndices";

/// Run arguments understood by the step, as `key=value`.
pub const ARG_BATCH_SIZE: &str = "batchSize";
pub const ARG_LIMIT: &str = "limit";
pub const ARG_ASPECT_NAME: &str = "aspectName";
pub const ARG_URN_LIKE: &str = "urnLike";
/// `<urn>|<aspect>` to start after.
pub const ARG_RESUME: &str = "resume";

pub struct RestoreIndicesStep {
    config: RestoreConfig,
    entities: EntityService,
    checkpoint: CheckpointSlot,
}

impl RestoreIndicesStep {
    pub fn new(config: RestoreConfig, entities: EntityService) -> Self {
        Self {
            config,
            entities,
            checkpoint: CheckpointSlot::default(),
        }
    }

    /// Configured descriptor with run arguments applied on top.
    pub fn args_for(&self, ctx: &StepContext<'_>) -> Result<RestoreIndicesArgs, StoreError> {
        let mut args = self.config.base_args();
        if let Some(value) = ctx.arg_value(ARG_BATCH_SIZE) {
            args = args.batch_size(parse_count(ARG_BATCH_SIZE, value)?);
        }
        if let Some(value) = ctx.arg_value(ARG_LIMIT) {
            args = args.limit(parse_count(ARG_LIMIT, value)?);
        }
        if let Some(value) = ctx.arg_value(ARG_ASPECT_NAME) {
            args = args.aspect_name(value);
        }
        if let Some(value) = ctx.arg_value(ARG_URN_LIKE) {
            args = args.urn_like(value);
        }
        if let Some(value) = ctx.arg_value(ARG_RESUME) {
            args = args.start_after(Some(ScanCursor::from_str(value)?));
        }
        args.validate()?;
        Ok(args)
    }
}

fn parse_count(key: &str, value: &str) -> Result<usize, StoreError> {
    value
        .parse()
        .map_err(|_| StoreError::InvalidArgs(format!("{} must be a non-negative integer, got '{}'", key, value)))
}

impl UpgradeStep for RestoreIndicesStep {
    fn id(&self) -> &str {
        STEP_ID
    }

    fn retryable(&self) -> bool {
        true
    }

    fn execute(&self, ctx: &StepContext<'_>) -> Result<StepResult, UpgradeError> {
        let scope = self.args_for(ctx)?;
        // An explicit `resume` is part of the scope, so a retry of the same
        // invocation still continues from the checkpoint.
        let (args, already_processed) = self.checkpoint.resume(scope.clone());
        info!(
            batch_size = args.batch_size,
            limit = args.limit,
            aspect = ?args.aspect_name,
            urn_like = ?args.urn_like,
            start_after = ?args.start_after.as_ref().map(ToString::to_string),
            "Restoring indices"
        );

        let run = paged::drive(
            self.entities.store().as_ref(),
            &args,
            ctx,
            Duration::from_millis(self.config.delay_ms),
            |record| {
                self.entities.restate(ctx.op_context(), ctx.run_id(), record)?;
                Ok(true)
            },
        );
        Ok(run.finish(&self.checkpoint, &scope, already_processed))
    }
}
