//! Rebuilds the column-level lineage edges of every data job.
//!
//! Scans `dataJobInputOutput` aspects of `urn:li:dataJob:%` entities and writes
//! the derived `dataJobLineageEdges` aspect for each, through the write path so
//! that graph consumers receive a change-log event per job.

use std::collections::BTreeSet;
use std::time::Duration;

use serde_json::{json, Value};

use crate::config::ReindexConfig;
use crate::entity::{EntityService, WriteMode};
use crate::error::{StoreError, UpgradeError};
use crate::steps::paged::{self, CheckpointSlot};
use crate::store::{AspectRecord, RestoreIndicesArgs};
use crate::upgrade::{StepContext, StepResult, UpgradeStep};

pub const STEP_ID: &str = "ReindexDataJobViaNodesCll";
pub const DATA_JOB_INPUT_OUTPUT_ASPECT: &str = "dataJobInputOutput";
pub const DATA_JOB_LINEAGE_EDGES_ASPECT: &str = "dataJobLineageEdges";
pub const DATA_JOB_URN_PATTERN: &str = "urn:li:dataJob:%";

pub struct ReindexDataJobViaNodesCll {
    config: ReindexConfig,
    entities: EntityService,
    checkpoint: CheckpointSlot,
}

impl ReindexDataJobViaNodesCll {
    pub fn new(config: ReindexConfig, entities: EntityService) -> Self {
        Self {
            config,
            entities,
            checkpoint: CheckpointSlot::default(),
        }
    }

    /// The scan this step issues on a fresh run.
    pub fn args(&self) -> RestoreIndicesArgs {
        RestoreIndicesArgs::new()
            .batch_size(self.config.batch_size)
            .limit(self.config.limit)
            .aspect_name(DATA_JOB_INPUT_OUTPUT_ASPECT)
            .urn_like(DATA_JOB_URN_PATTERN)
    }
}

impl UpgradeStep for ReindexDataJobViaNodesCll {
    fn id(&self) -> &str {
        STEP_ID
    }

    fn retryable(&self) -> bool {
        true
    }

    fn skip(&self, _ctx: &StepContext<'_>) -> Option<String> {
        (!self.config.enabled).then(|| "disabled by configuration".to_string())
    }

    fn execute(&self, ctx: &StepContext<'_>) -> Result<StepResult, UpgradeError> {
        if self.config.batch_size == 0 {
            return Err(UpgradeError::ConfigurationDefect(
                "reindex batch_size must be positive".to_string(),
            ));
        }

        let scope = self.args();
        let (args, already_processed) = self.checkpoint.resume(scope.clone());
        let mode = if self.config.restate_derived {
            WriteMode::Always
        } else {
            WriteMode::IfChanged
        };

        let run = paged::drive(
            self.entities.store().as_ref(),
            &args,
            ctx,
            Duration::from_millis(self.config.delay_ms),
            |record| {
                let edges = derive_lineage_edges(record)?;
                let outcome = self.entities.ingest(
                    ctx.op_context(),
                    ctx.run_id(),
                    &record.urn,
                    DATA_JOB_LINEAGE_EDGES_ASPECT,
                    &edges,
                    mode,
                )?;
                Ok(outcome.written())
            },
        );
        Ok(run.finish(&self.checkpoint, &scope, already_processed))
    }
}

/// Derive the lineage edge set from a `dataJobInputOutput` record.
///
/// Dataset lists are sorted and deduplicated so the result only depends on the
/// set of edges, not on their order in the source aspect.
pub fn derive_lineage_edges(record: &AspectRecord) -> Result<Value, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        urn: record.urn.clone(),
        aspect: record.aspect_name.clone(),
        reason,
    };

    let payload = record
        .payload
        .as_object()
        .ok_or_else(|| corrupt("payload is not an object".to_string()))?;

    let upstreams = string_set(payload.get("inputDatasets"), "inputDatasets").map_err(corrupt)?;
    let downstreams =
        string_set(payload.get("outputDatasets"), "outputDatasets").map_err(corrupt)?;

    let mut column_edges = BTreeSet::new();
    if let Some(lineages) = payload.get("fineGrainedLineages") {
        let lineages = lineages
            .as_array()
            .ok_or_else(|| corrupt("fineGrainedLineages is not a list".to_string()))?;
        for lineage in lineages {
            let from = string_set(lineage.get("upstreams"), "upstreams").map_err(corrupt)?;
            let to = string_set(lineage.get("downstreams"), "downstreams").map_err(corrupt)?;
            let operation = lineage
                .get("transformOperation")
                .and_then(Value::as_str)
                .map(str::to_string);
            for upstream in &from {
                for downstream in &to {
                    column_edges.insert((upstream.clone(), downstream.clone(), operation.clone()));
                }
            }
        }
    }

    let column_edges: Vec<Value> = column_edges
        .into_iter()
        .map(|(upstream, downstream, operation)| {
            let mut edge = json!({"upstream": upstream, "downstream": downstream});
            if let Some(operation) = operation {
                edge["transformOperation"] = Value::String(operation);
            }
            edge
        })
        .collect();

    Ok(json!({
        "upstreamDatasets": upstreams,
        "downstreamDatasets": downstreams,
        "columnEdges": column_edges,
    }))
}

fn string_set(value: Option<&Value>, field: &str) -> Result<BTreeSet<String>, String> {
    let Some(value) = value else {
        return Ok(BTreeSet::new());
    };
    let items = value
        .as_array()
        .ok_or_else(|| format!("{} is not a list", field))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| format!("{} contains a non-string entry", field))
        })
        .collect()
}
