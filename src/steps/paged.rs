//! Paged scan driver shared by the reindex and restore steps.

use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::UpgradeError;
use crate::store::{AspectRecord, AspectStore, RestoreIndicesArgs, ScanCursor};
use crate::upgrade::{Interruption, StepContext, StepResult};

/// Position a failed or interrupted scan got to, kept by the step so the
/// next attempt of the same scan starts after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCheckpoint {
    /// Descriptor the scan was started with, before the checkpoint was applied.
    pub scope: RestoreIndicesArgs,
    pub cursor: ScanCursor,
    /// Records already processed before `cursor`, counted against the limit.
    pub processed: usize,
}

#[derive(Debug, Default)]
pub struct CheckpointSlot(Mutex<Option<ScanCheckpoint>>);

impl CheckpointSlot {
    pub fn get(&self) -> Option<ScanCheckpoint> {
        self.0.lock().clone()
    }

    pub fn set(&self, checkpoint: ScanCheckpoint) {
        *self.0.lock() = Some(checkpoint);
    }

    pub fn clear(&self) {
        *self.0.lock() = None;
    }

    /// Apply a stored checkpoint to a fresh descriptor.
    ///
    /// A checkpoint left by a different scan is discarded: its cursor says
    /// nothing about the population `args` selects.
    pub fn resume(&self, args: RestoreIndicesArgs) -> (RestoreIndicesArgs, usize) {
        let mut slot = self.0.lock();
        let checkpoint = match slot.take() {
            Some(checkpoint) if checkpoint.scope == args => checkpoint,
            Some(stale) => {
                debug!(cursor = %stale.cursor, "Discarding checkpoint of a different scan");
                return (args, 0);
            }
            None => return (args, 0),
        };
        let limit = if args.limit > 0 {
            args.limit.saturating_sub(checkpoint.processed).max(1)
        } else {
            0
        };
        let processed = checkpoint.processed;
        let resumed = args.limit(limit).start_after(Some(checkpoint.cursor.clone()));
        *slot = Some(checkpoint);
        (resumed, processed)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PagedProgress {
    pub batches: usize,
    pub processed: usize,
    /// Records whose handler reported a write or emission.
    pub changed: usize,
    /// Last record fully handled.
    pub cursor: Option<ScanCursor>,
}

#[derive(Debug)]
pub enum PagedStop {
    Interrupted(Interruption),
    Error(UpgradeError),
}

#[derive(Debug)]
pub struct PagedRun {
    pub progress: PagedProgress,
    pub stop: Option<PagedStop>,
}

impl PagedRun {
    /// Record the outcome in `slot` and turn it into a step result.
    ///
    /// `scope` is the descriptor the step built before resuming, so a later
    /// attempt with the same descriptor picks up the checkpoint.
    pub fn finish(
        self,
        slot: &CheckpointSlot,
        scope: &RestoreIndicesArgs,
        already_processed: usize,
    ) -> StepResult {
        let processed = already_processed + self.progress.processed;
        let cursor_text = self
            .progress
            .cursor
            .as_ref()
            .map(ToString::to_string)
            .or_else(|| slot.get().map(|c| c.cursor.to_string()))
            .unwrap_or_else(|| "<start>".to_string());

        match self.stop {
            None => {
                slot.clear();
                StepResult::succeeded(self.progress.changed > 0).with_message(format!(
                    "processed {} records in {} batches, {} changed",
                    processed, self.progress.batches, self.progress.changed
                ))
            }
            Some(stop) => {
                if let Some(cursor) = self.progress.cursor {
                    slot.set(ScanCheckpoint {
                        scope: scope.clone(),
                        cursor,
                        processed,
                    });
                }
                let reason = match stop {
                    PagedStop::Interrupted(interruption) => interruption.to_string(),
                    PagedStop::Error(e) => e.to_string(),
                };
                StepResult::failed(format!(
                    "{} (last committed cursor: {}, {} records processed)",
                    reason, cursor_text, processed
                ))
            }
        }
    }
}

/// Issue one scan for `args` and feed every record to `handle`.
///
/// The handler returns whether it changed anything. Interruption is checked
/// before each batch; `delay` is slept between batches. The limit is enforced
/// here too, so a store that over-delivers is cut off mid-batch.
pub fn drive<F>(
    store: &dyn AspectStore,
    args: &RestoreIndicesArgs,
    ctx: &StepContext<'_>,
    delay: Duration,
    mut handle: F,
) -> PagedRun
where
    F: FnMut(&AspectRecord) -> Result<bool, UpgradeError>,
{
    let mut progress = PagedProgress::default();
    let mut batches = store.stream_aspect_batches(args);

    loop {
        if let Some(interruption) = ctx.interruption() {
            info!(%interruption, processed = progress.processed, "Stopping paged scan");
            return PagedRun {
                progress,
                stop: Some(PagedStop::Interrupted(interruption)),
            };
        }

        let batch = match batches.next() {
            None => break,
            Some(Ok(batch)) => batch,
            Some(Err(e)) => {
                return PagedRun {
                    progress,
                    stop: Some(PagedStop::Error(e.into())),
                }
            }
        };

        debug!(batch = batch.index, records = batch.len(), "Processing batch");
        progress.batches += 1;
        for record in &batch.records {
            if args.limit > 0 && progress.processed >= args.limit {
                break;
            }
            match handle(record) {
                Ok(changed) => {
                    if changed {
                        progress.changed += 1;
                    }
                    progress.processed += 1;
                    progress.cursor = Some(record.cursor());
                }
                Err(e) => {
                    return PagedRun {
                        progress,
                        stop: Some(PagedStop::Error(e)),
                    }
                }
            }
        }

        if args.limit > 0 && progress.processed >= args.limit {
            break;
        }
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }

    PagedRun {
        progress,
        stop: None,
    }
}
