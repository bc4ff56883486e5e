//! Aspect Store Client
//!
//! Port over the versioned entity store. The engine only needs point reads and
//! writes of the latest aspect version plus a lazy, ordered paged scan.

pub mod args;
pub mod memory;
pub mod persistence;

pub use args::{RestoreIndicesArgs, ScanCursor, UrnPattern, DEFAULT_BATCH_SIZE};
pub use memory::InMemoryAspectStore;
pub use persistence::SledAspectStore;

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Latest version of one aspect of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AspectRecord {
    pub urn: String,
    pub aspect_name: String,
    pub version: u64,
    pub payload: Value,
    pub created_at_ms: u64,
}

impl AspectRecord {
    pub fn cursor(&self) -> ScanCursor {
        ScanCursor::new(self.urn.clone(), self.aspect_name.clone())
    }
}

/// One page of a scan.
#[derive(Debug, Clone)]
pub struct AspectBatch {
    /// Zero-based position of this batch within the scan.
    pub index: usize,
    pub records: Vec<AspectRecord>,
}

impl AspectBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Aspect store interface
pub trait AspectStore: Send + Sync {
    fn get_aspect(&self, urn: &str, aspect_name: &str) -> Result<Option<AspectRecord>, StoreError>;

    /// Write a new latest version of an aspect and return the stored record.
    fn put_aspect(
        &self,
        urn: &str,
        aspect_name: &str,
        payload: &Value,
    ) -> Result<AspectRecord, StoreError>;

    /// Up to `max` matching records strictly after `after`, in `(urn, aspect)` order.
    fn read_page(
        &self,
        args: &RestoreIndicesArgs,
        after: Option<&ScanCursor>,
        max: usize,
    ) -> Result<Vec<AspectRecord>, StoreError>;

    /// Lazy paged scan described by `args`. Nothing is read until the first
    /// batch is requested.
    fn stream_aspect_batches(&self, args: &RestoreIndicesArgs) -> AspectBatches<'_>;

    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Finite, lazily fetched sequence of batches.
///
/// Honours `batch_size`, `limit` and `start_after` from the descriptor. Stops
/// after the first error.
pub struct AspectBatches<'a> {
    store: &'a dyn AspectStore,
    args: RestoreIndicesArgs,
    cursor: Option<ScanCursor>,
    handed_out: usize,
    next_index: usize,
    done: bool,
}

impl<'a> AspectBatches<'a> {
    pub fn new(store: &'a dyn AspectStore, args: RestoreIndicesArgs) -> Self {
        let cursor = args.start_after.clone();
        Self {
            store,
            args,
            cursor,
            handed_out: 0,
            next_index: 0,
            done: false,
        }
    }
}

impl Iterator for AspectBatches<'_> {
    type Item = Result<AspectBatch, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Err(e) = self.args.validate() {
            self.done = true;
            return Some(Err(e));
        }

        let mut want = self.args.batch_size;
        if self.args.limit > 0 {
            let remaining = self.args.limit.saturating_sub(self.handed_out);
            if remaining == 0 {
                self.done = true;
                return None;
            }
            want = want.min(remaining);
        }

        let records = match self.store.read_page(&self.args, self.cursor.as_ref(), want) {
            Ok(records) => records,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };

        if records.is_empty() {
            self.done = true;
            return None;
        }
        if records.len() < want {
            // Short page: the population is exhausted.
            self.done = true;
        }

        self.handed_out += records.len();
        self.cursor = records.last().map(AspectRecord::cursor);
        let batch = AspectBatch {
            index: self.next_index,
            records,
        };
        self.next_index += 1;
        Some(Ok(batch))
    }
}
