//! In-memory aspect store with call recording and fault injection.

use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::error::StoreError;
use crate::store::{AspectBatches, AspectRecord, AspectStore, RestoreIndicesArgs, ScanCursor};
use crate::types::now_millis;

type AspectKey = (String, String);

#[derive(Default)]
struct Faults {
    failing_write_urns: HashSet<String>,
    failing_read_calls: HashSet<usize>,
}

/// BTreeMap-backed store. Keeps every scan descriptor it was handed so callers
/// can verify exactly how it was queried.
#[derive(Default)]
pub struct InMemoryAspectStore {
    aspects: RwLock<BTreeMap<AspectKey, AspectRecord>>,
    scan_calls: Mutex<Vec<RestoreIndicesArgs>>,
    read_calls: Mutex<usize>,
    write_count: Mutex<usize>,
    faults: Mutex<Faults>,
}

impl InMemoryAspectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record directly, bypassing write accounting.
    pub fn seed(&self, urn: &str, aspect_name: &str, payload: Value) {
        let record = AspectRecord {
            urn: urn.to_string(),
            aspect_name: aspect_name.to_string(),
            version: 1,
            payload,
            created_at_ms: now_millis(),
        };
        self.aspects
            .write()
            .insert((urn.to_string(), aspect_name.to_string()), record);
    }

    /// Descriptors passed to `stream_aspect_batches`, in call order.
    pub fn scan_calls(&self) -> Vec<RestoreIndicesArgs> {
        self.scan_calls.lock().clone()
    }

    pub fn read_page_calls(&self) -> usize {
        *self.read_calls.lock()
    }

    pub fn write_count(&self) -> usize {
        *self.write_count.lock()
    }

    pub fn len(&self) -> usize {
        self.aspects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.aspects.read().is_empty()
    }

    /// Every write to an aspect of `urn` fails until faults are cleared.
    pub fn fail_writes_for(&self, urn: &str) {
        self.faults.lock().failing_write_urns.insert(urn.to_string());
    }

    /// The `call_index`-th `read_page` call (zero-based, counted over the
    /// store's lifetime) fails.
    pub fn fail_read_call(&self, call_index: usize) {
        self.faults.lock().failing_read_calls.insert(call_index);
    }

    pub fn clear_faults(&self) {
        *self.faults.lock() = Faults::default();
    }
}

impl AspectStore for InMemoryAspectStore {
    fn get_aspect(&self, urn: &str, aspect_name: &str) -> Result<Option<AspectRecord>, StoreError> {
        Ok(self
            .aspects
            .read()
            .get(&(urn.to_string(), aspect_name.to_string()))
            .cloned())
    }

    fn put_aspect(
        &self,
        urn: &str,
        aspect_name: &str,
        payload: &Value,
    ) -> Result<AspectRecord, StoreError> {
        if self.faults.lock().failing_write_urns.contains(urn) {
            return Err(StoreError::Unavailable(format!(
                "injected write failure for {}",
                urn
            )));
        }
        let key = (urn.to_string(), aspect_name.to_string());
        let mut aspects = self.aspects.write();
        let version = aspects.get(&key).map(|r| r.version + 1).unwrap_or(1);
        let record = AspectRecord {
            urn: urn.to_string(),
            aspect_name: aspect_name.to_string(),
            version,
            payload: payload.clone(),
            created_at_ms: now_millis(),
        };
        aspects.insert(key, record.clone());
        *self.write_count.lock() += 1;
        Ok(record)
    }

    fn read_page(
        &self,
        args: &RestoreIndicesArgs,
        after: Option<&ScanCursor>,
        max: usize,
    ) -> Result<Vec<AspectRecord>, StoreError> {
        let call_index = {
            let mut calls = self.read_calls.lock();
            let index = *calls;
            *calls += 1;
            index
        };
        if self.faults.lock().failing_read_calls.contains(&call_index) {
            return Err(StoreError::Unavailable(format!(
                "injected read failure on call {}",
                call_index
            )));
        }

        let pattern = args.urn_pattern();
        let prefix = pattern.literal_prefix();
        let lower = match after {
            Some(c) => Bound::Excluded((c.urn.clone(), c.aspect_name.clone())),
            None => Bound::Included((prefix.clone(), String::new())),
        };

        let aspects = self.aspects.read();
        let page = aspects
            .range((lower, Bound::Unbounded))
            .map(|(_, record)| record)
            .take_while(|record| record.urn.starts_with(&prefix) || record.urn < prefix)
            .filter(|record| args.matches(&record.urn, &record.aspect_name))
            .take(max)
            .cloned()
            .collect();
        Ok(page)
    }

    fn stream_aspect_batches(&self, args: &RestoreIndicesArgs) -> AspectBatches<'_> {
        self.scan_calls.lock().push(args.clone());
        AspectBatches::new(self, args.clone())
    }
}
