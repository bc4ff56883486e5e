//! Persistence layer for the aspect store

use std::ops::Bound;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;
use crate::store::{AspectBatches, AspectRecord, AspectStore, RestoreIndicesArgs, ScanCursor};
use crate::types::now_millis;

const TREE_ASPECTS: &str = "aspects_v1";
const KEY_SEPARATOR: u8 = 0;

/// On-disk envelope. Payloads are kept as JSON text because bincode cannot
/// decode self-describing `serde_json::Value`s.
#[derive(Debug, Serialize, Deserialize)]
struct StoredAspect {
    version: u64,
    payload: String,
    created_at_ms: u64,
}

/// Sled-based implementation of AspectStore
///
/// Keys are `urn 0x00 aspect`, so iteration order is `(urn, aspect)` order and
/// a scan cursor maps directly onto a key.
pub struct SledAspectStore {
    db: sled::Db,
    aspects: sled::Tree,
}

impl SledAspectStore {
    /// Open (or create) a store at the given directory
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| {
            StoreError::Unavailable(format!("Failed to open sled database: {}", e))
        })?;
        Self::from_db(db)
    }

    pub fn from_db(db: sled::Db) -> Result<Self, StoreError> {
        let aspects = db.open_tree(TREE_ASPECTS)?;
        Ok(Self { db, aspects })
    }

    /// Get the underlying sled database (for advanced operations)
    pub fn db(&self) -> &sled::Db {
        &self.db
    }

    fn encode_key(urn: &str, aspect_name: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(urn.len() + aspect_name.len() + 1);
        key.extend_from_slice(urn.as_bytes());
        key.push(KEY_SEPARATOR);
        key.extend_from_slice(aspect_name.as_bytes());
        key
    }

    fn decode_record(key: &[u8], value: &[u8]) -> Result<AspectRecord, StoreError> {
        let split = key
            .iter()
            .position(|b| *b == KEY_SEPARATOR)
            .ok_or_else(|| StoreError::Corrupt {
                urn: String::from_utf8_lossy(key).to_string(),
                aspect: String::new(),
                reason: "missing key separator".to_string(),
            })?;
        let urn = String::from_utf8_lossy(&key[..split]).to_string();
        let aspect_name = String::from_utf8_lossy(&key[split + 1..]).to_string();

        let stored: StoredAspect = bincode::deserialize(value).map_err(|e| StoreError::Corrupt {
            urn: urn.clone(),
            aspect: aspect_name.clone(),
            reason: format!("Failed to deserialize aspect envelope: {}", e),
        })?;
        let payload = serde_json::from_str(&stored.payload).map_err(|e| StoreError::Corrupt {
            urn: urn.clone(),
            aspect: aspect_name.clone(),
            reason: format!("Failed to parse aspect payload: {}", e),
        })?;

        Ok(AspectRecord {
            urn,
            aspect_name,
            version: stored.version,
            payload,
            created_at_ms: stored.created_at_ms,
        })
    }
}

impl AspectStore for SledAspectStore {
    fn get_aspect(&self, urn: &str, aspect_name: &str) -> Result<Option<AspectRecord>, StoreError> {
        let key = Self::encode_key(urn, aspect_name);
        match self.aspects.get(&key)? {
            Some(value) => Ok(Some(Self::decode_record(&key, &value)?)),
            None => Ok(None),
        }
    }

    fn put_aspect(
        &self,
        urn: &str,
        aspect_name: &str,
        payload: &Value,
    ) -> Result<AspectRecord, StoreError> {
        let key = Self::encode_key(urn, aspect_name);
        let payload_text = serde_json::to_string(payload).map_err(|e| StoreError::Corrupt {
            urn: urn.to_string(),
            aspect: aspect_name.to_string(),
            reason: format!("Failed to serialize aspect payload: {}", e),
        })?;
        let created_at_ms = now_millis();

        // Compare-and-swap loop so concurrent writers never reuse a version.
        loop {
            let current = self.aspects.get(&key)?;
            let version = match &current {
                Some(raw) => Self::decode_record(&key, raw)?.version + 1,
                None => 1,
            };
            let stored = StoredAspect {
                version,
                payload: payload_text.clone(),
                created_at_ms,
            };
            let encoded = bincode::serialize(&stored).map_err(|e| StoreError::Corrupt {
                urn: urn.to_string(),
                aspect: aspect_name.to_string(),
                reason: format!("Failed to serialize aspect envelope: {}", e),
            })?;
            match self.aspects.compare_and_swap(&key, current, Some(encoded))? {
                Ok(()) => {
                    return Ok(AspectRecord {
                        urn: urn.to_string(),
                        aspect_name: aspect_name.to_string(),
                        version,
                        payload: payload.clone(),
                        created_at_ms,
                    })
                }
                Err(_) => continue,
            }
        }
    }

    fn read_page(
        &self,
        args: &RestoreIndicesArgs,
        after: Option<&ScanCursor>,
        max: usize,
    ) -> Result<Vec<AspectRecord>, StoreError> {
        let prefix = args.urn_pattern().literal_prefix();
        let lower = match after {
            Some(cursor) => Bound::Excluded(Self::encode_key(&cursor.urn, &cursor.aspect_name)),
            None => Bound::Included(prefix.as_bytes().to_vec()),
        };

        let mut page = Vec::with_capacity(max.min(1024));
        for item in self.aspects.range::<Vec<u8>, _>((lower, Bound::Unbounded)) {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) && &key[..] > prefix.as_bytes() {
                break;
            }
            let record = Self::decode_record(&key, &value)?;
            if !args.matches(&record.urn, &record.aspect_name) {
                continue;
            }
            page.push(record);
            if page.len() >= max {
                break;
            }
        }
        Ok(page)
    }

    fn stream_aspect_batches(&self, args: &RestoreIndicesArgs) -> AspectBatches<'_> {
        AspectBatches::new(self, args.clone())
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}
