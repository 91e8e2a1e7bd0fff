//! Raw Record Source: the boundary to the on-disk snapshot decoder.
//!
//! Decoding the desktop app's page format is somebody else's job. This
//! module only fixes the contract the rest of the crate consumes:
//! open a snapshot, list its stores, and iterate `(key, value)` byte pairs
//! per store. Values are the decoder's JSON rendering of one stored object.
//!
//! Two implementations ship with the crate:
//!
//! | Source | Layout |
//! |--------|--------|
//! | [`JsonlSource`] | a directory of `<store>.jsonl` files, one `{"key", "value"}` per line |
//! | [`MemorySource`] | in-process stores, for tests and embedding |

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{LinearError, LinearResult};

/// One raw key/value entry of a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl RawRecord {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Build a record whose value is the JSON encoding of `value`.
    pub fn from_json(key: impl Into<Vec<u8>>, value: &Value) -> Self {
        Self {
            key: key.into(),
            value: value.to_string().into_bytes(),
        }
    }
}

/// Lazy, finite record sequence. Individual items may fail without ending
/// the iteration.
pub type RecordIter<'a> = Box<dyn Iterator<Item = LinearResult<RawRecord>> + Send + 'a>;

/// Opens snapshots.
pub trait RecordSource: Send + Sync {
    /// Open the snapshot at `path`. Fails with `SourceUnavailable` when the
    /// path is missing or unreadable.
    fn open(&self, path: &Path) -> LinearResult<Box<dyn SnapshotHandle>>;
}

/// An opened snapshot.
pub trait SnapshotHandle: Send {
    fn list_stores(&self) -> LinearResult<Vec<String>>;

    /// Iterate one store from the beginning. Restartable: every call starts
    /// a fresh pass.
    fn iterate(&self, store: &str) -> LinearResult<RecordIter<'_>>;
}

/// Internal bookkeeping stores of the host database are never entity stores.
pub fn is_ignored_store(name: &str) -> bool {
    name.is_empty() || name.starts_with('_') || name.contains("_partial")
}

// ============ JSONL directory snapshot ============

/// Reads a snapshot exported as one `<store>.jsonl` file per store.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonlSource;

struct JsonlHandle {
    root: PathBuf,
}

#[derive(Deserialize)]
struct JsonlLine {
    key: Value,
    value: Value,
}

impl RecordSource for JsonlSource {
    fn open(&self, path: &Path) -> LinearResult<Box<dyn SnapshotHandle>> {
        if !path.exists() {
            return Err(LinearError::SourceUnavailable(format!(
                "snapshot not found at {}. Make sure Linear has been opened at least once.",
                path.display()
            )));
        }
        if !path.is_dir() {
            return Err(LinearError::SourceUnavailable(format!(
                "snapshot path is not a directory: {}",
                path.display()
            )));
        }
        Ok(Box::new(JsonlHandle {
            root: path.to_path_buf(),
        }))
    }
}

impl SnapshotHandle for JsonlHandle {
    fn list_stores(&self) -> LinearResult<Vec<String>> {
        let entries = std::fs::read_dir(&self.root).map_err(|e| {
            LinearError::SourceUnavailable(format!("cannot list {}: {}", self.root.display(), e))
        })?;

        let mut stores = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| LinearError::SourceUnavailable(e.to_string()))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                stores.push(stem.to_string());
            }
        }
        stores.sort();
        Ok(stores)
    }

    fn iterate(&self, store: &str) -> LinearResult<RecordIter<'_>> {
        let path = self.root.join(format!("{}.jsonl", store));
        let file = File::open(&path).map_err(|e| {
            LinearError::SourceUnavailable(format!("cannot open store '{}': {}", store, e))
        })?;
        let reader = BufReader::new(file);

        let iter = reader
            .lines()
            .enumerate()
            .filter(|(_, line)| line.as_ref().map(|l| !l.trim().is_empty()).unwrap_or(true))
            .map(|(lineno, line)| -> LinearResult<RawRecord> {
                let line = line.map_err(|e| LinearError::Decode(format!("line {}: {}", lineno + 1, e)))?;
                let parsed: JsonlLine = serde_json::from_str(&line)
                    .map_err(|e| LinearError::Decode(format!("line {}: {}", lineno + 1, e)))?;
                let key = match parsed.key {
                    Value::String(s) => s.into_bytes(),
                    other => other.to_string().into_bytes(),
                };
                Ok(RawRecord {
                    key,
                    value: parsed.value.to_string().into_bytes(),
                })
            });
        Ok(Box::new(iter))
    }
}

// ============ In-memory source ============

/// In-process snapshot. The `open` path is ignored.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    stores: Arc<BTreeMap<String, Vec<RawRecord>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(mut self, name: impl Into<String>, records: Vec<RawRecord>) -> Self {
        Arc::make_mut(&mut self.stores).insert(name.into(), records);
        self
    }

    /// Add a store of JSON objects, keyed by their `id` field (or position).
    pub fn with_json_store(self, name: impl Into<String>, values: Vec<Value>) -> Self {
        let records = values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let key = v
                    .get("id")
                    .and_then(|id| id.as_str())
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| i.to_string());
                RawRecord::from_json(key, v)
            })
            .collect();
        self.with_store(name, records)
    }
}

struct MemoryHandle {
    stores: Arc<BTreeMap<String, Vec<RawRecord>>>,
}

impl RecordSource for MemorySource {
    fn open(&self, _path: &Path) -> LinearResult<Box<dyn SnapshotHandle>> {
        Ok(Box::new(MemoryHandle {
            stores: self.stores.clone(),
        }))
    }
}

impl SnapshotHandle for MemoryHandle {
    fn list_stores(&self) -> LinearResult<Vec<String>> {
        Ok(self.stores.keys().cloned().collect())
    }

    fn iterate(&self, store: &str) -> LinearResult<RecordIter<'_>> {
        let records = self
            .stores
            .get(store)
            .ok_or_else(|| LinearError::SourceUnavailable(format!("no such store: {}", store)))?;
        Ok(Box::new(records.iter().cloned().map(Ok)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ignored_store_names() {
        assert!(is_ignored_store("_meta"));
        assert!(is_ignored_store("a1b2_partial"));
        assert!(!is_ignored_store("3f9c0e"));
    }

    #[test]
    fn test_jsonl_missing_path_is_unavailable() {
        let err = JsonlSource
            .open(Path::new("/definitely/not/here"))
            .err()
            .unwrap();
        assert_eq!(err.kind(), "source_unavailable");
    }

    #[test]
    fn test_jsonl_lists_and_iterates_stores() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("teams.jsonl"),
            "{\"key\":\"t1\",\"value\":{\"id\":\"t1\",\"key\":\"ENG\"}}\n\nnot json\n",
        )
        .unwrap();
        std::fs::write(tmp.path().join("README.txt"), "ignored").unwrap();

        let handle = JsonlSource.open(tmp.path()).unwrap();
        assert_eq!(handle.list_stores().unwrap(), vec!["teams".to_string()]);

        let items: Vec<_> = handle.iterate("teams").unwrap().collect();
        assert_eq!(items.len(), 2);
        let first = items[0].as_ref().unwrap();
        assert_eq!(first.key, b"t1");
        let value: Value = serde_json::from_slice(&first.value).unwrap();
        assert_eq!(value["key"], "ENG");
        assert!(items[1].is_err());

        // Restartable.
        assert_eq!(handle.iterate("teams").unwrap().count(), 2);
    }

    #[test]
    fn test_memory_source_keys_by_id() {
        let source =
            MemorySource::new().with_json_store("users", vec![json!({"id": "u1"}), json!({})]);
        let handle = source.open(Path::new("")).unwrap();
        let keys: Vec<Vec<u8>> = handle
            .iterate("users")
            .unwrap()
            .map(|r| r.unwrap().key)
            .collect();
        assert_eq!(keys, vec![b"u1".to_vec(), b"1".to_vec()]);
        assert!(handle.iterate("missing").is_err());
    }
}
