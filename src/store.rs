//! Snapshot persistence.
//!
//! A [`SnapshotStore`] is a flat string key-value store. Each source is saved
//! as its own entry under a namespaced key, and the aggregate under a single
//! key, so a corrupt entry costs one source rather than the whole session.
//!
//! ```text
//! nodewatch_node_source2  → {"id":"source2","online":true,...}
//! nodewatch_node_source3  → {...}
//! nodewatch_aggregate     → {"online":true,"statusText":"average of 2 active sources",...}
//! ```

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::data::{AggregateSnapshot, Aggregator, NodeRegistry, SourceSnapshot};

/// Prefix of every key written by the dashboard.
pub const KEY_PREFIX: &str = "nodewatch_";
/// Prefix of per-source keys.
pub const NODE_KEY_PREFIX: &str = "nodewatch_node_";
/// Key of the aggregate snapshot.
pub const AGGREGATE_KEY: &str = "nodewatch_aggregate";

const FILE_EXTENSION: &str = "json";

/// Errors from a snapshot store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid store key: {0:?}")]
    InvalidKey(String),
}

/// Key of a source snapshot.
///
/// Ids are escaped to the `[A-Za-z0-9-]` charset: any other byte, `_`
/// included, becomes `_` plus two hex digits, so distinct ids never share a
/// key.
pub fn node_key(id: &str) -> String {
    let mut key = String::from(NODE_KEY_PREFIX);
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            key.push(byte as char);
        } else {
            key.push_str(&format!("_{:02x}", byte));
        }
    }
    key
}

/// Flat key-value storage surviving restarts.
pub trait SnapshotStore: Send + Debug {
    /// Read an entry. Missing entries are `Ok(None)`.
    fn load(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write an entry, replacing any previous value.
    fn save(&mut self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Delete an entry. Deleting a missing entry is not an error.
    fn remove(&mut self, key: &str) -> Result<(), StoreError>;

    /// Every stored key.
    fn keys(&self) -> Result<Vec<String>, StoreError>;
}

/// In-memory store, for tests and sessions without a state directory.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn save(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries.keys().cloned().collect())
    }
}

/// Directory-backed store: one `<key>.json` file per entry.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Use `dir` for storage. The directory is created on first write.
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.{}", key, FILE_EXTENSION)))
    }
}

impl SnapshotStore for FileStore {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path_for(key)?) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.dir)?;
        // Write then rename so a crash never leaves a half-written entry
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Everything restored from a store.
#[derive(Debug, Clone, Default)]
pub struct Restored {
    pub sources: Vec<SourceSnapshot>,
    pub aggregate: Option<AggregateSnapshot>,
    /// Corrupt entries that were discarded.
    pub discarded: usize,
}

/// Outcome of [`save_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub written: usize,
    pub failed: usize,
}

impl SaveReport {
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Write every source and the aggregate.
///
/// Each entry is written on its own: a failure is logged and counted, and
/// the remaining entries are still written.
pub fn save_all(
    store: &mut dyn SnapshotStore,
    registry: &NodeRegistry,
    aggregator: &Aggregator,
) -> SaveReport {
    let mut report = SaveReport::default();

    let entries = registry
        .snapshot_all()
        .into_iter()
        .map(|snapshot| (node_key(&snapshot.id), serde_json::to_string(&snapshot)))
        .chain(std::iter::once((
            AGGREGATE_KEY.to_string(),
            serde_json::to_string(&aggregator.snapshot()),
        )));

    for (key, value) in entries {
        let result = value
            .map_err(StoreError::from)
            .and_then(|value| store.save(&key, &value));
        match result {
            Ok(()) => report.written += 1,
            Err(e) => {
                warn!(key = %key, error = %e, "failed to save snapshot");
                report.failed += 1;
            }
        }
    }

    debug!(written = report.written, failed = report.failed, "snapshots saved");
    report
}

/// Read every snapshot, discarding corrupt entries.
///
/// A corrupt entry is logged, removed from the store and treated as absent.
pub fn load_all(store: &mut dyn SnapshotStore) -> Result<Restored, StoreError> {
    let mut restored = Restored::default();

    for key in store.keys()? {
        if !key.starts_with(NODE_KEY_PREFIX) {
            continue;
        }
        let Some(raw) = store.load(&key)? else {
            continue;
        };
        match serde_json::from_str::<SourceSnapshot>(&raw) {
            Ok(snapshot) => restored.sources.push(snapshot),
            Err(e) => {
                discard(store, &key, &e);
                restored.discarded += 1;
            }
        }
    }

    if let Some(raw) = store.load(AGGREGATE_KEY)? {
        match serde_json::from_str::<AggregateSnapshot>(&raw) {
            Ok(snapshot) => restored.aggregate = Some(snapshot),
            Err(e) => {
                discard(store, AGGREGATE_KEY, &e);
                restored.discarded += 1;
            }
        }
    }

    Ok(restored)
}

fn discard(store: &mut dyn SnapshotStore, key: &str, error: &serde_json::Error) {
    warn!(key = %key, error = %error, "discarding corrupt snapshot");
    if let Err(e) = store.remove(key) {
        warn!(key = %key, error = %e, "failed to remove corrupt snapshot");
    }
}

/// Delete every dashboard entry. Returns the number removed.
pub fn clear_all(store: &mut dyn SnapshotStore) -> Result<usize, StoreError> {
    let keys: Vec<String> = store
        .keys()?
        .into_iter()
        .filter(|k| k.starts_with(KEY_PREFIX))
        .collect();
    for key in &keys {
        store.remove(key)?;
    }
    Ok(keys.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{normalize, SeriesPoint, SourceRole};
    use serde_json::json;
    use std::time::Duration;

    fn populated() -> (NodeRegistry, Aggregator) {
        let mut registry = NodeRegistry::new(Duration::from_secs(3), 100);
        for (t, lux) in [(0u64, 100), (1_000, 110), (2_000, 120)] {
            let metrics = normalize(json!({"lux": lux}).as_object().unwrap(), SourceRole::Sensor);
            registry.ingest("source2", metrics, false, t);
        }
        let mut aggregator = Aggregator::new(Duration::from_secs(3), 100);
        aggregator.recompute(&registry, 2_000);
        (registry, aggregator)
    }

    /// Rejects writes to keys containing `blocked`.
    #[derive(Debug, Default)]
    struct FailingStore {
        inner: MemoryStore,
        blocked: &'static str,
    }

    impl SnapshotStore for FailingStore {
        fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.load(key)
        }

        fn save(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
            if key.contains(self.blocked) {
                return Err(StoreError::InvalidKey(key.to_string()));
            }
            self.inner.save(key, value)
        }

        fn remove(&mut self, key: &str) -> Result<(), StoreError> {
            self.inner.remove(key)
        }

        fn keys(&self) -> Result<Vec<String>, StoreError> {
            self.inner.keys()
        }
    }

    #[test]
    fn test_node_key_namespace() {
        assert_eq!(node_key("source7"), "nodewatch_node_source7");
        assert_eq!(node_key("node.2"), "nodewatch_node_node_2e2");
        assert_eq!(node_key("a_b"), "nodewatch_node_a_5fb");
        assert_ne!(node_key("a.b"), node_key("a_2eb"));
    }

    #[test]
    fn test_failed_entry_does_not_stop_flush() {
        let (mut registry, mut aggregator) = populated();
        let metrics = normalize(json!({"lux": 90}).as_object().unwrap(), SourceRole::Sensor);
        registry.ingest("source3", metrics, false, 2_000);
        aggregator.recompute(&registry, 2_000);

        let mut store = FailingStore {
            blocked: "source2",
            ..FailingStore::default()
        };
        let report = save_all(&mut store, &registry, &aggregator);
        assert_eq!(report, SaveReport { written: 2, failed: 1 });
        assert!(!report.is_complete());
        assert!(store.load(&node_key("source3")).unwrap().is_some());
        assert!(store.load(AGGREGATE_KEY).unwrap().is_some());
    }

    #[test]
    fn test_file_store_accepts_dotted_ids() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = NodeRegistry::new(Duration::from_secs(3), 10);
        let metrics = normalize(json!({"lux": 1}).as_object().unwrap(), SourceRole::Sensor);
        registry.ingest("node.2", metrics, false, 0);
        let aggregator = Aggregator::new(Duration::from_secs(3), 10);

        let mut store = FileStore::new(dir.path());
        assert!(save_all(&mut store, &registry, &aggregator).is_complete());

        let restored = load_all(&mut store).unwrap();
        assert_eq!(restored.sources[0].id, "node.2");
        assert!(restored.aggregate.is_some());
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let (registry, aggregator) = populated();
        let mut store = MemoryStore::new();
        let report = save_all(&mut store, &registry, &aggregator);
        assert_eq!(report, SaveReport { written: 2, failed: 0 });

        let restored = load_all(&mut store).unwrap();
        assert_eq!(restored.sources.len(), 1);
        assert_eq!(restored.discarded, 0);
        assert_eq!(
            restored.sources[0].series["lux"],
            vec![
                SeriesPoint::new(0, 100.0),
                SeriesPoint::new(1_000, 110.0),
                SeriesPoint::new(2_000, 120.0),
            ]
        );
        assert_eq!(restored.aggregate.unwrap().active_count, 1);
    }

    #[test]
    fn test_corrupt_entries_discarded() {
        let (registry, aggregator) = populated();
        let mut store = MemoryStore::new();
        save_all(&mut store, &registry, &aggregator);
        store.save(&node_key("source9"), "{not json").unwrap();
        store.save(AGGREGATE_KEY, "[]").unwrap();

        let restored = load_all(&mut store).unwrap();
        assert_eq!(restored.sources.len(), 1);
        assert!(restored.aggregate.is_none());
        assert_eq!(restored.discarded, 2);
        assert_eq!(store.load(&node_key("source9")).unwrap(), None);
        assert_eq!(store.load(AGGREGATE_KEY).unwrap(), None);
    }

    #[test]
    fn test_foreign_keys_untouched() {
        let mut store = MemoryStore::new();
        store.save("other_app_setting", "1").unwrap();
        store.save(&node_key("source2"), "{}").unwrap();

        assert_eq!(clear_all(&mut store).unwrap(), 1);
        assert_eq!(store.keys().unwrap(), vec!["other_app_setting".to_string()]);
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, aggregator) = populated();

        let mut store = FileStore::new(dir.path().join("state"));
        assert!(store.keys().unwrap().is_empty());
        save_all(&mut store, &registry, &aggregator);

        assert!(dir.path().join("state/nodewatch_node_source2.json").exists());
        assert_eq!(
            store.keys().unwrap(),
            vec!["nodewatch_aggregate".to_string(), "nodewatch_node_source2".to_string()]
        );

        let reopened = FileStore::new(dir.path().join("state"));
        let mut reopened: Box<dyn SnapshotStore> = Box::new(reopened);
        let restored = load_all(reopened.as_mut()).unwrap();
        assert_eq!(restored.sources[0].id, "source2");
        assert!(restored.sources[0].liveness.online);
    }

    #[test]
    fn test_file_store_missing_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(dir.path());
        assert_eq!(store.load("nodewatch_aggregate").unwrap(), None);
        store.remove("nodewatch_aggregate").unwrap();

        store.save("nodewatch_aggregate", "{}").unwrap();
        assert_eq!(store.load("nodewatch_aggregate").unwrap().as_deref(), Some("{}"));
        store.remove("nodewatch_aggregate").unwrap();
        assert!(store.keys().unwrap().is_empty());
    }

    #[test]
    fn test_file_store_rejects_path_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(dir.path());
        assert!(matches!(
            store.save("../escape", "x"),
            Err(StoreError::InvalidKey(_))
        ));
    }
}
