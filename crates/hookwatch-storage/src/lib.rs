use chrono::{DateTime, Utc};
use hookwatch_core::{Diagnostic, NormalizedRecord, SeverityCounts};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_CAPACITY: usize = 100;
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("snapshot io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("unsupported snapshot version {found}, max supported {supported}")]
    UnsupportedSnapshotVersion { found: u32, supported: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted { evicted: usize },
    Merged { kept_diagnostic: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    NoSnapshot,
    Loaded { records: usize, dropped: usize },
    StartedEmpty { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreInfo {
    pub count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_bytes: Option<u64>,
    pub severity: SeverityCounts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub newest_received_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotDocument {
    version: u32,
    saved_at: DateTime<Utc>,
    records: Vec<NormalizedRecord>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotRef<'a> {
    version: u32,
    saved_at: DateTime<Utc>,
    records: &'a VecDeque<NormalizedRecord>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotOnDisk {
    Document(SnapshotDocument),
    Bare(Vec<NormalizedRecord>),
}

/// Insertion-ordered records keyed by id. Every mutation rewrites the
/// snapshot; a failed rewrite keeps the in-memory change and returns the
/// error so the caller can report it.
#[derive(Debug)]
pub struct RecordStore {
    records: VecDeque<NormalizedRecord>,
    capacity: Option<usize>,
    snapshot_path: Option<PathBuf>,
}

impl RecordStore {
    pub fn in_memory(capacity: Option<usize>) -> Self {
        Self {
            records: VecDeque::new(),
            capacity: capacity.filter(|value| *value > 0),
            snapshot_path: None,
        }
    }

    pub fn open(path: impl AsRef<Path>, capacity: Option<usize>) -> (Self, LoadOutcome) {
        let mut store = Self {
            records: VecDeque::new(),
            capacity: capacity.filter(|value| *value > 0),
            snapshot_path: Some(path.as_ref().to_path_buf()),
        };
        let outcome = store.durable_reload();
        (store, outcome)
    }

    /// Replaces the in-memory view with the last snapshot. Never fails: an
    /// unreadable snapshot leaves the store empty.
    pub fn durable_reload(&mut self) -> LoadOutcome {
        self.records.clear();
        let Some(path) = self.snapshot_path.clone() else {
            return LoadOutcome::NoSnapshot;
        };
        if !path.exists() {
            info!(event = "snapshot_missing", path = %path.display());
            return LoadOutcome::NoSnapshot;
        }

        match read_snapshot(&path) {
            Ok(records) => {
                let total = records.len();
                self.records = records.into();
                let dropped = self.evict_overflow();
                info!(
                    event = "snapshot_loaded",
                    path = %path.display(),
                    records = self.records.len(),
                    dropped = dropped
                );
                LoadOutcome::Loaded {
                    records: total - dropped,
                    dropped,
                }
            }
            Err(err) => {
                warn!(event = "snapshot_load_failed", path = %path.display(), error = %err);
                LoadOutcome::StartedEmpty {
                    reason: err.to_string(),
                }
            }
        }
    }

    pub fn append_or_merge(
        &mut self,
        mut record: NormalizedRecord,
    ) -> Result<MergeOutcome, StorageError> {
        let outcome = match self.records.iter_mut().find(|existing| existing.id == record.id) {
            Some(existing) => {
                let kept_diagnostic = record.diagnostic.is_none() && existing.diagnostic.is_some();
                if kept_diagnostic {
                    record.diagnostic = existing.diagnostic.take();
                }
                *existing = record;
                MergeOutcome::Merged { kept_diagnostic }
            }
            None => {
                self.records.push_back(record);
                MergeOutcome::Inserted {
                    evicted: self.evict_overflow(),
                }
            }
        };
        debug!(event = "store_upsert", outcome = ?outcome, count = self.records.len());
        self.persist()?;
        Ok(outcome)
    }

    /// Attaches through the merge rule, only while the record is still held.
    pub fn attach_diagnostic(
        &mut self,
        id: &str,
        diagnostic: Diagnostic,
    ) -> Result<bool, StorageError> {
        let Some(existing) = self.get(id) else {
            return Ok(false);
        };
        let mut updated = existing.clone();
        updated.diagnostic = Some(diagnostic);
        self.append_or_merge(updated)?;
        Ok(true)
    }

    pub fn delete(&mut self, ids: &BTreeSet<String>) -> Result<usize, StorageError> {
        let before = self.records.len();
        self.records.retain(|record| !ids.contains(&record.id));
        let removed = before - self.records.len();
        info!(event = "store_delete", requested = ids.len(), removed = removed);
        self.persist()?;
        Ok(removed)
    }

    pub fn clear(&mut self) -> Result<usize, StorageError> {
        let removed = self.records.len();
        self.records.clear();
        info!(event = "store_clear", removed = removed);
        self.persist()?;
        Ok(removed)
    }

    pub fn list(&self, limit: Option<usize>) -> Vec<NormalizedRecord> {
        let skip = match limit {
            Some(limit) => self.records.len().saturating_sub(limit),
            None => 0,
        };
        self.records.iter().skip(skip).cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<&NormalizedRecord> {
        self.records.iter().find(|record| record.id == id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    /// Rewrites the whole snapshot. A store without a path is a no-op.
    pub fn persist(&self) -> Result<(), StorageError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let payload = self.snapshot_bytes()?;
        write_atomic(path, &payload)?;
        debug!(event = "snapshot_written", path = %path.display(), bytes = payload.len());
        Ok(())
    }

    pub fn snapshot_bytes(&self) -> Result<Vec<u8>, StorageError> {
        let document = SnapshotRef {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            records: &self.records,
        };
        serde_json::to_vec_pretty(&document)
            .map_err(|err| StorageError::Serialization(err.to_string()))
    }

    pub fn info(&self) -> StoreInfo {
        let snapshot_bytes = self
            .snapshot_path
            .as_ref()
            .and_then(|path| std::fs::metadata(path).ok())
            .map(|metadata| metadata.len());
        StoreInfo {
            count: self.records.len(),
            capacity: self.capacity,
            snapshot_path: self
                .snapshot_path
                .as_ref()
                .map(|path| path.display().to_string()),
            snapshot_bytes,
            severity: SeverityCounts::tally(&self.records),
            newest_received_at: self.records.iter().map(|record| record.received_at).max(),
        }
    }

    fn evict_overflow(&mut self) -> usize {
        let Some(capacity) = self.capacity else {
            return 0;
        };
        let mut evicted = 0;
        while self.records.len() > capacity {
            if let Some(oldest) = self.records.pop_front() {
                debug!(event = "store_evict", id = %oldest.id);
                evicted += 1;
            }
        }
        evicted
    }
}

fn read_snapshot(path: &Path) -> Result<Vec<NormalizedRecord>, StorageError> {
    let bytes = std::fs::read(path).map_err(|source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    let parsed: SnapshotOnDisk = serde_json::from_slice(&bytes)
        .map_err(|err| StorageError::Serialization(err.to_string()))?;
    match parsed {
        SnapshotOnDisk::Document(document) => {
            if document.version > SNAPSHOT_VERSION {
                return Err(StorageError::UnsupportedSnapshotVersion {
                    found: document.version,
                    supported: SNAPSHOT_VERSION,
                });
            }
            Ok(document.records)
        }
        SnapshotOnDisk::Bare(records) => Ok(records),
    }
}

fn write_atomic(path: &Path, payload: &[u8]) -> Result<(), StorageError> {
    let io_err = |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let temp_path = match path.file_name() {
        Some(name) => path.with_file_name(format!("{}.tmp", name.to_string_lossy())),
        None => path.with_extension("tmp"),
    };
    std::fs::write(&temp_path, payload).map_err(io_err)?;
    std::fs::rename(&temp_path, path).map_err(io_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use hookwatch_core::{
        DiagnosticBody, DiagnosticOrigin, ErrorDiagnostic, NoteDiagnostic, RecordKind, Section,
    };
    use serde_json::json;

    fn ts(offset_secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_760_000_000 + offset_secs, 0)
            .single()
            .expect("valid timestamp")
    }

    fn error_record(id: &str, message: &str) -> NormalizedRecord {
        let payload = json!({
            "id": id,
            "event": {"event_id": id, "level": "error", "logentry": {"formatted": message}}
        });
        hookwatch_core::classify_at(None, &payload, ts(0))
    }

    fn diagnostic(cause: &str) -> Diagnostic {
        Diagnostic::new(
            DiagnosticBody::Error(ErrorDiagnostic {
                cause: Section::from_text(cause),
                ..ErrorDiagnostic::default()
            }),
            DiagnosticOrigin::LocalFallback,
            ts(10),
        )
    }

    fn ids(store: &RecordStore) -> Vec<String> {
        store.list(None).into_iter().map(|record| record.id).collect()
    }

    #[test]
    fn merge_keeps_existing_diagnostic_when_incoming_has_none() {
        let mut store = RecordStore::in_memory(None);
        let mut first = error_record("x", "first");
        first.diagnostic = Some(diagnostic("D1"));
        store.append_or_merge(first).expect("append");

        let outcome = store
            .append_or_merge(error_record("x", "second"))
            .expect("merge");
        assert_eq!(outcome, MergeOutcome::Merged { kept_diagnostic: true });

        let stored = store.get("x").expect("record");
        assert_eq!(stored.headline(), "second");
        assert_eq!(stored.diagnostic, Some(diagnostic("D1")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn merge_takes_incoming_diagnostic_when_supplied() {
        let mut store = RecordStore::in_memory(None);
        let mut first = error_record("x", "first");
        first.diagnostic = Some(diagnostic("D1"));
        store.append_or_merge(first).expect("append");

        let mut second = error_record("x", "second");
        second.diagnostic = Some(diagnostic("D2"));
        let outcome = store.append_or_merge(second).expect("merge");
        assert_eq!(outcome, MergeOutcome::Merged { kept_diagnostic: false });
        assert_eq!(
            store.get("x").and_then(|record| record.diagnostic.clone()),
            Some(diagnostic("D2"))
        );
    }

    #[test]
    fn merge_keeps_insertion_position() {
        let mut store = RecordStore::in_memory(None);
        for id in ["a", "b", "c"] {
            store.append_or_merge(error_record(id, id)).expect("append");
        }
        store
            .append_or_merge(error_record("a", "again"))
            .expect("merge");
        assert_eq!(ids(&store), vec!["a", "b", "c"]);
    }

    #[test]
    fn capacity_evicts_oldest() {
        let mut store = RecordStore::in_memory(Some(2));
        store.append_or_merge(error_record("a", "a")).expect("append");
        store.append_or_merge(error_record("b", "b")).expect("append");
        let outcome = store.append_or_merge(error_record("c", "c")).expect("append");
        assert_eq!(outcome, MergeOutcome::Inserted { evicted: 1 });
        assert_eq!(ids(&store), vec!["b", "c"]);
    }

    #[test]
    fn zero_capacity_means_unbounded() {
        let mut store = RecordStore::in_memory(Some(0));
        for index in 0..150 {
            store
                .append_or_merge(error_record(&format!("r{index}"), "m"))
                .expect("append");
        }
        assert_eq!(store.len(), 150);
        assert_eq!(store.capacity(), None);
    }

    #[test]
    fn delete_removes_matching_and_ignores_absent() {
        let mut store = RecordStore::in_memory(None);
        for id in ["a", "b", "c"] {
            store.append_or_merge(error_record(id, id)).expect("append");
        }
        let removed = store
            .delete(&BTreeSet::from(["a".to_string(), "c".to_string()]))
            .expect("delete");
        assert_eq!(removed, 2);
        assert_eq!(ids(&store), vec!["b"]);

        let removed = store
            .delete(&BTreeSet::from(["missing".to_string(), "a".to_string()]))
            .expect("delete");
        assert_eq!(removed, 0);
        assert_eq!(ids(&store), vec!["b"]);
    }

    #[test]
    fn list_limit_returns_most_recent_in_order() {
        let mut store = RecordStore::in_memory(None);
        for id in ["a", "b", "c", "d"] {
            store.append_or_merge(error_record(id, id)).expect("append");
        }
        let recent = store
            .list(Some(2))
            .into_iter()
            .map(|record| record.id)
            .collect::<Vec<_>>();
        assert_eq!(recent, vec!["c", "d"]);
        assert_eq!(store.list(Some(10)).len(), 4);
    }

    #[test]
    fn snapshot_tracks_every_mutation_and_reloads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("messages.json");

        let (mut store, outcome) = RecordStore::open(&path, Some(10));
        assert_eq!(outcome, LoadOutcome::NoSnapshot);
        store.append_or_merge(error_record("a", "a")).expect("append");
        store.append_or_merge(error_record("b", "b")).expect("append");
        store
            .attach_diagnostic("b", diagnostic("why"))
            .expect("attach");
        store
            .delete(&BTreeSet::from(["a".to_string()]))
            .expect("delete");

        let (reloaded, outcome) = RecordStore::open(&path, Some(10));
        assert_eq!(
            outcome,
            LoadOutcome::Loaded {
                records: 1,
                dropped: 0
            }
        );
        assert_eq!(ids(&reloaded), vec!["b"]);
        assert_eq!(
            reloaded.get("b").and_then(|record| record.diagnostic.clone()),
            Some(diagnostic("why"))
        );
        assert_eq!(reloaded.get("b").map(|record| record.kind()), Some(RecordKind::ErrorEvent));

        let (mut cleared, _) = RecordStore::open(&path, Some(10));
        cleared.clear().expect("clear");
        let (empty, _) = RecordStore::open(&path, Some(10));
        assert!(empty.is_empty());
    }

    #[test]
    fn corrupt_snapshot_starts_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("messages.json");
        std::fs::write(&path, "{not json").expect("write");

        let (store, outcome) = RecordStore::open(&path, None);
        assert!(store.is_empty());
        assert!(matches!(outcome, LoadOutcome::StartedEmpty { .. }));
    }

    #[test]
    fn reload_trims_to_capacity_and_accepts_bare_arrays() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("messages.json");
        let records = ["a", "b", "c"]
            .iter()
            .map(|id| error_record(id, id))
            .collect::<Vec<_>>();
        std::fs::write(&path, serde_json::to_vec(&records).expect("encode")).expect("write");

        let (store, outcome) = RecordStore::open(&path, Some(2));
        assert_eq!(
            outcome,
            LoadOutcome::Loaded {
                records: 2,
                dropped: 1
            }
        );
        assert_eq!(ids(&store), vec!["b", "c"]);
    }

    #[test]
    fn attach_skips_records_that_are_gone() {
        let mut store = RecordStore::in_memory(None);
        let attached = store
            .attach_diagnostic("ghost", diagnostic("x"))
            .expect("attach");
        assert!(!attached);
        assert!(store.is_empty());
    }

    #[test]
    fn info_reports_counts_and_buckets() {
        let mut store = RecordStore::in_memory(Some(5));
        store.append_or_merge(error_record("a", "a")).expect("append");
        let mut note = hookwatch_core::classify_at(
            None,
            &json!({"issue": {"id": "i1", "level": "info"}}),
            ts(5),
        );
        note.diagnostic = Some(Diagnostic::new(
            DiagnosticBody::Note(NoteDiagnostic {
                explanation: "fine".to_string(),
                ..NoteDiagnostic::default()
            }),
            DiagnosticOrigin::Model,
            ts(6),
        ));
        store.append_or_merge(note).expect("append");

        let info = store.info();
        assert_eq!(info.count, 2);
        assert_eq!(info.capacity, Some(5));
        assert_eq!(info.severity.error, 1);
        assert_eq!(info.severity.info, 1);
        assert_eq!(info.snapshot_path, None);
        assert_eq!(info.newest_received_at, Some(ts(5)));
    }
}
