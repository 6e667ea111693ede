//! Visitor face store and its persistence backends.
//!
//! The store is loaded whole, mutated in memory and saved whole. Which backend
//! holds it between requests (a JSON file or process memory) is decided once
//! at startup.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use frontdesk_core::Embedding;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Free-form visitor metadata as submitted by the kiosk.
pub type VisitorInfo = BTreeMap<String, String>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store file {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize store: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("face id already stored: {0}")]
    DuplicateId(String),
    #[error("no stored face with id {0}")]
    NotFound(String),
    #[error("in-memory store lock poisoned")]
    Poisoned,
    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// One enrolled visitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitorRecord {
    pub id: String,
    pub filename: String,
    pub file_path: PathBuf,
    /// `None` only for records taken in placeholder recognition mode.
    pub face_encoding: Option<Embedding>,
    #[serde(default)]
    pub visitor_info: VisitorInfo,
    pub created_at: DateTime<Utc>,
}

/// Insertion-ordered mapping from face id to record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FaceStore {
    records: IndexMap<String, VisitorRecord>,
}

impl FaceStore {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn insert(&mut self, record: VisitorRecord) -> Result<(), StoreError> {
        if self.records.contains_key(&record.id) {
            return Err(StoreError::DuplicateId(record.id));
        }
        self.records.insert(record.id.clone(), record);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&VisitorRecord> {
        self.records.get(id)
    }

    /// Remove a record, keeping the order of the rest.
    pub fn remove(&mut self, id: &str) -> Result<VisitorRecord, StoreError> {
        self.records
            .shift_remove(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Records in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &VisitorRecord> {
        self.records.values()
    }

    /// The most recently inserted record.
    pub fn latest(&self) -> Option<&VisitorRecord> {
        self.records.last().map(|(_, record)| record)
    }

    /// Whether any record stores its photo at `path`.
    pub fn references_file(&self, path: &Path) -> bool {
        self.iter().any(|r| r.file_path == path)
    }

    /// Encoded records in insertion order, ready to hand to the matcher.
    pub fn gallery(&self) -> Vec<(String, Embedding)> {
        self.iter()
            .filter_map(|r| r.face_encoding.as_ref().map(|e| (r.id.clone(), e.clone())))
            .collect()
    }
}

/// Where a [`FaceStore`] lives between requests.
pub trait Persistence: Send + Sync {
    fn load(&self) -> Result<FaceStore, StoreError>;
    fn save(&self, store: &FaceStore) -> Result<(), StoreError>;
}

/// Keeps the store in process memory for the lifetime of the daemon.
#[derive(Default)]
pub struct MemoryPersistence {
    store: Mutex<FaceStore>,
}

impl Persistence for MemoryPersistence {
    fn load(&self) -> Result<FaceStore, StoreError> {
        Ok(self.store.lock().map_err(|_| StoreError::Poisoned)?.clone())
    }

    fn save(&self, store: &FaceStore) -> Result<(), StoreError> {
        *self.store.lock().map_err(|_| StoreError::Poisoned)? = store.clone();
        Ok(())
    }
}

/// Keeps the store as one JSON object `{ id: record }` in a flat file.
///
/// A missing file reads as an empty store. Saves write a sibling temp file
/// and rename it over the original.
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl Persistence for JsonFilePersistence {
    fn load(&self) -> Result<FaceStore, StoreError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(FaceStore::default()),
            Err(e) => return Err(self.io_err(e)),
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(FaceStore::default());
        }

        serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, store: &FaceStore) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }

        let json = serde_json::to_vec_pretty(store).map_err(StoreError::Serialize)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, json).map_err(|e| self.io_err(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))?;

        tracing::debug!(path = %self.path.display(), records = store.len(), "store saved");
        Ok(())
    }
}

/// Shared handle used by request handlers.
///
/// Reads go straight to the backend; mutations are serialized through an
/// async lock so load-mutate-save cycles in this process never interleave.
#[derive(Clone)]
pub struct StoreHandle {
    backend: Arc<dyn Persistence>,
    write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl StoreHandle {
    pub fn new(backend: Arc<dyn Persistence>) -> Self {
        Self {
            backend,
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Load the current store.
    pub async fn snapshot(&self) -> Result<FaceStore, StoreError> {
        let backend = Arc::clone(&self.backend);
        tokio::task::spawn_blocking(move || backend.load()).await?
    }

    /// Load, apply `mutate`, and save. Nothing is saved when `mutate` fails.
    ///
    /// `mutate` runs on a blocking thread while the write lock is held, so
    /// file work tied to the records (photos) can be done inside it.
    pub async fn update<T, E, F>(&self, mutate: F) -> Result<T, E>
    where
        F: FnOnce(&mut FaceStore) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<StoreError> + Send + 'static,
    {
        let _guard = self.write_lock.lock().await;
        let backend = Arc::clone(&self.backend);

        tokio::task::spawn_blocking(move || {
            let mut store = backend.load()?;
            let out = mutate(&mut store)?;
            backend.save(&store)?;
            Ok(out)
        })
        .await
        .map_err(StoreError::from)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, encoding: Option<Vec<f32>>) -> VisitorRecord {
        VisitorRecord {
            id: id.to_string(),
            filename: format!("{id}.png"),
            file_path: PathBuf::from(format!("images/{id}.png")),
            face_encoding: encoding.map(Embedding::new),
            visitor_info: VisitorInfo::from([("name".to_string(), id.to_string())]),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_insert_rejects_duplicate_id() {
        let mut store = FaceStore::default();
        store.insert(record("a", None)).unwrap();
        assert!(matches!(
            store.insert(record("a", None)),
            Err(StoreError::DuplicateId(id)) if id == "a"
        ));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_remove_preserves_order() {
        let mut store = FaceStore::default();
        for id in ["a", "b", "c"] {
            store.insert(record(id, None)).unwrap();
        }
        store.remove("b").unwrap();
        let ids: Vec<_> = store.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["a", "c"]);
        assert_eq!(store.latest().map(|r| r.id.as_str()), Some("c"));
        assert!(matches!(store.remove("b"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_gallery_skips_unencoded_records() {
        let mut store = FaceStore::default();
        store.insert(record("a", Some(vec![1.0, 0.0]))).unwrap();
        store.insert(record("b", None)).unwrap();
        store.insert(record("c", Some(vec![0.0, 1.0]))).unwrap();

        let ids: Vec<_> = store.gallery().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, ["a", "c"]);
    }

    #[test]
    fn test_file_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonFilePersistence::new(dir.path().join("face_db.json"));
        assert!(backend.load().unwrap().is_empty());
    }

    #[test]
    fn test_file_round_trip_keeps_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonFilePersistence::new(dir.path().join("nested/face_db.json"));

        let mut store = FaceStore::default();
        for id in ["zeta", "alpha", "mid"] {
            store.insert(record(id, Some(vec![0.25, 0.5]))).unwrap();
        }
        backend.save(&store).unwrap();

        let loaded = JsonFilePersistence::new(backend.path()).load().unwrap();
        let ids: Vec<_> = loaded.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["zeta", "alpha", "mid"]);
        assert_eq!(loaded.get("alpha"), store.get("alpha"));
    }

    #[test]
    fn test_file_format_is_id_keyed_object() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonFilePersistence::new(dir.path().join("face_db.json"));

        let mut store = FaceStore::default();
        store.insert(record("abc", Some(vec![0.5, 0.25]))).unwrap();
        store.insert(record("def", None)).unwrap();
        backend.save(&store).unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(backend.path()).unwrap()).unwrap();
        assert_eq!(raw["abc"]["filename"], "abc.png");
        assert_eq!(raw["abc"]["visitor_info"]["name"], "abc");
        assert!(raw["abc"]["face_encoding"].is_array());
        assert_eq!(raw["abc"]["face_encoding"], serde_json::json!([0.5, 0.25]));
        assert!(raw["def"]["face_encoding"].is_null());
    }

    #[test]
    fn test_file_corrupt_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face_db.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(matches!(
            JsonFilePersistence::new(&path).load(),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_memory_round_trip() {
        let backend = MemoryPersistence::default();
        let mut store = backend.load().unwrap();
        store.insert(record("a", None)).unwrap();
        backend.save(&store).unwrap();
        assert_eq!(backend.load().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_handle_update_failure_saves_nothing() {
        let handle = StoreHandle::new(Arc::new(MemoryPersistence::default()));
        handle.update(|s| s.insert(record("a", None))).await.unwrap();

        let err = handle
            .update(|s| {
                s.insert(record("b", None))?;
                s.insert(record("a", None))
            })
            .await;
        assert!(matches!(err, Err(StoreError::DuplicateId(_))));
        assert_eq!(handle.snapshot().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_handle_concurrent_updates_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonFilePersistence::new(dir.path().join("db.json"));
        let handle = StoreHandle::new(Arc::new(backend));

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let handle = handle.clone();
                tokio::spawn(async move {
                    handle
                        .update(move |s| s.insert(record(&format!("v{i}"), None)))
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(handle.snapshot().await.unwrap().len(), 16);
    }
}
