//! The collection-level database.
//!
//! [`Database`] ties the key-value engine (raw documents), the vector store
//! (one flat index per loaded collection) and the per-collection bitmap
//! indexes together behind the collection lifecycle. Every public operation
//! runs inside a panic boundary and reports faults as [`Error::Internal`].
//!
//! Data operations hold the registry read lock for their whole duration and
//! lifecycle operations take the write lock, so a collection cannot be
//! released or deleted underneath a running insert or search.

use super::collection::{Collection, CollectionConfig};
use super::guard::guarded;
use super::lifecycle::{CollectionState, Registry};
use crate::config::{FILTER_MATCH_SCORE, HYBRID_OVERSCAN, MAX_K};
use crate::document::{Candidate, Document};
use crate::error::{Error, Result};
use crate::filter_types::FilterClause;
use crate::kv::{BatchOptions, Db, Options};
use crate::search::{hybrid_merge, normalize_results};
use crate::vector::VectorStore;
use parking_lot::RwLock;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Options for [`Database::open`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseOptions {
    /// Root directory. The key-value engine lives in `<root>/kv` and
    /// collections in `<root>/collections/<name>`.
    pub root: PathBuf,
    /// Key-value engine options. `dir_path` is replaced by `<root>/kv`.
    pub kv: Options,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir().join("vectorkv"),
            kv: Options::default(),
        }
    }
}

impl DatabaseOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }
}

/// Collections of documents with vector, filter and hybrid search.
pub struct Database {
    collections_dir: PathBuf,
    kv: Db,
    registry: RwLock<Registry>,
    vectors: VectorStore,
}

fn check_top_k(top_k: usize) -> Result<()> {
    if top_k > MAX_K {
        return Err(Error::InvalidArgument(format!(
            "top_k must be at most {MAX_K}, got {top_k}"
        )));
    }
    Ok(())
}

impl Database {
    /// Open the database at `options.root`, registering every collection
    /// found on disk without loading it.
    pub fn open(options: DatabaseOptions) -> Result<Self> {
        let mut kv_options = options.kv.clone();
        kv_options.dir_path = options.root.join("kv");
        let kv = Db::open(kv_options)?;

        let collections_dir = options.root.join("collections");
        fs::create_dir_all(&collections_dir)?;

        let mut registry = Registry::default();
        for entry in fs::read_dir(&collections_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let dir = entry.path();
            match CollectionConfig::read(&dir) {
                Ok(config) if entry.file_name().to_str() == Some(config.name.as_str()) => {
                    registry.register(config)?;
                }
                Ok(config) => {
                    tracing::warn!(
                        "Skipping {:?}: config names collection '{}'",
                        dir,
                        config.name
                    );
                }
                Err(e) => {
                    tracing::warn!("Skipping {:?}: {}", dir, e);
                }
            }
        }
        tracing::info!(
            "Opened database at {:?} with {} collections",
            options.root,
            registry.names().len()
        );

        Ok(Self {
            collections_dir,
            kv,
            registry: RwLock::new(registry),
            vectors: VectorStore::new(),
        })
    }

    /// The underlying key-value engine.
    pub fn kv(&self) -> &Db {
        &self.kv
    }

    fn collection_dir(&self, name: &str) -> PathBuf {
        self.collections_dir.join(name)
    }

    // ── Lifecycle ──

    /// Create, persist and load a new collection.
    pub fn create_collection(&self, config: CollectionConfig) -> Result<()> {
        guarded("create_collection", || {
            config.validate()?;
            let mut registry = self.registry.write();
            if registry.contains(&config.name) {
                return Err(Error::CollectionExists(config.name.clone()));
            }
            let dir = self.collection_dir(&config.name);
            let (collection, space) = Collection::create(config.clone(), dir.clone());
            self.vectors.register(&config.name, space);
            if let Err(e) = config.write(&dir).and_then(|()| collection.persist(&self.vectors)) {
                self.vectors.deregister(&config.name);
                if let Err(cleanup) = remove_dir(&dir) {
                    tracing::warn!("Failed to clean up {:?}: {}", dir, cleanup);
                }
                return Err(e);
            }
            let name = config.name.clone();
            registry.register(config)?;
            registry.mark_loaded(&name, Arc::new(collection))?;
            tracing::info!("Created collection '{}'", name);
            Ok(())
        })
    }

    /// Remove a collection with its documents and files. Unknown names are
    /// not an error.
    pub fn delete_collection(&self, name: &str) -> Result<()> {
        guarded("delete_collection", || {
            let mut registry = self.registry.write();
            let Ok(entry) = registry.entry(name) else {
                return Ok(());
            };
            let dir = self.collection_dir(name);
            let ids = match entry.state() {
                CollectionState::Loaded => self.vectors.ids(name)?,
                _ => Collection::stored_ids(&dir).unwrap_or_else(|e| {
                    tracing::warn!("Cannot list documents of '{}': {}", name, e);
                    Vec::new()
                }),
            };

            let mut batch = self.kv.new_batch(BatchOptions::default());
            for id in &ids {
                batch.delete(format!("{name}_{id}").as_bytes())?;
            }
            if !batch.is_empty() {
                batch.commit()?;
            }

            remove_dir(&dir)?;
            self.vectors.deregister(name);
            registry.remove(name);
            tracing::info!("Deleted collection '{}' ({} documents)", name, ids.len());
            Ok(())
        })
    }

    pub fn get_collection(&self, name: &str) -> Result<CollectionConfig> {
        guarded("get_collection", || {
            Ok(self.registry.read().entry(name)?.config.clone())
        })
    }

    /// Lifecycle state of `name`, `None` when it is not registered.
    pub fn collection_state(&self, name: &str) -> Option<CollectionState> {
        self.registry.read().entry(name).ok().map(|e| e.state())
    }

    /// Registered collection names, sorted.
    pub fn list_collections(&self) -> Vec<String> {
        self.registry.read().names()
    }

    /// Load a collection's indexes into memory. Loading a loaded collection
    /// does nothing.
    pub fn load_collection(&self, name: &str) -> Result<()> {
        guarded("load_collection", || {
            let mut registry = self.registry.write();
            let entry = registry.entry(name)?;
            if entry.state() == CollectionState::Loaded {
                return Ok(());
            }
            let (collection, space) =
                Collection::load(entry.config.clone(), self.collection_dir(name))?;
            self.vectors.register(name, space);
            registry.mark_loaded(name, Arc::new(collection))
        })
    }

    /// Persist a collection's indexes and evict them. Releasing a collection
    /// that is not loaded does nothing.
    pub fn release_collection(&self, name: &str) -> Result<()> {
        guarded("release_collection", || {
            let mut registry = self.registry.write();
            let Some(collection) = registry.entry(name)?.loaded() else {
                return Ok(());
            };
            collection.persist(&self.vectors)?;
            self.vectors.deregister(name);
            registry.mark_released(name)?;
            tracing::info!("Released collection '{}'", name);
            Ok(())
        })
    }

    /// Persist a loaded collection's indexes and sync the raw records.
    pub fn flush_collection(&self, name: &str) -> Result<()> {
        guarded("flush_collection", || {
            let registry = self.registry.read();
            registry.loaded(name)?.persist(&self.vectors)?;
            self.kv.sync()
        })
    }

    // ── Documents ──

    fn read_record(&self, collection: &Collection, id: u64) -> Result<Option<Document>> {
        match self.kv.get(&collection.record_key(id)) {
            Ok(bytes) => Ok(Some(Document::decode(&bytes)?)),
            Err(Error::KeyNotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// The indexed form of document `id`, falling back to its id alone when
    /// the raw record is gone.
    fn indexed_document(&self, collection: &Collection, id: u64, user_id: &str) -> Result<Document> {
        Ok(match self.read_record(collection, id)? {
            Some(doc) => doc,
            None => {
                tracing::warn!(
                    "Raw record {} of '{}' is missing",
                    id,
                    collection.name()
                );
                Document::new(user_id, Vec::new(), Default::default())
            }
        })
    }

    fn insert_locked(&self, collection: &Collection, doc: &Document) -> Result<()> {
        let name = collection.name();
        let bytes = doc.encode()?;
        let id = collection.allocate_id();
        let key = collection.record_key(id);
        self.vectors.insert_vector(name, id, &doc.vector)?;
        if let Err(e) = self.kv.put(&key, &bytes) {
            undo(name, "vector", self.vectors.remove_vector(name, id).map(drop));
            return Err(e);
        }
        if let Err(e) = collection.index(id, doc) {
            undo(name, "bitmap", collection.unindex(id, doc));
            undo(name, "vector", self.vectors.remove_vector(name, id).map(drop));
            undo(name, "record", self.kv.delete(&key));
            return Err(e);
        }
        Ok(())
    }

    /// Insert a new document. Fails if its id is already present.
    pub fn insert(&self, collection: &str, doc: Document) -> Result<()> {
        guarded("insert", || {
            let registry = self.registry.read();
            let c = registry.loaded(collection)?;
            c.check_document(&doc)?;
            let _writes = c.write_lock();
            if c.lookup(&doc.id)?.is_some() {
                return Err(Error::InvalidArgument(format!(
                    "document '{}' already exists in '{}'",
                    doc.id, collection
                )));
            }
            self.insert_locked(c, &doc)
        })
    }

    /// Replace a document, inserting it if it does not exist.
    pub fn update(&self, collection: &str, doc: Document) -> Result<()> {
        guarded("update", || {
            let registry = self.registry.read();
            let c = registry.loaded(collection)?;
            c.check_document(&doc)?;
            let _writes = c.write_lock();
            let Some(id) = c.lookup(&doc.id)? else {
                return self.insert_locked(c, &doc);
            };
            let old = self.indexed_document(c, id, &doc.id)?;
            let old_vector = self.vectors.get_vector(collection, id)?;
            let key = c.record_key(id);
            let bytes = doc.encode()?;
            self.vectors.update_vector(collection, id, &doc.vector)?;
            let restore_vector = || match &old_vector {
                Some(v) => self.vectors.update_vector(collection, id, v).map(drop),
                None => self.vectors.remove_vector(collection, id).map(drop),
            };
            if let Err(e) = self.kv.put(&key, &bytes) {
                undo(collection, "vector", restore_vector());
                return Err(e);
            }
            let reindexed = c.unindex(id, &old).and_then(|()| c.index(id, &doc));
            if let Err(e) = reindexed {
                undo(collection, "bitmap", c.unindex(id, &doc));
                undo(collection, "bitmap", c.index(id, &old));
                undo(collection, "vector", restore_vector());
                undo(
                    collection,
                    "record",
                    old.encode().and_then(|b| self.kv.put(&key, &b)),
                );
                return Err(e);
            }
            Ok(())
        })
    }

    /// Remove a document. Removing an absent document succeeds.
    pub fn delete(&self, collection: &str, id: &str) -> Result<()> {
        guarded("delete", || {
            let registry = self.registry.read();
            let c = registry.loaded(collection)?;
            let _writes = c.write_lock();
            let Some(internal) = c.lookup(id)? else {
                return Ok(());
            };
            let old = self.indexed_document(c, internal, id)?;
            self.kv.delete(&c.record_key(internal))?;
            self.vectors.remove_vector(collection, internal)?;
            c.unindex(internal, &old)
        })
    }

    pub fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        guarded("get_document", || {
            let registry = self.registry.read();
            let c = registry.loaded(collection)?;
            match c.lookup(id)? {
                Some(internal) => self.read_record(c, internal),
                None => Ok(None),
            }
        })
    }

    /// Number of documents in a loaded collection.
    pub fn count(&self, collection: &str) -> Result<usize> {
        guarded("count", || {
            let registry = self.registry.read();
            registry.loaded(collection)?;
            self.vectors.len(collection)
        })
    }

    // ── Search ──

    fn candidates(&self, collection: &Collection, hits: Vec<(u64, f32)>) -> Result<Vec<Candidate>> {
        let mut out = Vec::with_capacity(hits.len());
        for (id, score) in hits {
            match self.read_record(collection, id)? {
                Some(doc) => out.push(Candidate {
                    id: doc.id,
                    metadata: doc.metadata,
                    score,
                }),
                None => tracing::warn!(
                    "Search hit {} of '{}' has no raw record",
                    id,
                    collection.name()
                ),
            }
        }
        Ok(out)
    }

    /// Nearest `top_k` documents to `vector`, best first.
    pub fn vector_search(&self, collection: &str, vector: &[f32], top_k: usize) -> Result<Vec<Candidate>> {
        guarded("vector_search", || {
            check_top_k(top_k)?;
            let registry = self.registry.read();
            let c = registry.loaded(collection)?;
            let scan = self.vectors.full_scan(collection, vector, top_k)?;
            let hits = normalize_results(&scan, c.config().metric);
            self.candidates(c, hits)
        })
    }

    /// Up to `top_k` documents matching `filter`, each with the score
    /// [`FILTER_MATCH_SCORE`], in ascending internal id order.
    pub fn filter_search(&self, collection: &str, filter: &FilterClause, top_k: usize) -> Result<Vec<Candidate>> {
        guarded("filter_search", || {
            check_top_k(top_k)?;
            let registry = self.registry.read();
            let c = registry.loaded(collection)?;
            let hits = c
                .filter(filter)?
                .iter()
                .take(top_k)
                .map(|id| (id, FILTER_MATCH_SCORE))
                .collect();
            self.candidates(c, hits)
        })
    }

    /// Vector search restricted to documents matching `filter`.
    ///
    /// Scans `top_k * HYBRID_OVERSCAN` vector candidates, so fewer than
    /// `top_k` results come back when the filter is selective.
    pub fn hybrid_search(
        &self,
        collection: &str,
        vector: &[f32],
        filter: &FilterClause,
        top_k: usize,
    ) -> Result<Vec<Candidate>> {
        guarded("hybrid_search", || {
            check_top_k(top_k)?;
            let registry = self.registry.read();
            let c = registry.loaded(collection)?;
            let scan = self
                .vectors
                .full_scan(collection, vector, top_k.saturating_mul(HYBRID_OVERSCAN))?;
            let admitted = c.admit(&scan.ids, filter)?;
            let hits = hybrid_merge(&scan, &admitted, c.config().metric, top_k);
            self.candidates(c, hits)
        })
    }

    // ── Shutdown ──

    /// Persist every loaded collection and close the key-value engine.
    pub fn close(&self) -> Result<()> {
        guarded("close", || {
            let registry = self.registry.write();
            let mut first_err = None;
            for collection in registry.loaded_collections() {
                if let Err(e) = collection.persist(&self.vectors) {
                    tracing::error!("Failed to save collection '{}': {}", collection.name(), e);
                    first_err.get_or_insert(e);
                }
            }
            if let Err(e) = self.kv.close() {
                first_err.get_or_insert(e);
            }
            first_err.map_or(Ok(()), Err)
        })
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if self.kv.is_closed() {
            return;
        }
        if let Err(e) = self.close() {
            tracing::warn!("error closing database: {}", e);
        }
    }
}

/// Log a failed rollback step. The caller returns the original error.
fn undo(collection: &str, what: &str, outcome: Result<()>) {
    if let Err(e) = outcome {
        tracing::error!("Rollback of {} in '{}' failed: {}", what, collection, e);
    }
}

fn remove_dir(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::MetadataValue;
    use crate::filter_types::{FilterCondition, FilterOperator};
    use crate::vector::{DistanceMetric, QuantizationKind};
    use std::collections::HashMap;
    use std::time::Duration;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> Database {
        Database::open(DatabaseOptions::new(dir.path())).unwrap()
    }

    fn meta_kv(pairs: &[(&str, MetadataValue)]) -> HashMap<String, MetadataValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn doc(id: &str, vector: Vec<f32>, lang: &str, stars: u64) -> Document {
        Document::new(
            id,
            vector,
            meta_kv(&[("lang", lang.into()), ("stars", stars.into())]),
        )
    }

    fn seeded(dir: &TempDir) -> Database {
        seeded_with(DatabaseOptions::new(dir.path()))
    }

    fn seeded_with(options: DatabaseOptions) -> Database {
        let db = Database::open(options).unwrap();
        db.create_collection(CollectionConfig::new("repos", 2, DistanceMetric::Euclidean))
            .unwrap();
        db.insert("repos", doc("a", vec![0.0, 0.0], "rust", 500)).unwrap();
        db.insert("repos", doc("b", vec![1.0, 0.0], "go", 1200)).unwrap();
        db.insert("repos", doc("c", vec![2.0, 0.0], "rust", 80)).unwrap();
        db.insert("repos", doc("d", vec![3.0, 0.0], "rust", 2000)).unwrap();
        db
    }

    fn ids(candidates: &[Candidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.id.as_str()).collect()
    }

    // ── Lifecycle ──

    #[test]
    fn test_create_and_list() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        db.create_collection(CollectionConfig::new("b", 4, DistanceMetric::Cosine))
            .unwrap();
        db.create_collection(
            CollectionConfig::new("a", 4, DistanceMetric::Cosine)
                .with_quantization(QuantizationKind::F16),
        )
        .unwrap();
        assert_eq!(db.list_collections(), vec!["a", "b"]);
        assert_eq!(db.collection_state("a"), Some(CollectionState::Loaded));
        assert_eq!(
            db.get_collection("a").unwrap().quantization,
            QuantizationKind::F16
        );
        assert!(matches!(
            db.create_collection(CollectionConfig::new("a", 4, DistanceMetric::Cosine)),
            Err(Error::CollectionExists(_))
        ));
        assert!(matches!(
            db.create_collection(CollectionConfig::new("bad name", 4, DistanceMetric::Cosine)),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            db.get_collection("zzz"),
            Err(Error::CollectionNotFound(_))
        ));
    }

    #[test]
    fn test_release_and_load() {
        let dir = TempDir::new().unwrap();
        let db = seeded(&dir);
        db.release_collection("repos").unwrap();
        db.release_collection("repos").unwrap();
        assert_eq!(db.collection_state("repos"), Some(CollectionState::Released));
        assert!(matches!(
            db.vector_search("repos", &[0.0, 0.0], 1),
            Err(Error::CollectionNotLoaded(_))
        ));
        assert!(matches!(
            db.insert("repos", doc("e", vec![0.0, 1.0], "c", 1)),
            Err(Error::CollectionNotLoaded(_))
        ));

        db.load_collection("repos").unwrap();
        db.load_collection("repos").unwrap();
        assert_eq!(db.count("repos").unwrap(), 4);
        let hits = db.vector_search("repos", &[0.0, 0.0], 1).unwrap();
        assert_eq!(ids(&hits), vec!["a"]);
    }

    #[test]
    fn test_unknown_collection() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        assert!(matches!(
            db.load_collection("nope"),
            Err(Error::CollectionNotFound(_))
        ));
        assert!(matches!(
            db.release_collection("nope"),
            Err(Error::CollectionNotFound(_))
        ));
        assert!(matches!(
            db.insert("nope", doc("a", vec![0.0], "x", 1)),
            Err(Error::CollectionNotFound(_))
        ));
        assert!(db.delete_collection("nope").is_ok());
        assert_eq!(db.collection_state("nope"), None);
    }

    #[test]
    fn test_delete_collection_removes_records() {
        let dir = TempDir::new().unwrap();
        let db = seeded(&dir);
        db.delete_collection("repos").unwrap();
        db.delete_collection("repos").unwrap();
        assert!(db.list_collections().is_empty());
        assert!(!dir.path().join("collections").join("repos").exists());
        assert!(matches!(db.kv().get(b"repos_1"), Err(Error::KeyNotFound)));

        db.create_collection(CollectionConfig::new("repos", 2, DistanceMetric::Euclidean))
            .unwrap();
        assert_eq!(db.count("repos").unwrap(), 0);
    }

    #[test]
    fn test_delete_released_collection() {
        let dir = TempDir::new().unwrap();
        let db = seeded(&dir);
        db.release_collection("repos").unwrap();
        db.delete_collection("repos").unwrap();
        assert!(matches!(db.kv().get(b"repos_4"), Err(Error::KeyNotFound)));
    }

    #[test]
    fn test_reopen_registers_without_loading() {
        let dir = TempDir::new().unwrap();
        {
            let db = seeded(&dir);
            db.close().unwrap();
        }
        let db = open(&dir);
        assert_eq!(db.list_collections(), vec!["repos"]);
        assert_eq!(db.collection_state("repos"), Some(CollectionState::Registered));
        db.load_collection("repos").unwrap();
        let doc = db.get_document("repos", "c").unwrap().unwrap();
        assert_eq!(doc.vector, vec![2.0, 0.0]);
        db.insert("repos", Document::new("e", vec![9.0, 9.0], HashMap::new()))
            .unwrap();
        assert_eq!(db.count("repos").unwrap(), 5);
    }

    // ── Documents ──

    #[test]
    fn test_insert_duplicate_and_invalid() {
        let dir = TempDir::new().unwrap();
        let db = seeded(&dir);
        assert!(matches!(
            db.insert("repos", doc("a", vec![5.0, 5.0], "rust", 1)),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            db.insert("repos", doc("z", vec![5.0], "rust", 1)),
            Err(Error::DimensionMismatch { .. })
        ));
        assert_eq!(db.count("repos").unwrap(), 4);
    }

    #[test]
    fn test_update_replaces_metadata() {
        let dir = TempDir::new().unwrap();
        let db = seeded(&dir);
        db.update("repos", doc("b", vec![10.0, 0.0], "rust", 1)).unwrap();
        let go = FilterClause::must(FilterCondition::equals("lang", "go".into()));
        assert!(db.filter_search("repos", &go, 10).unwrap().is_empty());
        let stored = db.get_document("repos", "b").unwrap().unwrap();
        assert_eq!(stored.vector, vec![10.0, 0.0]);
        assert_eq!(db.count("repos").unwrap(), 4);
    }

    #[test]
    fn test_update_missing_inserts() {
        let dir = TempDir::new().unwrap();
        let db = seeded(&dir);
        db.update("repos", doc("new", vec![7.0, 7.0], "zig", 3)).unwrap();
        assert_eq!(db.count("repos").unwrap(), 5);
        assert!(db.get_document("repos", "new").unwrap().is_some());
    }

    #[test]
    fn test_delete_document() {
        let dir = TempDir::new().unwrap();
        let db = seeded(&dir);
        db.delete("repos", "a").unwrap();
        db.delete("repos", "a").unwrap();
        db.delete("repos", "never-existed").unwrap();
        assert!(db.get_document("repos", "a").unwrap().is_none());
        let hits = db.vector_search("repos", &[0.0, 0.0], 1).unwrap();
        assert_eq!(ids(&hits), vec!["b"]);
        let rust = FilterClause::must(FilterCondition::equals("lang", "rust".into()));
        assert_eq!(ids(&db.filter_search("repos", &rust, 10).unwrap()), vec!["c", "d"]);
    }

    // ── Failed writes ──

    fn tight_options(dir: &TempDir) -> DatabaseOptions {
        DatabaseOptions {
            root: dir.path().to_path_buf(),
            kv: Options {
                memtable_size: 256,
                memtable_nums: 2,
                wait_memtable_space_timeout: Duration::from_millis(200),
                ..Options::default()
            },
        }
    }

    fn fill_until_blocked(db: &Database) {
        for i in 0..10_000u32 {
            match db.kv.put(format!("filler-{i}").as_bytes(), &[7u8; 64]) {
                Ok(()) => {}
                Err(Error::WaitMemtableSpaceTimeOut) => return,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        panic!("memtables never filled up");
    }

    #[test]
    fn test_blocked_writes_change_nothing() {
        let dir = TempDir::new().unwrap();
        let db = seeded_with(tight_options(&dir));
        let rust = FilterClause::must(FilterCondition::equals("lang", "rust".into()));
        let blocker = db.kv.lock_flushing();
        fill_until_blocked(&db);

        assert!(matches!(
            db.update("repos", doc("a", vec![5.0, 5.0], "zig", 1)),
            Err(Error::WaitMemtableSpaceTimeOut)
        ));
        assert_eq!(ids(&db.vector_search("repos", &[5.0, 5.0], 1).unwrap()), vec!["d"]);
        let a = db.get_document("repos", "a").unwrap().unwrap();
        assert_eq!(a.vector, vec![0.0, 0.0]);
        assert_eq!(a.metadata.get("lang"), Some(&MetadataValue::from("rust")));

        assert!(matches!(
            db.insert("repos", doc("e", vec![5.0, 5.0], "rust", 1)),
            Err(Error::WaitMemtableSpaceTimeOut)
        ));
        assert_eq!(db.count("repos").unwrap(), 4);
        assert!(db.get_document("repos", "e").unwrap().is_none());

        assert!(matches!(
            db.delete("repos", "b"),
            Err(Error::WaitMemtableSpaceTimeOut)
        ));
        assert!(db.get_document("repos", "b").unwrap().is_some());
        assert_eq!(ids(&db.vector_search("repos", &[1.0, 0.0], 1).unwrap()), vec!["b"]);
        assert_eq!(ids(&db.filter_search("repos", &rust, 10).unwrap()), vec!["a", "c", "d"]);

        drop(blocker);
        db.kv.flush().unwrap();
        db.update("repos", doc("a", vec![5.0, 5.0], "zig", 1)).unwrap();
        db.insert("repos", doc("e", vec![6.0, 6.0], "rust", 1)).unwrap();
        db.delete("repos", "b").unwrap();
        assert_eq!(db.count("repos").unwrap(), 4);
        assert_eq!(ids(&db.vector_search("repos", &[5.0, 5.0], 1).unwrap()), vec!["a"]);
        assert_eq!(ids(&db.filter_search("repos", &rust, 10).unwrap()), vec!["c", "d", "e"]);
    }

    #[test]
    fn test_failed_indexing_rolls_back() {
        let dir = TempDir::new().unwrap();
        let db = seeded(&dir);
        let rust = FilterClause::must(FilterCondition::equals("lang", "rust".into()));
        db.registry
            .read()
            .loaded("repos")
            .unwrap()
            .damage_string_posting("lang", "zig");

        assert!(matches!(
            db.update("repos", doc("a", vec![9.0, 9.0], "zig", 1)),
            Err(Error::Corrupted(_))
        ));
        let a = db.get_document("repos", "a").unwrap().unwrap();
        assert_eq!(a.vector, vec![0.0, 0.0]);
        assert_eq!(a.metadata.get("lang"), Some(&MetadataValue::from("rust")));
        assert_eq!(ids(&db.vector_search("repos", &[0.0, 0.0], 1).unwrap()), vec!["a"]);

        assert!(matches!(
            db.insert("repos", doc("e", vec![9.0, 9.0], "zig", 1)),
            Err(Error::Corrupted(_))
        ));
        assert!(db.get_document("repos", "e").unwrap().is_none());
        assert_eq!(db.count("repos").unwrap(), 4);
        assert!(matches!(db.kv.get(b"repos_5"), Err(Error::KeyNotFound)));

        db.insert("repos", doc("e", vec![9.0, 9.0], "rust", 1)).unwrap();
        assert_eq!(db.count("repos").unwrap(), 5);
        assert_eq!(
            ids(&db.filter_search("repos", &rust, 10).unwrap()),
            vec!["a", "c", "d", "e"]
        );
        db.delete("repos", "e").unwrap();
        assert!(db.get_document("repos", "e").unwrap().is_none());
    }

    // ── Search ──

    #[test]
    fn test_vector_search_scores() {
        let dir = TempDir::new().unwrap();
        let db = seeded(&dir);
        let hits = db.vector_search("repos", &[0.0, 0.0], 3).unwrap();
        assert_eq!(ids(&hits), vec!["a", "b", "c"]);
        assert_eq!(hits[0].score, 100.0);
        assert_eq!(hits[1].score, 99.0);
        assert_eq!(hits[0].metadata.get("lang"), Some(&MetadataValue::from("rust")));
        assert!(!hits[0].metadata.contains_key("_id"));
    }

    #[test]
    fn test_filter_search() {
        let dir = TempDir::new().unwrap();
        let db = seeded(&dir);
        let filter = FilterClause::must(FilterCondition::equals("lang", "rust".into())).and(
            FilterCondition::new("stars", FilterOperator::Gte, 100u64.into()),
        );
        let hits = db.filter_search("repos", &filter, 10).unwrap();
        assert_eq!(ids(&hits), vec!["a", "d"]);
        assert!(hits.iter().all(|h| h.score == FILTER_MATCH_SCORE));
        assert_eq!(db.filter_search("repos", &filter, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_hybrid_search() {
        let dir = TempDir::new().unwrap();
        let db = seeded(&dir);
        let rust = FilterClause::must(FilterCondition::equals("lang", "rust".into()));
        let hits = db.hybrid_search("repos", &[1.0, 0.0], &rust, 2).unwrap();
        assert_eq!(ids(&hits), vec!["a", "c"]);
        assert_eq!(hits[0].score, 99.0);
    }

    #[test]
    fn test_top_k_limits() {
        let dir = TempDir::new().unwrap();
        let db = seeded(&dir);
        assert!(matches!(
            db.vector_search("repos", &[0.0, 0.0], MAX_K + 1),
            Err(Error::InvalidArgument(_))
        ));
        assert!(db.vector_search("repos", &[0.0, 0.0], 0).unwrap().is_empty());
    }
}
