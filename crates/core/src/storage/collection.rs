//! Per-collection configuration and in-memory state.
//!
//! A loaded collection owns its bitmap index and internal id counter. Its
//! vectors live in the shared [`VectorStore`] under the collection name and
//! its raw documents live in the key-value engine under
//! `"{collection}_{internal_id}"`.

use super::persistence;
use crate::bitmap::BitmapIndex;
use crate::config::{
    BITMAP_FILE, CONFIG_FILE, ID_FIELD, MAX_COLLECTION_NAME_LEN, MAX_DIMENSION, VECTOR_FILE,
};
use crate::document::{Document, MetadataValue};
use crate::error::{Error, Result};
use crate::filter_types::{FilterClause, FilterCondition};
use crate::vector::{load_space, new_space, DistanceMetric, QuantizationKind, VectorSpace, VectorStore};
use parking_lot::{Mutex, MutexGuard, RwLock};
use roaring::RoaringTreemap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Immutable settings of a collection, persisted as `config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub name: String,
    pub dimension: usize,
    pub metric: DistanceMetric,
    #[serde(default)]
    pub quantization: QuantizationKind,
}

impl CollectionConfig {
    pub fn new(name: impl Into<String>, dimension: usize, metric: DistanceMetric) -> Self {
        Self {
            name: name.into(),
            dimension,
            metric,
            quantization: QuantizationKind::None,
        }
    }

    pub fn with_quantization(mut self, quantization: QuantizationKind) -> Self {
        self.quantization = quantization;
        self
    }

    /// Check name and dimension limits.
    ///
    /// Names are 1 to [`MAX_COLLECTION_NAME_LEN`] characters of ASCII
    /// letters, digits, `_` and `-`, since they double as directory names.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.len() > MAX_COLLECTION_NAME_LEN {
            return Err(Error::InvalidArgument(format!(
                "collection name must be 1 to {} characters",
                MAX_COLLECTION_NAME_LEN
            )));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(Error::InvalidArgument(format!(
                "collection name '{}' may only contain letters, digits, '_' and '-'",
                self.name
            )));
        }
        if self.dimension == 0 || self.dimension > MAX_DIMENSION {
            return Err(Error::InvalidArgument(format!(
                "dimension must be 1 to {}, got {}",
                MAX_DIMENSION, self.dimension
            )));
        }
        if self.metric == DistanceMetric::Haversine && self.dimension != 2 {
            return Err(Error::InvalidArgument(
                "haversine collections store [latitude, longitude] pairs".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn read(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        persistence::load(&path, |bytes| Ok(serde_json::from_slice(bytes)?))?
            .ok_or_else(|| Error::Corrupted(format!("{path:?} is missing")))
    }

    pub(crate) fn write(&self, dir: &Path) -> Result<()> {
        persistence::commit(&dir.join(CONFIG_FILE), &serde_json::to_vec_pretty(self)?)
    }
}

/// Contents of `vectors.bin`.
#[derive(Serialize, Deserialize)]
struct VectorFile {
    next_id: u64,
    space: Vec<u8>,
}

/// A loaded collection.
pub(crate) struct Collection {
    config: CollectionConfig,
    dir: PathBuf,
    bitmap: RwLock<BitmapIndex>,
    next_id: AtomicU64,
    /// Serializes writers so the `_id` lookup and the write that follows
    /// see the same state.
    writes: Mutex<()>,
}

impl Collection {
    /// Fresh, empty collection and its vector index.
    pub(crate) fn create(config: CollectionConfig, dir: PathBuf) -> (Self, Box<dyn VectorSpace>) {
        let space = new_space(config.dimension, config.metric, config.quantization);
        let collection = Self {
            config,
            dir,
            bitmap: RwLock::new(BitmapIndex::new()),
            next_id: AtomicU64::new(1),
            writes: Mutex::new(()),
        };
        (collection, space)
    }

    /// Read the bitmap and vector files of `dir`.
    pub(crate) fn load(config: CollectionConfig, dir: PathBuf) -> Result<(Self, Box<dyn VectorSpace>)> {
        let vectors = persistence::load(&dir.join(VECTOR_FILE), |bytes| {
            let file: VectorFile = bincode::deserialize(bytes)?;
            Ok((file.next_id, load_space(&file.space)?))
        })?;
        let (next_id, space) = match vectors {
            Some(v) => v,
            None => {
                tracing::warn!("Collection '{}' has no vector file, starting empty", config.name);
                (1, new_space(config.dimension, config.metric, config.quantization))
            }
        };
        if space.dim() != config.dimension
            || space.metric() != config.metric
            || space.quantization() != config.quantization
        {
            return Err(Error::Corrupted(format!(
                "vector file of '{}' does not match its config",
                config.name
            )));
        }

        let bitmap = persistence::load(&dir.join(BITMAP_FILE), BitmapIndex::from_bytes)?
            .unwrap_or_default();

        tracing::info!(
            "Loaded collection '{}' ({} vectors, {} documents indexed)",
            config.name,
            space.len(),
            bitmap.len()
        );
        let collection = Self {
            config,
            dir,
            bitmap: RwLock::new(bitmap),
            next_id: AtomicU64::new(next_id),
            writes: Mutex::new(()),
        };
        Ok((collection, space))
    }

    /// Internal ids recorded in the vector file of an unloaded collection.
    pub(crate) fn stored_ids(dir: &Path) -> Result<Vec<u64>> {
        let ids = persistence::load(&dir.join(VECTOR_FILE), |bytes| {
            let file: VectorFile = bincode::deserialize(bytes)?;
            Ok(load_space(&file.space)?.ids())
        })?;
        Ok(ids.unwrap_or_default())
    }

    /// Write the bitmap and vector files.
    pub(crate) fn persist(&self, vectors: &VectorStore) -> Result<()> {
        let _writes = self.writes.lock();
        let bitmap = self.bitmap.write().to_bytes()?;
        let space = vectors.snapshot(&self.config.name)?;
        let file = VectorFile {
            next_id: self.next_id.load(Ordering::SeqCst),
            space,
        };
        persistence::commit(&self.dir.join(BITMAP_FILE), &bitmap)?;
        persistence::commit(&self.dir.join(VECTOR_FILE), &bincode::serialize(&file)?)?;
        tracing::info!(
            "Saved collection '{}' ({} bitmap bytes, {} vector bytes)",
            self.config.name,
            bitmap.len(),
            file.space.len()
        );
        Ok(())
    }

    pub(crate) fn config(&self) -> &CollectionConfig {
        &self.config
    }

    pub(crate) fn name(&self) -> &str {
        &self.config.name
    }

    pub(crate) fn write_lock(&self) -> MutexGuard<'_, ()> {
        self.writes.lock()
    }

    pub(crate) fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn record_key(&self, id: u64) -> Vec<u8> {
        format!("{}_{}", self.config.name, id).into_bytes()
    }

    /// Internal id of the document with user id `user_id`.
    pub(crate) fn lookup(&self, user_id: &str) -> Result<Option<u64>> {
        let filter = FilterClause::must(FilterCondition::equals(ID_FIELD, user_id.into()));
        Ok(self.bitmap.read().pure_search(&filter)?.min())
    }

    fn indexed_metadata(doc: &Document) -> HashMap<String, MetadataValue> {
        let mut metadata = doc.metadata.clone();
        metadata.insert(ID_FIELD.to_string(), MetadataValue::String(doc.id.clone()));
        metadata
    }

    pub(crate) fn index(&self, id: u64, doc: &Document) -> Result<()> {
        self.bitmap.write().add(id, &Self::indexed_metadata(doc))
    }

    pub(crate) fn unindex(&self, id: u64, doc: &Document) -> Result<()> {
        self.bitmap.write().remove(id, &Self::indexed_metadata(doc))
    }

    #[cfg(test)]
    pub(crate) fn damage_string_posting(&self, field: &str, value: &str) {
        self.bitmap.write().damage_string_posting(field, value)
    }

    /// Every internal id matching `filter`.
    pub(crate) fn filter(&self, filter: &FilterClause) -> Result<RoaringTreemap> {
        self.bitmap.read().pure_search(filter)
    }

    /// Members of `candidates` matching `filter`.
    pub(crate) fn admit(&self, candidates: &[u64], filter: &FilterClause) -> Result<Vec<u64>> {
        self.bitmap.read().search_with_candidates(candidates, filter)
    }

    /// Reject documents this collection cannot store.
    pub(crate) fn check_document(&self, doc: &Document) -> Result<()> {
        if doc.id.is_empty() {
            return Err(Error::InvalidArgument("document id is empty".into()));
        }
        if doc.metadata.contains_key(ID_FIELD) {
            return Err(Error::InvalidArgument(format!(
                "metadata field '{ID_FIELD}' is reserved"
            )));
        }
        if doc.vector.len() != self.config.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.config.dimension,
                actual: doc.vector.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn doc(id: &str, vector: Vec<f32>, lang: &str) -> Document {
        let mut metadata = HashMap::new();
        metadata.insert("lang".to_string(), MetadataValue::from(lang));
        Document::new(id, vector, metadata)
    }

    // ── Config ──

    #[test]
    fn test_config_validation() {
        assert!(CollectionConfig::new("docs", 8, DistanceMetric::Cosine).validate().is_ok());
        assert!(CollectionConfig::new("", 8, DistanceMetric::Cosine).validate().is_err());
        assert!(CollectionConfig::new("a/b", 8, DistanceMetric::Cosine).validate().is_err());
        assert!(CollectionConfig::new("x".repeat(MAX_COLLECTION_NAME_LEN + 1), 8, DistanceMetric::Cosine)
            .validate()
            .is_err());
        assert!(CollectionConfig::new("docs", 0, DistanceMetric::Cosine).validate().is_err());
        assert!(CollectionConfig::new("docs", MAX_DIMENSION + 1, DistanceMetric::Cosine)
            .validate()
            .is_err());
        assert!(CollectionConfig::new("geo", 3, DistanceMetric::Haversine).validate().is_err());
        assert!(CollectionConfig::new("geo", 2, DistanceMetric::Haversine).validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip_on_disk() {
        let dir = TempDir::new().unwrap();
        let config = CollectionConfig::new("docs", 3, DistanceMetric::InnerProduct)
            .with_quantization(QuantizationKind::F16);
        config.write(dir.path()).unwrap();
        assert_eq!(CollectionConfig::read(dir.path()).unwrap(), config);
    }

    #[test]
    fn test_missing_config_is_corrupted() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            CollectionConfig::read(dir.path()),
            Err(Error::Corrupted(_))
        ));
    }

    // ── Documents ──

    #[test]
    fn test_check_document() {
        let dir = TempDir::new().unwrap();
        let (c, _) = Collection::create(
            CollectionConfig::new("docs", 2, DistanceMetric::Cosine),
            dir.path().to_path_buf(),
        );
        assert!(c.check_document(&doc("a", vec![1.0, 0.0], "rust")).is_ok());
        assert!(matches!(
            c.check_document(&doc("", vec![1.0, 0.0], "rust")),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            c.check_document(&doc("a", vec![1.0], "rust")),
            Err(Error::DimensionMismatch { expected: 2, actual: 1 })
        ));
        let mut reserved = doc("a", vec![1.0, 0.0], "rust");
        reserved
            .metadata
            .insert(ID_FIELD.to_string(), MetadataValue::from("b"));
        assert!(c.check_document(&reserved).is_err());
    }

    #[test]
    fn test_lookup_by_user_id() {
        let dir = TempDir::new().unwrap();
        let (c, _) = Collection::create(
            CollectionConfig::new("docs", 2, DistanceMetric::Cosine),
            dir.path().to_path_buf(),
        );
        let a = doc("alpha", vec![1.0, 0.0], "rust");
        let id = c.allocate_id();
        c.index(id, &a).unwrap();
        assert_eq!(c.lookup("alpha").unwrap(), Some(id));
        assert_eq!(c.lookup("beta").unwrap(), None);
        c.unindex(id, &a).unwrap();
        assert_eq!(c.lookup("alpha").unwrap(), None);
        assert_eq!(c.record_key(7), b"docs_7".to_vec());
    }

    // ── Persistence ──

    #[test]
    fn test_persist_and_load() {
        let dir = TempDir::new().unwrap();
        let config = CollectionConfig::new("docs", 2, DistanceMetric::Euclidean);
        let store = VectorStore::new();
        let (c, space) = Collection::create(config.clone(), dir.path().to_path_buf());
        store.register("docs", space);
        for (i, lang) in ["rust", "go", "rust"].iter().enumerate() {
            let id = c.allocate_id();
            let d = doc(&format!("d{i}"), vec![i as f32, 0.0], lang);
            store.insert_vector("docs", id, &d.vector).unwrap();
            c.index(id, &d).unwrap();
        }
        c.persist(&store).unwrap();

        let (restored, space) = Collection::load(config, dir.path().to_path_buf()).unwrap();
        assert_eq!(space.len(), 3);
        assert_eq!(restored.allocate_id(), 4);
        let rust = FilterClause::must(FilterCondition::equals("lang", "rust".into()));
        assert_eq!(restored.filter(&rust).unwrap().len(), 2);
        assert_eq!(restored.lookup("d1").unwrap(), Some(2));
        let mut ids = Collection::stored_ids(dir.path()).unwrap();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_load_rejects_mismatched_config() {
        let dir = TempDir::new().unwrap();
        let store = VectorStore::new();
        let (c, space) = Collection::create(
            CollectionConfig::new("docs", 2, DistanceMetric::Euclidean),
            dir.path().to_path_buf(),
        );
        store.register("docs", space);
        c.persist(&store).unwrap();
        let wrong = CollectionConfig::new("docs", 3, DistanceMetric::Euclidean);
        assert!(matches!(
            Collection::load(wrong, dir.path().to_path_buf()),
            Err(Error::Corrupted(_))
        ));
    }
}
