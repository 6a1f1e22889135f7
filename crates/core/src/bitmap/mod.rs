//! Bitmap index over document metadata.
//!
//! Each metadata field gets one typed [`InvertedIndex`] per value type.
//! A [`FilterClause`] is answered by intersecting the postings of its `must`
//! conditions and subtracting those of its `must_not` conditions. Hybrid
//! search intersects the result with a candidate id list.

/// Typed inverted index with dirty-tracked posting cache.
pub mod inverted;
/// Order-preserving key encodings.
pub mod sortable;

pub use inverted::InvertedIndex;
pub use sortable::Sortable;

use crate::document::MetadataValue;
use crate::error::{Error, Result};
use crate::filter_types::{FilterClause, FilterCondition, FilterOperator};
use roaring::RoaringTreemap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Sub-indexes of one field, one per value type.
#[derive(Default)]
struct FieldIndex {
    unsigned: InvertedIndex<u64>,
    integer: InvertedIndex<i64>,
    float: InvertedIndex<f64>,
    string: InvertedIndex<String>,
}

type Storage = BTreeMap<Vec<u8>, Vec<u8>>;

#[derive(Serialize, Deserialize)]
struct PersistedField {
    unsigned: Storage,
    integer: Storage,
    float: Storage,
    string: Storage,
}

#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    fields: BTreeMap<String, PersistedField>,
    all: Vec<u8>,
}

impl FieldIndex {
    fn apply(&mut self, id: u64, value: &MetadataValue, add: bool) -> Result<()> {
        match (value, add) {
            (MetadataValue::Unsigned(v), true) => self.unsigned.add(id, v),
            (MetadataValue::Unsigned(v), false) => self.unsigned.remove(id, v),
            (MetadataValue::Integer(v), true) => self.integer.add(id, v),
            (MetadataValue::Integer(v), false) => self.integer.remove(id, v),
            (MetadataValue::Float(v), true) => self.float.add(id, v),
            (MetadataValue::Float(v), false) => self.float.remove(id, v),
            (MetadataValue::String(v), true) => self.string.add(id, v),
            (MetadataValue::String(v), false) => self.string.remove(id, v),
        }
    }

    fn flush(&mut self) -> Result<()> {
        self.unsigned.flush()?;
        self.integer.flush()?;
        self.float.flush()?;
        self.string.flush()
    }

    fn search(&self, condition: &FilterCondition) -> Result<RoaringTreemap> {
        let op = condition.op;
        let mismatched_end = || {
            Error::InvalidArgument(format!(
                "range end for field '{}' has a different type than its start",
                condition.field
            ))
        };
        if op == FilterOperator::StartsWith && !matches!(condition.value, MetadataValue::String(_)) {
            return Err(Error::InvalidArgument(format!(
                "starts_with on field '{}' needs a string value",
                condition.field
            )));
        }
        match &condition.value {
            MetadataValue::Unsigned(v) => {
                let end = match &condition.end {
                    Some(MetadataValue::Unsigned(e)) => Some(e),
                    Some(_) => return Err(mismatched_end()),
                    None => None,
                };
                self.unsigned.search(v, end, op)
            }
            MetadataValue::Integer(v) => {
                let end = match &condition.end {
                    Some(MetadataValue::Integer(e)) => Some(e),
                    Some(_) => return Err(mismatched_end()),
                    None => None,
                };
                self.integer.search(v, end, op)
            }
            MetadataValue::Float(v) => {
                let end = match &condition.end {
                    Some(MetadataValue::Float(e)) => Some(e),
                    Some(_) => return Err(mismatched_end()),
                    None => None,
                };
                self.float.search(v, end, op)
            }
            MetadataValue::String(v) => {
                let end = match &condition.end {
                    Some(MetadataValue::String(e)) => Some(e),
                    Some(_) => return Err(mismatched_end()),
                    None => None,
                };
                self.string.search(v, end, op)
            }
        }
    }
}

/// Metadata index for one collection.
#[derive(Default)]
pub struct BitmapIndex {
    fields: HashMap<String, FieldIndex>,
    all: RoaringTreemap,
}

impl BitmapIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of indexed documents.
    pub fn len(&self) -> u64 {
        self.all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: u64) -> bool {
        self.all.contains(id)
    }

    /// Index every metadata value of document `id`. On failure the fields
    /// already indexed for `id` are removed again.
    pub fn add(&mut self, id: u64, metadata: &HashMap<String, MetadataValue>) -> Result<()> {
        let mut applied = Vec::with_capacity(metadata.len());
        for (field, value) in metadata {
            let outcome = self
                .fields
                .entry(field.clone())
                .or_default()
                .apply(id, value, true);
            if let Err(e) = outcome {
                for (field, value) in applied {
                    if let Some(index) = self.fields.get_mut(field) {
                        // The posting was just decoded, so removal cannot fail.
                        let _ = index.apply(id, value, false);
                    }
                }
                return Err(e);
            }
            applied.push((field, value));
        }
        self.all.insert(id);
        Ok(())
    }

    /// Remove document `id`, given the metadata it was indexed with. Every
    /// field is visited even after a failure; the first error is returned.
    pub fn remove(&mut self, id: u64, metadata: &HashMap<String, MetadataValue>) -> Result<()> {
        let mut result = Ok(());
        for (field, value) in metadata {
            if let Some(index) = self.fields.get_mut(field) {
                if let Err(e) = index.apply(id, value, false) {
                    if result.is_ok() {
                        result = Err(e);
                    }
                }
            }
        }
        self.all.remove(id);
        result
    }

    /// Replace the stored posting of `field == value` with undecodable bytes.
    #[cfg(test)]
    pub(crate) fn damage_string_posting(&mut self, field: &str, value: &str) {
        self.fields
            .entry(field.to_string())
            .or_default()
            .string
            .damage_posting(&value.to_string());
    }

    /// Write every dirty posting back to storage.
    pub fn flush(&mut self) -> Result<()> {
        for index in self.fields.values_mut() {
            index.flush()?;
        }
        Ok(())
    }

    fn condition(&self, condition: &FilterCondition) -> Result<RoaringTreemap> {
        match self.fields.get(&condition.field) {
            Some(index) => index.search(condition),
            None => Ok(RoaringTreemap::new()),
        }
    }

    /// Ids matching `filter`. An empty clause matches every document.
    pub fn pure_search(&self, filter: &FilterClause) -> Result<RoaringTreemap> {
        let mut must = filter.must.iter();
        let mut result = match must.next() {
            Some(first) => self.condition(first)?,
            None => self.all.clone(),
        };
        for condition in must {
            result &= self.condition(condition)?;
            if result.is_empty() {
                return Ok(result);
            }
        }
        for condition in &filter.must_not {
            result -= self.condition(condition)?;
        }
        Ok(result)
    }

    /// Members of `candidates` matching `filter`, in candidate order.
    pub fn search_with_candidates(&self, candidates: &[u64], filter: &FilterClause) -> Result<Vec<u64>> {
        let matched = self.pure_search(filter)?;
        Ok(candidates
            .iter()
            .copied()
            .filter(|id| matched.contains(*id))
            .collect())
    }

    /// Flush and serialize.
    pub fn to_bytes(&mut self) -> Result<Vec<u8>> {
        self.flush()?;
        let fields = self
            .fields
            .iter()
            .map(|(name, index)| {
                (
                    name.clone(),
                    PersistedField {
                        unsigned: index.unsigned.storage().clone(),
                        integer: index.integer.storage().clone(),
                        float: index.float.storage().clone(),
                        string: index.string.storage().clone(),
                    },
                )
            })
            .collect();
        let mut all = Vec::with_capacity(self.all.serialized_size());
        self.all.serialize_into(&mut all)?;
        Ok(bincode::serialize(&PersistedIndex { fields, all })?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let persisted: PersistedIndex = bincode::deserialize(bytes)?;
        let all = RoaringTreemap::deserialize_from(persisted.all.as_slice())
            .map_err(|e| Error::Corrupted(format!("document bitmap: {e}")))?;
        let fields = persisted
            .fields
            .into_iter()
            .map(|(name, f)| {
                (
                    name,
                    FieldIndex {
                        unsigned: InvertedIndex::from_storage(f.unsigned),
                        integer: InvertedIndex::from_storage(f.integer),
                        float: InvertedIndex::from_storage(f.float),
                        string: InvertedIndex::from_storage(f.string),
                    },
                )
            })
            .collect();
        Ok(Self { fields, all })
    }
}
