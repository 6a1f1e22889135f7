//! Typed inverted index: one posting bitmap per distinct value.
//!
//! Postings live serialized in `storage`, keyed by the value's sortable
//! encoding. Mutations decode a posting into `cache` and mark it dirty;
//! [`InvertedIndex::flush`] writes dirty postings back and drops the storage
//! key of any posting that became empty. Searches read through the cache.

use super::sortable::Sortable;
use crate::error::{Error, Result};
use crate::filter_types::FilterOperator;
use roaring::RoaringTreemap;
use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::ops::Bound;

struct CachedPosting {
    ids: RoaringTreemap,
    dirty: bool,
}

pub struct InvertedIndex<T> {
    storage: BTreeMap<Vec<u8>, Vec<u8>>,
    cache: HashMap<Vec<u8>, CachedPosting>,
    _marker: PhantomData<fn(T)>,
}

impl<T> Default for InvertedIndex<T> {
    fn default() -> Self {
        Self {
            storage: BTreeMap::new(),
            cache: HashMap::new(),
            _marker: PhantomData,
        }
    }
}

fn decode(bytes: &[u8]) -> Result<RoaringTreemap> {
    RoaringTreemap::deserialize_from(bytes)
        .map_err(|e| Error::Corrupted(format!("posting bitmap: {e}")))
}

fn encode(ids: &RoaringTreemap) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(ids.serialized_size());
    ids.serialize_into(&mut out)?;
    Ok(out)
}

impl<T: Sortable> InvertedIndex<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from flushed storage.
    pub(crate) fn from_storage(storage: BTreeMap<Vec<u8>, Vec<u8>>) -> Self {
        Self {
            storage,
            ..Self::default()
        }
    }

    /// Flushed storage; call [`flush`](Self::flush) first.
    pub(crate) fn storage(&self) -> &BTreeMap<Vec<u8>, Vec<u8>> {
        &self.storage
    }

    fn posting_mut(&mut self, key: Vec<u8>) -> Result<&mut CachedPosting> {
        use std::collections::hash_map::Entry;
        match self.cache.entry(key) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(e) => {
                let ids = match self.storage.get(e.key()) {
                    Some(bytes) => decode(bytes)?,
                    None => RoaringTreemap::new(),
                };
                Ok(e.insert(CachedPosting { ids, dirty: false }))
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn damage_posting(&mut self, value: &T) {
        let key = value.to_key();
        self.cache.remove(&key);
        self.storage.insert(key, vec![0xFF; 3]);
    }

    pub fn add(&mut self, id: u64, value: &T) -> Result<()> {
        let posting = self.posting_mut(value.to_key())?;
        if posting.ids.insert(id) {
            posting.dirty = true;
        }
        Ok(())
    }

    pub fn remove(&mut self, id: u64, value: &T) -> Result<()> {
        let posting = self.posting_mut(value.to_key())?;
        if posting.ids.remove(id) {
            posting.dirty = true;
        }
        Ok(())
    }

    /// Number of distinct values with at least one id, counting unflushed changes.
    #[cfg(test)]
    pub(crate) fn value_count(&self) -> usize {
        let flushed = self
            .storage
            .keys()
            .filter(|k| !self.cache.contains_key(*k))
            .count();
        flushed + self.cache.values().filter(|p| !p.ids.is_empty()).count()
    }

    /// Write dirty postings back to storage.
    pub fn flush(&mut self) -> Result<()> {
        for (key, posting) in self.cache.iter_mut() {
            if !posting.dirty {
                continue;
            }
            if posting.ids.is_empty() {
                self.storage.remove(key);
            } else {
                self.storage.insert(key.clone(), encode(&posting.ids)?);
            }
            posting.dirty = false;
        }
        self.cache.retain(|_, posting| !posting.ids.is_empty());
        Ok(())
    }

    /// Union of the postings whose key lies in `range` and satisfies `keep`.
    fn union_range(
        &self,
        range: (Bound<Vec<u8>>, Bound<Vec<u8>>),
        keep: impl Fn(&[u8]) -> bool,
    ) -> Result<RoaringTreemap> {
        let mut out = RoaringTreemap::new();
        for (key, bytes) in self.storage.range(range.clone()) {
            if self.cache.contains_key(key) || !keep(key) {
                continue;
            }
            out |= decode(bytes)?;
        }
        for (key, posting) in &self.cache {
            if std::ops::RangeBounds::contains(&range, key) && keep(key) {
                out |= &posting.ids;
            }
        }
        Ok(out)
    }

    /// Every id with any value in this index.
    pub fn all(&self) -> Result<RoaringTreemap> {
        self.union_range((Bound::Unbounded, Bound::Unbounded), |_| true)
    }

    /// Ids whose value satisfies `op` against `value` (and `end` for `InRange`).
    pub fn search(&self, value: &T, end: Option<&T>, op: FilterOperator) -> Result<RoaringTreemap> {
        let key = value.to_key();
        let range = match op {
            FilterOperator::Eq => (Bound::Included(key.clone()), Bound::Included(key)),
            FilterOperator::NotEq => {
                let mut all = self.all()?;
                all -= self.search(value, None, FilterOperator::Eq)?;
                return Ok(all);
            }
            FilterOperator::StartsWith => {
                let prefix = key.clone();
                return self.union_range((Bound::Included(key), Bound::Unbounded), |k| {
                    k.starts_with(&prefix)
                });
            }
            FilterOperator::Gt => (Bound::Excluded(key), Bound::Unbounded),
            FilterOperator::Gte => (Bound::Included(key), Bound::Unbounded),
            FilterOperator::Lt => (Bound::Unbounded, Bound::Excluded(key)),
            FilterOperator::Lte => (Bound::Unbounded, Bound::Included(key)),
            FilterOperator::InRange => {
                let end = end
                    .ok_or_else(|| Error::InvalidArgument("in_range requires an end value".into()))?
                    .to_key();
                if key > end {
                    return Ok(RoaringTreemap::new());
                }
                (Bound::Included(key), Bound::Included(end))
            }
        };
        self.union_range(range, |_| true)
    }
}
