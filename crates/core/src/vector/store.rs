//! Registry of loaded vector indexes, one per collection.

use super::flat::{ResultSet, VectorSpace};
use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Collection name → vector index.
#[derive(Default)]
pub struct VectorStore {
    spaces: RwLock<HashMap<String, Box<dyn VectorSpace>>>,
}

impl VectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `space` under `collection`, replacing any previous one.
    pub fn register(&self, collection: &str, space: Box<dyn VectorSpace>) {
        self.spaces.write().insert(collection.to_string(), space);
    }

    pub fn deregister(&self, collection: &str) -> Option<Box<dyn VectorSpace>> {
        self.spaces.write().remove(collection)
    }

    pub fn contains(&self, collection: &str) -> bool {
        self.spaces.read().contains_key(collection)
    }

    fn with<T>(&self, collection: &str, f: impl FnOnce(&dyn VectorSpace) -> Result<T>) -> Result<T> {
        let spaces = self.spaces.read();
        let space = spaces
            .get(collection)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))?;
        f(space.as_ref())
    }

    fn with_mut<T>(
        &self,
        collection: &str,
        f: impl FnOnce(&mut dyn VectorSpace) -> Result<T>,
    ) -> Result<T> {
        let mut spaces = self.spaces.write();
        let space = spaces
            .get_mut(collection)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))?;
        f(space.as_mut())
    }

    pub fn insert_vector(&self, collection: &str, id: u64, vector: &[f32]) -> Result<()> {
        self.with_mut(collection, |s| s.insert(id, vector))
    }

    pub fn update_vector(&self, collection: &str, id: u64, vector: &[f32]) -> Result<bool> {
        self.with_mut(collection, |s| s.update(id, vector))
    }

    pub fn remove_vector(&self, collection: &str, id: u64) -> Result<bool> {
        self.with_mut(collection, |s| Ok(s.remove(id)))
    }

    pub fn get_vector(&self, collection: &str, id: u64) -> Result<Option<Vec<f32>>> {
        self.with(collection, |s| Ok(s.get(id)))
    }

    pub fn full_scan(&self, collection: &str, target: &[f32], top_k: usize) -> Result<ResultSet> {
        self.with(collection, |s| s.full_scan(target, top_k))
    }

    pub fn ids(&self, collection: &str) -> Result<Vec<u64>> {
        self.with(collection, |s| Ok(s.ids()))
    }

    pub fn len(&self, collection: &str) -> Result<usize> {
        self.with(collection, |s| Ok(s.len()))
    }

    pub fn snapshot(&self, collection: &str) -> Result<Vec<u8>> {
        self.with(collection, |s| s.snapshot())
    }
}
