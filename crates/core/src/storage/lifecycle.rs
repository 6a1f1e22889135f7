//! Collection lifecycle registry.
//!
//! A collection name is either absent (unregistered) or maps to one entry
//! holding its config and its phase. The loaded indexes live inside the
//! `Loaded` phase itself, so "loaded" and "has data in memory" cannot drift
//! apart.

use super::collection::{Collection, CollectionConfig};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Externally visible lifecycle state of a registered collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionState {
    /// Known on disk, never loaded in this process.
    Registered,
    /// Indexes in memory; data operations allowed.
    Loaded,
    /// Indexes persisted and evicted.
    Released,
}

enum Phase {
    Registered,
    Loaded(Arc<Collection>),
    Released,
}

pub(crate) struct Entry {
    pub(crate) config: CollectionConfig,
    phase: Phase,
}

impl Entry {
    pub(crate) fn state(&self) -> CollectionState {
        match self.phase {
            Phase::Registered => CollectionState::Registered,
            Phase::Loaded(_) => CollectionState::Loaded,
            Phase::Released => CollectionState::Released,
        }
    }

    pub(crate) fn loaded(&self) -> Option<&Arc<Collection>> {
        match &self.phase {
            Phase::Loaded(c) => Some(c),
            _ => None,
        }
    }
}

#[derive(Default)]
pub(crate) struct Registry {
    entries: HashMap<String, Entry>,
}

impl Registry {
    pub(crate) fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Add `config` in the `Registered` phase.
    pub(crate) fn register(&mut self, config: CollectionConfig) -> Result<()> {
        if self.entries.contains_key(&config.name) {
            return Err(Error::CollectionExists(config.name));
        }
        self.entries.insert(
            config.name.clone(),
            Entry {
                config,
                phase: Phase::Registered,
            },
        );
        Ok(())
    }

    pub(crate) fn entry(&self, name: &str) -> Result<&Entry> {
        self.entries
            .get(name)
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))
    }

    /// The in-memory collection, if `name` is loaded.
    pub(crate) fn loaded(&self, name: &str) -> Result<&Arc<Collection>> {
        self.entry(name)?
            .loaded()
            .ok_or_else(|| Error::CollectionNotLoaded(name.to_string()))
    }

    pub(crate) fn mark_loaded(&mut self, name: &str, collection: Arc<Collection>) -> Result<()> {
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))?;
        entry.phase = Phase::Loaded(collection);
        Ok(())
    }

    /// Move to `Released`, handing back the collection that was loaded.
    pub(crate) fn mark_released(&mut self, name: &str) -> Result<Option<Arc<Collection>>> {
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))?;
        match std::mem::replace(&mut entry.phase, Phase::Released) {
            Phase::Loaded(c) => Ok(Some(c)),
            previous => {
                entry.phase = previous;
                Ok(None)
            }
        }
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<CollectionConfig> {
        self.entries.remove(name).map(|e| e.config)
    }

    /// Registered names, sorted.
    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn loaded_collections(&self) -> impl Iterator<Item = &Arc<Collection>> {
        self.entries.values().filter_map(Entry::loaded)
    }
}
