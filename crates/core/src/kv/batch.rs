//! Atomic groups of writes.
//!
//! A [`Batch`] buffers puts and deletes in memory and applies them to the
//! active memtable in one step under the database write lock, tagged with a
//! single batch id. Lookups through the batch see its own pending writes
//! first. A read-only batch holds the shared database lock for its whole
//! lifetime, so every lookup it makes observes the same committed state.

use super::db::{Db, MemtableSet};
use super::options::BatchOptions;
use super::record::{LogRecord, LogRecordType};
use crate::error::{Error, Result};
use parking_lot::RwLockReadGuard;
use std::collections::HashMap;

/// A set of writes committed atomically.
pub struct Batch<'a> {
    db: &'a Db,
    options: BatchOptions,
    pending: HashMap<Vec<u8>, LogRecord>,
    snapshot: Option<RwLockReadGuard<'a, MemtableSet>>,
    committed: bool,
}

impl<'a> Batch<'a> {
    pub(crate) fn new(db: &'a Db, options: BatchOptions) -> Self {
        let snapshot = options.read_only.then(|| db.read_state());
        Self {
            db,
            options,
            pending: HashMap::new(),
            snapshot,
            committed: false,
        }
    }

    fn check_writable(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        if self.db.is_closed() {
            return Err(Error::DbClosed);
        }
        if self.options.read_only {
            return Err(Error::ReadOnlyBatch);
        }
        if self.committed {
            return Err(Error::BatchCommitted);
        }
        Ok(())
    }

    /// Stage `key = value`. A later write to the same key replaces it.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_writable(key)?;
        self.pending
            .insert(key.to_vec(), LogRecord::normal(key.to_vec(), value.to_vec()));
        Ok(())
    }

    /// Stage a tombstone for `key`.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.check_writable(key)?;
        self.pending
            .insert(key.to_vec(), LogRecord::tombstone(key.to_vec()));
        Ok(())
    }

    /// Value of `key` as seen by this batch.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        if self.db.is_closed() {
            return Err(Error::DbClosed);
        }
        if let Some(record) = self.pending.get(key) {
            return match record.kind {
                LogRecordType::Deleted => Err(Error::KeyNotFound),
                _ => Ok(record.value.clone()),
            };
        }
        let found = match &self.snapshot {
            Some(state) => self.db.lookup(state, key)?,
            None => self.db.lookup(&self.db.read_state(), key)?,
        };
        found.ok_or(Error::KeyNotFound)
    }

    /// Whether `key` has a live value as seen by this batch.
    pub fn exist(&self, key: &[u8]) -> Result<bool> {
        match self.get(key) {
            Ok(_) => Ok(true),
            Err(Error::KeyNotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Number of staged writes.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Apply every staged write atomically. Fails with `BatchCommitted` on reuse.
    pub fn commit(&mut self) -> Result<()> {
        if self.db.is_closed() {
            return Err(Error::DbClosed);
        }
        if self.committed {
            return Err(Error::BatchCommitted);
        }
        // release the shared lock before anything else can need it
        self.snapshot = None;
        if !self.pending.is_empty() {
            self.db.apply_batch(&self.pending, &self.options.write)?;
        }
        self.pending.clear();
        self.committed = true;
        Ok(())
    }
}
