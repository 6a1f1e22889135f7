//! Append-only journal persisting one index partition.
//!
//! Entries are bincode-encoded and appended to a [`Wal`]. The in-memory
//! structure is rebuilt by replaying the journal on open; a journal that has
//! grown much larger than the live data is rewritten as a snapshot.

use crate::config::{DEFAULT_SEGMENT_SIZE, INDEX_JOURNAL_REWRITE_RATIO, TEMP_FILE_SUFFIX};
use crate::error::Result;
use crate::kv::wal::{Wal, WalOptions};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Journals smaller than this are never rewritten.
const MIN_REWRITE_ENTRIES: usize = 1024;

pub(crate) struct Journal<E> {
    dir: PathBuf,
    ext: String,
    wal: RwLock<Wal>,
    entries: AtomicUsize,
    _marker: PhantomData<fn(E)>,
}

fn wal_options(dir: &Path, ext: &str) -> WalOptions {
    WalOptions {
        dir_path: dir.to_path_buf(),
        segment_size: DEFAULT_SEGMENT_SIZE,
        segment_file_ext: ext.to_string(),
        sync: false,
        bytes_per_sync: 0,
    }
}

impl<E: Serialize + DeserializeOwned> Journal<E> {
    /// Open the journal and return every entry it holds, oldest first.
    pub(crate) fn open(dir: &Path, ext: &str) -> Result<(Self, Vec<E>)> {
        fs::create_dir_all(dir)?;
        let stale = format!("{ext}{TEMP_FILE_SUFFIX}");
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry
                .file_name()
                .to_str()
                .is_some_and(|n| n.ends_with(&stale))
            {
                fs::remove_file(entry.path())?;
            }
        }

        let wal = Wal::open(wal_options(dir, ext))?;
        let mut entries = Vec::new();
        for item in wal.reader()? {
            let (data, _) = item?;
            entries.push(bincode::deserialize::<E>(&data)?);
        }
        let journal = Self {
            dir: dir.to_path_buf(),
            ext: ext.to_string(),
            wal: RwLock::new(wal),
            entries: AtomicUsize::new(entries.len()),
            _marker: PhantomData,
        };
        Ok((journal, entries))
    }

    pub(crate) fn append(&self, entries: &[E]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let wal = self.wal.read();
        for entry in entries {
            wal.pending_writes(bincode::serialize(entry)?);
        }
        wal.write_all()?;
        self.entries.fetch_add(entries.len(), Ordering::Relaxed);
        Ok(())
    }

    /// `true` when the journal holds far more entries than `live` keys.
    pub(crate) fn needs_rewrite(&self, live: usize) -> bool {
        let entries = self.entries.load(Ordering::Relaxed);
        entries >= MIN_REWRITE_ENTRIES && entries > live.saturating_mul(INDEX_JOURNAL_REWRITE_RATIO)
    }

    /// Replace the journal contents with `snapshot`.
    ///
    /// The snapshot is written under a temporary extension, renamed into
    /// place, and only then are the old segments deleted; replaying both
    /// after a crash in between yields the same state.
    pub(crate) fn rewrite(&self, snapshot: &[E]) -> Result<()> {
        let mut slot = self.wal.write();
        let temp_ext = format!("{}{}", self.ext, TEMP_FILE_SUFFIX);
        let fresh = Wal::open_from(
            wal_options(&self.dir, &temp_ext),
            slot.active_segment_id() + 1,
        )?;
        for entry in snapshot {
            fresh.pending_writes(bincode::serialize(entry)?);
        }
        fresh.write_all()?;
        fresh.sync()?;
        fresh.rename_file_ext(&self.ext)?;
        let old = std::mem::replace(&mut *slot, fresh);
        old.delete()?;
        self.entries.store(snapshot.len(), Ordering::Relaxed);
        tracing::debug!(
            "rewrote index journal {:?}{} with {} entries",
            self.dir,
            self.ext,
            snapshot.len()
        );
        Ok(())
    }

    pub(crate) fn sync(&self) -> Result<()> {
        self.wal.read().sync()
    }

    pub(crate) fn close(&self) -> Result<()> {
        self.wal.read().close()
    }
}
