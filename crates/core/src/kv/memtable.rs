//! In-memory sorted write buffer backed by its own WAL.
//!
//! A memtable is Active while it accepts writes, Immutable once rotated out
//! and queued for flushing, and Flushed when its contents have reached the
//! value log and index and its WAL has been deleted.

use super::options::WriteOptions;
use super::record::{LogRecord, LogRecordType};
use super::wal::{Wal, WalOptions};
use crate::config::MEMTABLE_FILE_EXT;
use crate::error::Result;
use crossbeam_skiplist::SkipMap;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Value stored in the skip list for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemValue {
    pub value: Vec<u8>,
    pub kind: LogRecordType,
    /// Id of the batch that wrote this value.
    pub sequence: u64,
}

impl MemValue {
    pub fn is_tombstone(&self) -> bool {
        self.kind == LogRecordType::Deleted
    }
}

/// Settings shared by every memtable of a database.
#[derive(Debug, Clone)]
pub struct MemtableOptions {
    pub dir_path: PathBuf,
    pub memtable_size: usize,
    pub sync: bool,
    pub bytes_per_sync: u32,
}

/// A skip list of recent writes plus the WAL that makes them durable.
pub struct Memtable {
    id: u32,
    wal: Wal,
    skl: SkipMap<Vec<u8>, MemValue>,
    size: AtomicUsize,
    memtable_size: usize,
    wal_sync: bool,
}

fn wal_ext(table_id: u32) -> String {
    format!("{}.{}", MEMTABLE_FILE_EXT, table_id)
}

/// Ids of every memtable WAL present in `dir`, ascending.
pub fn list_table_ids(dir: &Path) -> Result<Vec<u32>> {
    let mut ids = Vec::new();
    if !dir.exists() {
        return Ok(ids);
    }
    let marker = format!("{}.", MEMTABLE_FILE_EXT);
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some((segment, table)) = name.split_once(marker.as_str()) else {
            continue;
        };
        if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        if let Ok(id) = table.parse::<u32>() {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    ids.dedup();
    Ok(ids)
}

impl Memtable {
    /// Open memtable `table_id`, replaying any committed batches from its WAL.
    pub fn open(options: &MemtableOptions, table_id: u32) -> Result<Self> {
        let wal = Wal::open(WalOptions {
            dir_path: options.dir_path.clone(),
            segment_size: u64::MAX,
            segment_file_ext: wal_ext(table_id),
            sync: options.sync,
            bytes_per_sync: options.bytes_per_sync,
        })?;

        let table = Self {
            id: table_id,
            wal,
            skl: SkipMap::new(),
            size: AtomicUsize::new(0),
            memtable_size: options.memtable_size,
            wal_sync: options.sync,
        };
        table.replay()?;
        Ok(table)
    }

    fn replay(&self) -> Result<()> {
        let mut in_flight: HashMap<u64, Vec<LogRecord>> = HashMap::new();
        let mut applied = 0usize;
        for item in self.wal.reader()? {
            let (data, _) = item?;
            let record = LogRecord::decode(&data)?;
            match record.kind {
                LogRecordType::BatchFinished => {
                    if let Some(records) = in_flight.remove(&record.batch_id) {
                        applied += records.len();
                        for r in records {
                            self.apply(r.key, r.value, r.kind, r.batch_id);
                        }
                    }
                }
                _ => in_flight.entry(record.batch_id).or_default().push(record),
            }
        }
        if !in_flight.is_empty() {
            tracing::warn!(
                "memtable {}: discarded {} unfinished batch(es) during replay",
                self.id,
                in_flight.len()
            );
        }
        if applied > 0 {
            tracing::debug!("memtable {}: replayed {} records", self.id, applied);
        }
        Ok(())
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Write a batch: WAL first (unless disabled), then the skip list.
    pub fn put_batch<'a, I>(&self, records: I, batch_id: u64, options: &WriteOptions) -> Result<()>
    where
        I: IntoIterator<Item = &'a LogRecord> + Clone,
    {
        if !options.disable_wal {
            for record in records.clone() {
                let mut record = record.clone();
                record.batch_id = batch_id;
                self.wal.pending_writes(record.encode()?);
            }
            self.wal
                .pending_writes(LogRecord::batch_finished(batch_id).encode()?);
            self.wal.write_all()?;
            if options.sync && !self.wal_sync {
                self.wal.sync()?;
            }
        }
        for record in records {
            self.apply(record.key.clone(), record.value.clone(), record.kind, batch_id);
        }
        Ok(())
    }

    fn apply(&self, key: Vec<u8>, value: Vec<u8>, kind: LogRecordType, sequence: u64) {
        self.size.fetch_add(key.len() + value.len(), Ordering::Relaxed);
        self.skl.insert(
            key,
            MemValue {
                value,
                kind,
                sequence,
            },
        );
    }

    /// Latest value for `key`, tombstones included.
    pub fn get(&self, key: &[u8]) -> Option<MemValue> {
        self.skl.get(key).map(|e| e.value().clone())
    }

    pub fn is_full(&self) -> bool {
        self.size.load(Ordering::Relaxed) >= self.memtable_size
    }

    pub fn is_empty(&self) -> bool {
        self.skl.is_empty()
    }

    /// Approximate bytes of keys and values written.
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Entries in ascending key order.
    pub fn entries(&self) -> impl Iterator<Item = (Vec<u8>, MemValue)> + '_ {
        self.skl
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
    }

    pub fn sync(&self) -> Result<()> {
        self.wal.sync()
    }

    pub fn close(&self) -> Result<()> {
        self.wal.close()
    }

    /// Remove the WAL once the contents are durable elsewhere.
    pub fn delete_wal(&self) -> Result<()> {
        self.wal.delete()
    }
}
