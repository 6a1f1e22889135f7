//! Partitioned value log.
//!
//! Flushed key/value pairs are appended to one of `partition_num` logs chosen
//! by `hash(key) % partition_num`. The index stores where each key's newest
//! record lives; older records stay behind until compaction rewrites the
//! partition.

use super::options::KeyHashFn;
use super::record::{KeyPosition, ValueLogRecord};
use super::wal::{Reader, Wal, WalOptions};
use crate::config::{TEMP_FILE_SUFFIX, VLOG_FILE_EXT};
use crate::error::{Error, Result};
use parking_lot::RwLock;
use rayon::prelude::*;
use std::fs;
use std::path::PathBuf;

/// Settings for opening a [`ValueLog`].
#[derive(Debug, Clone)]
pub struct ValueLogOptions {
    pub dir_path: PathBuf,
    pub segment_size: u64,
    pub partition_num: usize,
    pub key_hash: KeyHashFn,
}

/// One WAL per partition.
pub struct ValueLog {
    partitions: Vec<RwLock<Wal>>,
    options: ValueLogOptions,
}

pub(crate) fn partition_ext(partition: usize) -> String {
    format!("{}.{}", VLOG_FILE_EXT, partition)
}

pub(crate) fn temp_partition_ext(partition: usize) -> String {
    format!("{}{}", partition_ext(partition), TEMP_FILE_SUFFIX)
}

impl ValueLog {
    /// Open every partition, discarding leftovers of an interrupted compaction.
    pub fn open(options: ValueLogOptions) -> Result<Self> {
        fs::create_dir_all(&options.dir_path)?;
        for entry in fs::read_dir(&options.dir_path)? {
            let entry = entry?;
            let name = entry.file_name();
            if name
                .to_str()
                .is_some_and(|n| n.ends_with(TEMP_FILE_SUFFIX))
            {
                tracing::warn!("removing stale compaction file {:?}", entry.path());
                fs::remove_file(entry.path())?;
            }
        }

        let mut partitions = Vec::with_capacity(options.partition_num);
        for p in 0..options.partition_num {
            partitions.push(RwLock::new(Wal::open(WalOptions {
                dir_path: options.dir_path.clone(),
                segment_size: options.segment_size,
                segment_file_ext: partition_ext(p),
                sync: false,
                bytes_per_sync: 0,
            })?));
        }
        Ok(Self {
            partitions,
            options,
        })
    }

    pub fn partition_num(&self) -> usize {
        self.partitions.len()
    }

    /// Partition owning `key`.
    pub fn partition_of(&self, key: &[u8]) -> u32 {
        ((self.options.key_hash)(key) % self.partitions.len() as u64) as u32
    }

    fn partition(&self, partition: u32) -> Result<&RwLock<Wal>> {
        self.partitions
            .get(partition as usize)
            .ok_or_else(|| Error::Corrupted(format!("partition {partition} out of range")))
    }

    /// Read the record stored at `pos`.
    pub fn read(&self, pos: &KeyPosition) -> Result<ValueLogRecord> {
        let data = self.partition(pos.partition)?.read().read(&pos.position)?;
        ValueLogRecord::decode(&data)
    }

    /// Append records, one `write_all` per partition, partitions in parallel.
    ///
    /// Returned positions follow partition order, not input order.
    pub fn write_batch(&self, records: &[ValueLogRecord]) -> Result<Vec<KeyPosition>> {
        let mut groups: Vec<Vec<&ValueLogRecord>> = vec![Vec::new(); self.partitions.len()];
        for record in records {
            groups[self.partition_of(&record.key) as usize].push(record);
        }

        let per_partition: Vec<Result<Vec<KeyPosition>>> = groups
            .par_iter()
            .enumerate()
            .filter(|(_, group)| !group.is_empty())
            .map(|(p, group)| {
                let wal = self.partitions[p].read();
                for record in group {
                    wal.pending_writes(record.encode()?);
                }
                let positions = wal.write_all()?;
                Ok(group
                    .iter()
                    .zip(positions)
                    .map(|(record, position)| KeyPosition {
                        key: record.key.clone(),
                        partition: p as u32,
                        position,
                    })
                    .collect())
            })
            .collect();

        let mut out = Vec::with_capacity(records.len());
        for result in per_partition {
            out.extend(result?);
        }
        Ok(out)
    }

    /// Reader over every record of one partition.
    pub fn reader(&self, partition: u32) -> Result<Reader> {
        self.partition(partition)?.read().reader()
    }

    /// Open an empty log for rewriting `partition`.
    ///
    /// Its segment ids start after the partition's active segment so the two
    /// logs can coexist under the same extension.
    pub(crate) fn open_rewrite(&self, partition: u32) -> Result<Wal> {
        let first = self.partition(partition)?.read().active_segment_id() + 1;
        Wal::open_from(
            WalOptions {
                dir_path: self.options.dir_path.clone(),
                segment_size: self.options.segment_size,
                segment_file_ext: temp_partition_ext(partition as usize),
                sync: false,
                bytes_per_sync: 0,
            },
            first,
        )
    }

    /// Promote a rewritten log: give its files the partition extension.
    ///
    /// The old log keeps serving reads until [`swap_partition`](ValueLog::swap_partition).
    pub(crate) fn promote_rewrite(&self, partition: u32, rewrite: &Wal) -> Result<()> {
        rewrite.sync()?;
        rewrite.rename_file_ext(&partition_ext(partition as usize))
    }

    /// Replace the partition's log with `rewrite` and delete the old files.
    pub(crate) fn swap_partition(&self, partition: u32, rewrite: Wal) -> Result<()> {
        let mut slot = self.partition(partition)?.write();
        let old = std::mem::replace(&mut *slot, rewrite);
        old.delete()
    }

    pub fn sync(&self) -> Result<()> {
        for p in &self.partitions {
            p.read().sync()?;
        }
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        for p in &self.partitions {
            p.read().close()?;
        }
        Ok(())
    }
}
