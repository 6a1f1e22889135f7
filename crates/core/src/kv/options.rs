//! Runtime options for the key-value engine.

use crate::config;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Hash function mapping a key to its value-log and index partition.
pub type KeyHashFn = fn(&[u8]) -> u64;

/// Default key hash: xxh3-64.
pub fn default_key_hash(key: &[u8]) -> u64 {
    xxhash_rust::xxh3::xxh3_64(key)
}

/// Which on-disk index variant stores key positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexType {
    /// Ordered map per partition.
    #[default]
    BTree,
    /// Hash table per partition that stores key hashes only.
    Hash,
}

/// Options for opening a [`Db`](super::Db).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Database directory.
    pub dir_path: PathBuf,
    /// Size in bytes at which the active memtable is rotated.
    pub memtable_size: usize,
    /// Maximum number of memtables, active one included.
    pub memtable_nums: usize,
    /// Number of value-log and index partitions.
    pub partition_num: usize,
    /// Index variant.
    pub index_type: IndexType,
    /// Segment size of value-log partitions.
    pub value_log_file_size: u64,
    /// Number of surviving records rewritten per batch during compaction.
    pub compact_batch_count: usize,
    /// Fsync memtable WAL writes.
    pub sync: bool,
    /// Fsync memtable WALs after this many bytes. 0 disables.
    pub bytes_per_sync: u32,
    /// How long a writer waits for memtable space.
    #[serde(with = "duration_millis")]
    pub wait_memtable_space_timeout: Duration,
    /// Partition hash function.
    #[serde(skip, default = "default_hash_fn")]
    pub key_hash: KeyHashFn,
}

fn default_hash_fn() -> KeyHashFn {
    default_key_hash
}

impl Default for Options {
    fn default() -> Self {
        Self {
            dir_path: std::env::temp_dir().join("vectorkv"),
            memtable_size: config::DEFAULT_MEMTABLE_SIZE,
            memtable_nums: config::DEFAULT_MEMTABLE_NUMS,
            partition_num: config::DEFAULT_PARTITION_NUM,
            index_type: IndexType::BTree,
            value_log_file_size: config::DEFAULT_SEGMENT_SIZE,
            compact_batch_count: config::DEFAULT_COMPACT_BATCH_COUNT,
            sync: false,
            bytes_per_sync: 0,
            wait_memtable_space_timeout: config::DEFAULT_WAIT_MEMTABLE_SPACE_TIMEOUT,
            key_hash: default_key_hash,
        }
    }
}

impl Options {
    /// Reject option combinations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.dir_path.as_os_str().is_empty() {
            return Err(Error::InvalidOptions("dir_path is empty".into()));
        }
        if self.memtable_size == 0 {
            return Err(Error::InvalidOptions("memtable_size must be positive".into()));
        }
        if self.memtable_nums < 2 {
            return Err(Error::InvalidOptions(
                "memtable_nums must be at least 2".into(),
            ));
        }
        if self.partition_num == 0 {
            return Err(Error::InvalidOptions("partition_num must be positive".into()));
        }
        if self.compact_batch_count == 0 {
            return Err(Error::InvalidOptions(
                "compact_batch_count must be positive".into(),
            ));
        }
        if self.value_log_file_size <= config::CHUNK_HEADER_SIZE as u64 {
            return Err(Error::InvalidOptions(
                "value_log_file_size too small".into(),
            ));
        }
        Ok(())
    }

    /// Partition owning `key`.
    pub fn partition_of(&self, key: &[u8]) -> u32 {
        ((self.key_hash)(key) % self.partition_num as u64) as u32
    }
}

/// Per-write durability options.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct WriteOptions {
    /// Fsync the memtable WAL before acknowledging the write.
    pub sync: bool,
    /// Skip the memtable WAL entirely; unflushed writes are lost on crash.
    pub disable_wal: bool,
}

/// Options for a [`Batch`](super::Batch).
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct BatchOptions {
    /// Durability of the commit.
    pub write: WriteOptions,
    /// Reject puts and deletes.
    pub read_only: bool,
}

mod duration_millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
