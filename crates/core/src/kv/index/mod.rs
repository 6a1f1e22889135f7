//! Key → value-log position index.
//!
//! Two variants share one contract: [`BTreeIndex`] keeps full keys in an
//! ordered map; [`HashIndex`] keeps only key hashes and relies on a match
//! function probing the value log to tell colliding keys apart. Both are
//! partitioned the same way as the value log and persisted through
//! append-only journals.

/// Ordered-map index variant.
pub mod btree;
/// Hash-slot index variant.
pub mod hash;
mod journal;

pub use btree::BTreeIndex;
pub use hash::HashIndex;

use super::options::{IndexType, KeyHashFn, Options};
use super::record::KeyPosition;
use super::wal::ChunkPosition;
use crate::config::{INDEX_DIR, INDEX_FILE_EXT};
use crate::error::Result;
use std::path::PathBuf;

/// Answers "does the record stored at `candidate.position` carry `candidate.key`".
pub type MatchKeyFn<'a> = dyn Fn(&KeyPosition) -> Result<bool> + 'a;

/// Position update produced by compaction.
#[derive(Debug, Clone)]
pub struct Remap {
    pub key: Vec<u8>,
    pub partition: u32,
    pub old: ChunkPosition,
    pub new: ChunkPosition,
}

/// Contract shared by the index variants.
pub trait Index: Send + Sync {
    /// Insert or overwrite positions, returning the positions they replaced.
    fn put_batch(
        &self,
        positions: &[KeyPosition],
        matcher: Option<&MatchKeyFn<'_>>,
    ) -> Result<Vec<KeyPosition>>;

    /// Current position of `key`.
    fn get(&self, key: &[u8], matcher: Option<&MatchKeyFn<'_>>) -> Result<Option<KeyPosition>>;

    /// Remove keys, returning the positions that were removed.
    fn delete_batch(
        &self,
        keys: &[Vec<u8>],
        matcher: Option<&MatchKeyFn<'_>>,
    ) -> Result<Vec<KeyPosition>>;

    /// Move keys to new positions, only where they still point at `old`.
    ///
    /// Returns how many entries were updated.
    fn remap_batch(&self, remaps: &[Remap]) -> Result<usize>;

    fn sync(&self) -> Result<()>;

    fn close(&self) -> Result<()>;
}

/// Settings shared by both variants.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub dir_path: PathBuf,
    pub partition_num: usize,
    pub key_hash: KeyHashFn,
}

impl IndexOptions {
    pub fn from_db_options(options: &Options) -> Self {
        Self {
            dir_path: options.dir_path.join(INDEX_DIR),
            partition_num: options.partition_num,
            key_hash: options.key_hash,
        }
    }

    pub(crate) fn partition_of(&self, key: &[u8]) -> usize {
        ((self.key_hash)(key) % self.partition_num as u64) as usize
    }

    pub(crate) fn journal_ext(partition: usize) -> String {
        format!("{}.{}", INDEX_FILE_EXT, partition)
    }
}

/// Open the index variant selected by `options.index_type`.
pub fn open_index(options: &Options) -> Result<Box<dyn Index>> {
    let index_options = IndexOptions::from_db_options(options);
    Ok(match options.index_type {
        IndexType::BTree => Box::new(BTreeIndex::open(index_options)?),
        IndexType::Hash => Box::new(HashIndex::open(index_options)?),
    })
}

/// Group items by index partition, keeping their original order.
pub(crate) fn group_by_partition<'a, T, F>(
    options: &IndexOptions,
    items: &'a [T],
    key_of: F,
) -> Vec<Vec<&'a T>>
where
    F: Fn(&T) -> &[u8],
{
    let mut groups: Vec<Vec<&T>> = vec![Vec::new(); options.partition_num];
    for item in items {
        groups[options.partition_of(key_of(item))].push(item);
    }
    groups
}
