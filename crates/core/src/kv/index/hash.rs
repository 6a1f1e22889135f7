//! Hash-slot index.
//!
//! Each partition maps a 64-bit key hash to the positions of every key
//! sharing that hash. Keys themselves are not stored; a match function
//! reading the value log decides which slot belongs to which key.

use super::journal::Journal;
use super::{group_by_partition, Index, IndexOptions, MatchKeyFn, Remap};
use crate::error::{Error, Result};
use crate::kv::record::KeyPosition;
use crate::kv::wal::ChunkPosition;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Serialize, Deserialize)]
enum Entry {
    Put {
        hash: u64,
        position: ChunkPosition,
    },
    Delete {
        hash: u64,
        position: ChunkPosition,
    },
    Replace {
        hash: u64,
        old: ChunkPosition,
        new: ChunkPosition,
    },
}

type Buckets = HashMap<u64, Vec<ChunkPosition>>;

struct Partition {
    buckets: RwLock<Buckets>,
    journal: Journal<Entry>,
}

/// Index storing key hashes and slot positions only.
pub struct HashIndex {
    options: IndexOptions,
    partitions: Vec<Partition>,
}

fn apply(buckets: &mut Buckets, entry: Entry) {
    match entry {
        Entry::Put { hash, position } => {
            let slots = buckets.entry(hash).or_default();
            if !slots.contains(&position) {
                slots.push(position);
            }
        }
        Entry::Delete { hash, position } => {
            if let Some(slots) = buckets.get_mut(&hash) {
                slots.retain(|p| *p != position);
                if slots.is_empty() {
                    buckets.remove(&hash);
                }
            }
        }
        Entry::Replace { hash, old, new } => {
            let slots = buckets.entry(hash).or_default();
            match slots.iter_mut().find(|p| **p == old) {
                Some(slot) => *slot = new,
                None => slots.push(new),
            }
        }
    }
}

fn slot_count(buckets: &Buckets) -> usize {
    buckets.values().map(Vec::len).sum()
}

fn require<'a, 'b>(matcher: Option<&'a MatchKeyFn<'b>>) -> Result<&'a MatchKeyFn<'b>> {
    matcher.ok_or_else(|| Error::InvalidArgument("hash index requires a key matcher".into()))
}

impl HashIndex {
    pub fn open(options: IndexOptions) -> Result<Self> {
        let mut partitions = Vec::with_capacity(options.partition_num);
        for p in 0..options.partition_num {
            let (journal, entries) =
                Journal::open(&options.dir_path, &IndexOptions::journal_ext(p))?;
            let mut buckets = Buckets::new();
            for entry in entries {
                apply(&mut buckets, entry);
            }
            if journal.needs_rewrite(slot_count(&buckets)) {
                let snapshot: Vec<Entry> = buckets
                    .iter()
                    .flat_map(|(&hash, slots)| {
                        slots.iter().map(move |&position| Entry::Put { hash, position })
                    })
                    .collect();
                journal.rewrite(&snapshot)?;
            }
            partitions.push(Partition {
                buckets: RwLock::new(buckets),
                journal,
            });
        }
        Ok(Self {
            options,
            partitions,
        })
    }

    /// Find the slot in `slots` holding `key`.
    fn find_slot(
        key: &[u8],
        partition: u32,
        slots: &[ChunkPosition],
        matcher: &MatchKeyFn<'_>,
    ) -> Result<Option<usize>> {
        for (i, slot) in slots.iter().enumerate() {
            let candidate = KeyPosition {
                key: key.to_vec(),
                partition,
                position: *slot,
            };
            if matcher(&candidate)? {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }
}

impl Index for HashIndex {
    fn put_batch(
        &self,
        positions: &[KeyPosition],
        matcher: Option<&MatchKeyFn<'_>>,
    ) -> Result<Vec<KeyPosition>> {
        let matcher = require(matcher)?;
        let mut stale = Vec::new();
        for (p, group) in group_by_partition(&self.options, positions, |kp| kp.key.as_slice())
            .into_iter()
            .enumerate()
        {
            if group.is_empty() {
                continue;
            }
            let partition = &self.partitions[p];
            let mut buckets = partition.buckets.write();
            for kp in group {
                let hash = (self.options.key_hash)(&kp.key);
                let slots = buckets.get(&hash).map(Vec::as_slice).unwrap_or(&[]);
                let entry = match Self::find_slot(&kp.key, p as u32, slots, matcher)? {
                    Some(i) => {
                        let old = slots[i];
                        stale.push(KeyPosition {
                            key: kp.key.clone(),
                            partition: p as u32,
                            position: old,
                        });
                        Entry::Replace {
                            hash,
                            old,
                            new: kp.position,
                        }
                    }
                    None => Entry::Put {
                        hash,
                        position: kp.position,
                    },
                };
                partition.journal.append(std::slice::from_ref(&entry))?;
                apply(&mut buckets, entry);
            }
        }
        Ok(stale)
    }

    fn get(&self, key: &[u8], matcher: Option<&MatchKeyFn<'_>>) -> Result<Option<KeyPosition>> {
        let matcher = require(matcher)?;
        let p = self.options.partition_of(key);
        let hash = (self.options.key_hash)(key);
        let buckets = self.partitions[p].buckets.read();
        let Some(slots) = buckets.get(&hash) else {
            return Ok(None);
        };
        Ok(Self::find_slot(key, p as u32, slots, matcher)?.map(|i| KeyPosition {
            key: key.to_vec(),
            partition: p as u32,
            position: slots[i],
        }))
    }

    fn delete_batch(
        &self,
        keys: &[Vec<u8>],
        matcher: Option<&MatchKeyFn<'_>>,
    ) -> Result<Vec<KeyPosition>> {
        let matcher = require(matcher)?;
        let mut removed = Vec::new();
        for (p, group) in group_by_partition(&self.options, keys, |k| k.as_slice())
            .into_iter()
            .enumerate()
        {
            if group.is_empty() {
                continue;
            }
            let partition = &self.partitions[p];
            let mut buckets = partition.buckets.write();
            for key in group {
                let hash = (self.options.key_hash)(key);
                let Some(slots) = buckets.get(&hash) else {
                    continue;
                };
                if let Some(i) = Self::find_slot(key, p as u32, slots, matcher)? {
                    let position = slots[i];
                    let entry = Entry::Delete { hash, position };
                    partition.journal.append(std::slice::from_ref(&entry))?;
                    apply(&mut buckets, entry);
                    removed.push(KeyPosition {
                        key: key.clone(),
                        partition: p as u32,
                        position,
                    });
                }
            }
        }
        Ok(removed)
    }

    fn remap_batch(&self, remaps: &[Remap]) -> Result<usize> {
        let mut updated = 0;
        for (p, group) in group_by_partition(&self.options, remaps, |r| r.key.as_slice())
            .into_iter()
            .enumerate()
        {
            if group.is_empty() {
                continue;
            }
            let partition = &self.partitions[p];
            let mut buckets = partition.buckets.write();
            let mut entries = Vec::new();
            for r in group {
                let hash = (self.options.key_hash)(&r.key);
                if buckets.get(&hash).is_some_and(|slots| slots.contains(&r.old)) {
                    entries.push(Entry::Replace {
                        hash,
                        old: r.old,
                        new: r.new,
                    });
                }
            }
            partition.journal.append(&entries)?;
            updated += entries.len();
            for entry in entries {
                apply(&mut buckets, entry);
            }
        }
        Ok(updated)
    }

    fn sync(&self) -> Result<()> {
        for p in &self.partitions {
            p.journal.sync()?;
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        for p in &self.partitions {
            p.journal.close()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;
    use tempfile::TempDir;

    /// Every key collides; partition is always 0.
    fn colliding_hash(_: &[u8]) -> u64 {
        42
    }

    fn open(dir: &TempDir) -> HashIndex {
        HashIndex::open(IndexOptions {
            dir_path: dir.path().to_path_buf(),
            partition_num: 2,
            key_hash: colliding_hash,
        })
        .unwrap()
    }

    fn pos(block: u32) -> ChunkPosition {
        ChunkPosition {
            segment_id: 1,
            block_number: block,
            chunk_offset: 0,
            chunk_size: 8,
        }
    }

    fn kp(key: &str, block: u32) -> KeyPosition {
        KeyPosition {
            key: key.as_bytes().to_vec(),
            partition: 0,
            position: pos(block),
        }
    }

    /// Stands in for the value log: which key lives at which block.
    fn matcher_for<'a>(store: &'a Map<u32, &'static str>) -> impl Fn(&KeyPosition) -> Result<bool> + 'a {
        move |candidate: &KeyPosition| {
            Ok(store
                .get(&candidate.position.block_number)
                .is_some_and(|k| k.as_bytes() == candidate.key.as_slice()))
        }
    }

    #[test]
    fn test_requires_matcher() {
        let dir = TempDir::new().unwrap();
        let index = open(&dir);
        assert!(matches!(
            index.get(b"a", None),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_collisions_resolved_by_matcher() {
        let dir = TempDir::new().unwrap();
        let index = open(&dir);
        let mut store = Map::new();
        store.insert(1, "a");
        store.insert(2, "b");
        let m = matcher_for(&store);
        index.put_batch(&[kp("a", 1), kp("b", 2)], Some(&m)).unwrap();

        assert_eq!(index.get(b"a", Some(&m)).unwrap().unwrap().position, pos(1));
        assert_eq!(index.get(b"b", Some(&m)).unwrap().unwrap().position, pos(2));
        assert!(index.get(b"c", Some(&m)).unwrap().is_none());
    }

    #[test]
    fn test_overwrite_returns_stale_slot() {
        let dir = TempDir::new().unwrap();
        let index = open(&dir);
        let mut store = Map::new();
        store.insert(1, "a");
        store.insert(3, "a");
        let m = matcher_for(&store);
        index.put_batch(&[kp("a", 1)], Some(&m)).unwrap();
        let stale = index.put_batch(&[kp("a", 3)], Some(&m)).unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].position, pos(1));
        assert_eq!(index.get(b"a", Some(&m)).unwrap().unwrap().position, pos(3));
    }

    #[test]
    fn test_delete_and_reopen() {
        let dir = TempDir::new().unwrap();
        let mut store = Map::new();
        store.insert(1, "a");
        store.insert(2, "b");
        {
            let index = open(&dir);
            let m = matcher_for(&store);
            index.put_batch(&[kp("a", 1), kp("b", 2)], Some(&m)).unwrap();
            let removed = index.delete_batch(&[b"a".to_vec()], Some(&m)).unwrap();
            assert_eq!(removed.len(), 1);
            index.close().unwrap();
        }
        let index = open(&dir);
        let m = matcher_for(&store);
        assert!(index.get(b"a", Some(&m)).unwrap().is_none());
        assert!(index.get(b"b", Some(&m)).unwrap().is_some());
    }

    #[test]
    fn test_remap_by_position_identity() {
        let dir = TempDir::new().unwrap();
        let index = open(&dir);
        let mut store = Map::new();
        store.insert(1, "a");
        store.insert(7, "a");
        let m = matcher_for(&store);
        index.put_batch(&[kp("a", 1)], Some(&m)).unwrap();
        let updated = index
            .remap_batch(&[Remap {
                key: b"a".to_vec(),
                partition: 0,
                old: pos(1),
                new: pos(7),
            }])
            .unwrap();
        assert_eq!(updated, 1);
        assert_eq!(index.get(b"a", Some(&m)).unwrap().unwrap().position, pos(7));
    }
}
