//! Ordered-map index: one `BTreeMap<key, position>` per partition.

use super::journal::Journal;
use super::{group_by_partition, Index, IndexOptions, MatchKeyFn, Remap};
use crate::error::Result;
use crate::kv::record::KeyPosition;
use crate::kv::wal::ChunkPosition;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Serialize, Deserialize)]
enum Entry {
    Put {
        key: Vec<u8>,
        position: ChunkPosition,
    },
    Delete {
        key: Vec<u8>,
    },
}

struct Partition {
    map: RwLock<BTreeMap<Vec<u8>, ChunkPosition>>,
    journal: Journal<Entry>,
}

/// Index keeping full keys in ordered maps.
pub struct BTreeIndex {
    options: IndexOptions,
    partitions: Vec<Partition>,
}

impl BTreeIndex {
    pub fn open(options: IndexOptions) -> Result<Self> {
        let mut partitions = Vec::with_capacity(options.partition_num);
        for p in 0..options.partition_num {
            let (journal, entries) =
                Journal::open(&options.dir_path, &IndexOptions::journal_ext(p))?;
            let mut map = BTreeMap::new();
            for entry in entries {
                match entry {
                    Entry::Put { key, position } => {
                        map.insert(key, position);
                    }
                    Entry::Delete { key } => {
                        map.remove(&key);
                    }
                }
            }
            if journal.needs_rewrite(map.len()) {
                let snapshot: Vec<Entry> = map
                    .iter()
                    .map(|(key, position)| Entry::Put {
                        key: key.clone(),
                        position: *position,
                    })
                    .collect();
                journal.rewrite(&snapshot)?;
            }
            partitions.push(Partition {
                map: RwLock::new(map),
                journal,
            });
        }
        Ok(Self {
            options,
            partitions,
        })
    }

    /// Number of keys across all partitions.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.partitions.iter().map(|p| p.map.read().len()).sum()
    }
}

impl Index for BTreeIndex {
    fn put_batch(
        &self,
        positions: &[KeyPosition],
        _matcher: Option<&MatchKeyFn<'_>>,
    ) -> Result<Vec<KeyPosition>> {
        let mut stale = Vec::new();
        for (p, group) in group_by_partition(&self.options, positions, |kp| kp.key.as_slice())
            .into_iter()
            .enumerate()
        {
            if group.is_empty() {
                continue;
            }
            let partition = &self.partitions[p];
            let mut map = partition.map.write();
            let entries: Vec<Entry> = group
                .iter()
                .map(|kp| Entry::Put {
                    key: kp.key.clone(),
                    position: kp.position,
                })
                .collect();
            partition.journal.append(&entries)?;
            for kp in group {
                if let Some(old) = map.insert(kp.key.clone(), kp.position) {
                    stale.push(KeyPosition {
                        key: kp.key.clone(),
                        partition: p as u32,
                        position: old,
                    });
                }
            }
        }
        Ok(stale)
    }

    fn get(&self, key: &[u8], _matcher: Option<&MatchKeyFn<'_>>) -> Result<Option<KeyPosition>> {
        let p = self.options.partition_of(key);
        Ok(self.partitions[p]
            .map
            .read()
            .get(key)
            .map(|position| KeyPosition {
                key: key.to_vec(),
                partition: p as u32,
                position: *position,
            }))
    }

    fn delete_batch(
        &self,
        keys: &[Vec<u8>],
        _matcher: Option<&MatchKeyFn<'_>>,
    ) -> Result<Vec<KeyPosition>> {
        let mut removed = Vec::new();
        for (p, group) in group_by_partition(&self.options, keys, |k| k.as_slice())
            .into_iter()
            .enumerate()
        {
            if group.is_empty() {
                continue;
            }
            let partition = &self.partitions[p];
            let mut map = partition.map.write();
            let entries: Vec<Entry> = group
                .iter()
                .filter(|k| map.contains_key(k.as_slice()))
                .map(|k| Entry::Delete { key: (*k).clone() })
                .collect();
            partition.journal.append(&entries)?;
            for key in group {
                if let Some(position) = map.remove(key.as_slice()) {
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
            let mut map = partition.map.write();
            let live: Vec<&Remap> = group
                .into_iter()
                .filter(|r| map.get(&r.key) == Some(&r.old))
                .collect();
            let entries: Vec<Entry> = live
                .iter()
                .map(|r| Entry::Put {
                    key: r.key.clone(),
                    position: r.new,
                })
                .collect();
            partition.journal.append(&entries)?;
            for r in live {
                map.insert(r.key.clone(), r.new);
                updated += 1;
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
