//! Database orchestration: memtable rotation, background flushing, reads
//! across the LSM layers and value-log compaction.
//!
//! Writes land in the active memtable. Once it fills up it is rotated into
//! the immutable queue and a background thread moves its contents into the
//! value log and the index. Reads consult the memtables newest first, then
//! the index and the value log.
//!
//! Lock order is `flush_lock` → `state` → value-log partition. Writers never
//! take `flush_lock`, and a writer waiting for memtable space releases `state`
//! before it blocks.

use super::batch::Batch;
use super::idgen::IdGenerator;
use super::index::{open_index, Index, MatchKeyFn, Remap};
use super::memtable::{list_table_ids, Memtable, MemtableOptions};
use super::options::{BatchOptions, Options, WriteOptions};
use super::record::{KeyPosition, LogRecord, ValueLogRecord};
use super::vlog::{ValueLog, ValueLogOptions};
use super::wal::{max_data_write_size, Wal};
use crate::config::{FILE_LOCK_NAME, FLUSH_SHUTDOWN_TIMEOUT, VLOG_DIR};
use crate::error::{Error, Result};
use crossbeam_channel::{Receiver, Sender};
use fs2::FileExt;
use parking_lot::{Condvar, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

/// The active memtable plus the immutables waiting to be flushed.
pub(crate) struct MemtableSet {
    active: Arc<Memtable>,
    /// Oldest first.
    immutables: Vec<Arc<Memtable>>,
    next_table_id: u32,
}

impl MemtableSet {
    /// Newest to oldest.
    fn newest_first(&self) -> impl Iterator<Item = &Arc<Memtable>> {
        std::iter::once(&self.active).chain(self.immutables.iter().rev())
    }
}

enum FlushSignal {
    Flush,
    Shutdown,
}

struct FlushWorker {
    handle: JoinHandle<()>,
    exited: Receiver<()>,
}

struct Inner {
    options: Options,
    memtable_options: MemtableOptions,
    state: RwLock<MemtableSet>,
    flush_lock: Mutex<()>,
    /// Bumped after every memtable leaves the immutable queue.
    flush_generation: Mutex<u64>,
    flushed: Condvar,
    flush_tx: Sender<FlushSignal>,
    vlog: ValueLog,
    index: Box<dyn Index>,
    batch_ids: IdGenerator,
    closed: AtomicBool,
    lock_file: File,
}

/// An embedded key-value store.
pub struct Db {
    inner: Arc<Inner>,
    worker: Mutex<Option<FlushWorker>>,
}

impl Db {
    /// Open (or create) the database at `options.dir_path`.
    ///
    /// Fails with `DirectoryLocked` if another handle owns the directory.
    /// Memtable WALs left behind are replayed; all but the newest are
    /// flushed before this returns.
    pub fn open(options: Options) -> Result<Self> {
        options.validate()?;
        fs::create_dir_all(&options.dir_path)?;

        let lock_path = options.dir_path.join(FILE_LOCK_NAME);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(Error::DirectoryLocked(
                options.dir_path.display().to_string(),
            ));
        }

        let vlog = ValueLog::open(ValueLogOptions {
            dir_path: options.dir_path.join(VLOG_DIR),
            segment_size: options.value_log_file_size,
            partition_num: options.partition_num,
            key_hash: options.key_hash,
        })?;
        let index = open_index(&options)?;

        let memtable_options = MemtableOptions {
            dir_path: options.dir_path.clone(),
            memtable_size: options.memtable_size,
            sync: options.sync,
            bytes_per_sync: options.bytes_per_sync,
        };
        let mut tables = Vec::new();
        for id in list_table_ids(&options.dir_path)? {
            tables.push(Arc::new(Memtable::open(&memtable_options, id)?));
        }
        let active = match tables.pop() {
            Some(table) => table,
            None => Arc::new(Memtable::open(&memtable_options, 1)?),
        };
        let next_table_id = active.id() + 1;
        let recovered = tables.len();

        let (flush_tx, flush_rx) = crossbeam_channel::unbounded();
        let inner = Arc::new(Inner {
            options,
            memtable_options,
            state: RwLock::new(MemtableSet {
                active,
                immutables: tables,
                next_table_id,
            }),
            flush_lock: Mutex::new(()),
            flush_generation: Mutex::new(0),
            flushed: Condvar::new(),
            flush_tx,
            vlog,
            index,
            batch_ids: IdGenerator::default(),
            closed: AtomicBool::new(false),
            lock_file,
        });

        if recovered > 0 {
            tracing::info!("Flushing {} recovered memtables", recovered);
            inner.flush_immutables()?;
        }

        let (exited_tx, exited_rx) = crossbeam_channel::bounded(1);
        let worker_inner = Arc::clone(&inner);
        let handle = std::thread::Builder::new()
            .name("vectorkv-flush".into())
            .spawn(move || run_flusher(worker_inner, flush_rx, exited_tx))?;

        tracing::info!(
            "Opened database at {:?} ({} partitions, {:?} index)",
            inner.options.dir_path,
            inner.options.partition_num,
            inner.options.index_type
        );
        Ok(Self {
            inner,
            worker: Mutex::new(Some(FlushWorker {
                handle,
                exited: exited_rx,
            })),
        })
    }

    pub fn options(&self) -> &Options {
        &self.inner.options
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.put_with_options(key, value, WriteOptions::default())
    }

    pub fn put_with_options(&self, key: &[u8], value: &[u8], options: WriteOptions) -> Result<()> {
        let mut batch = self.new_batch(BatchOptions {
            write: options,
            read_only: false,
        });
        batch.put(key, value)?;
        batch.commit()
    }

    /// Latest value of `key`, or `KeyNotFound`.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        if self.is_closed() {
            return Err(Error::DbClosed);
        }
        self.lookup(&self.read_state(), key)?
            .ok_or(Error::KeyNotFound)
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.delete_with_options(key, WriteOptions::default())
    }

    pub fn delete_with_options(&self, key: &[u8], options: WriteOptions) -> Result<()> {
        let mut batch = self.new_batch(BatchOptions {
            write: options,
            read_only: false,
        });
        batch.delete(key)?;
        batch.commit()
    }

    pub fn exist(&self, key: &[u8]) -> Result<bool> {
        match self.get(key) {
            Ok(_) => Ok(true),
            Err(Error::KeyNotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Start a batch. A read-only batch holds the shared lock until it is
    /// committed or dropped; do not write through `self` on the same thread
    /// meanwhile.
    pub fn new_batch(&self, options: BatchOptions) -> Batch<'_> {
        Batch::new(self, options)
    }

    /// Fsync the active memtable, the value log and the index.
    pub fn sync(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::DbClosed);
        }
        self.read_state().active.sync()?;
        self.inner.vlog.sync()?;
        self.inner.index.sync()
    }

    /// Rotate the active memtable (if it holds anything) and flush every
    /// immutable memtable before returning.
    pub fn flush(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::DbClosed);
        }
        {
            let mut state = self.inner.state.write();
            if !state.active.is_empty() {
                self.inner.rotate(&mut state)?;
            }
        }
        self.inner.flush_immutables()
    }

    /// Number of memtables waiting to be flushed.
    pub fn immutable_count(&self) -> usize {
        self.read_state().immutables.len()
    }

    /// Rewrite every value-log partition keeping only the records the index
    /// still points at.
    ///
    /// All partitions are rewritten in parallel first. If any of them fails
    /// nothing is swapped in and the first error is returned; otherwise each
    /// partition's rewritten log replaces the old one.
    pub fn compact(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::DbClosed);
        }
        let inner = &*self.inner;
        let _flush = inner.flush_lock.lock();
        let started = Instant::now();

        let partitions = inner.vlog.partition_num() as u32;
        let results: Vec<Result<(Wal, Vec<Remap>)>> = (0..partitions)
            .into_par_iter()
            .map(|p| inner.rewrite_partition(p))
            .collect();

        let mut rewrites = Vec::with_capacity(results.len());
        let mut first_error = None;
        for (p, result) in results.into_iter().enumerate() {
            match result {
                Ok(rewrite) => rewrites.push((p as u32, rewrite)),
                Err(e) => {
                    tracing::warn!("compaction of partition {} failed: {}", p, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            for (_, (wal, _)) in rewrites {
                if let Err(cleanup) = wal.delete() {
                    tracing::warn!("failed to remove rewrite log: {}", cleanup);
                }
            }
            return Err(e);
        }

        let _state = inner.state.write();
        let mut kept = 0;
        for (p, (wal, remaps)) in rewrites {
            inner.vlog.promote_rewrite(p, &wal)?;
            inner.index.remap_batch(&remaps)?;
            inner.index.sync()?;
            inner.vlog.swap_partition(p, wal)?;
            kept += remaps.len();
        }
        tracing::info!(
            "Compacted {} partitions, kept {} records in {:.1}ms",
            partitions,
            kept,
            started.elapsed().as_secs_f64() * 1000.0
        );
        Ok(())
    }

    /// Stop the flush thread and close every file. Idempotent.
    ///
    /// Memtables are not flushed; their WALs are replayed on the next open.
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(worker) = self.worker.lock().take() {
            if self.inner.flush_tx.send(FlushSignal::Shutdown).is_err() {
                tracing::debug!("flush thread already stopped");
            }
            match worker.exited.recv_timeout(FLUSH_SHUTDOWN_TIMEOUT) {
                Ok(()) => {
                    if worker.handle.join().is_err() {
                        tracing::warn!("flush thread panicked");
                    }
                }
                Err(_) => tracing::warn!("flush thread did not stop in time, detaching it"),
            }
        }

        // Every file is closed even after a failure; the first error wins.
        let mut result = Ok(());
        let mut record = |what: &str, outcome: Result<()>| {
            if let Err(e) = outcome {
                tracing::warn!("failed to close {}: {}", what, e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        };
        let state = self.inner.state.write();
        for table in state.newest_first() {
            record("memtable", table.close());
        }
        record("value log", self.inner.vlog.close());
        record("index", self.inner.index.close());
        record(
            "directory lock",
            FileExt::unlock(&self.inner.lock_file).map_err(Error::from),
        );
        drop(state);
        if result.is_ok() {
            tracing::info!("Closed database at {:?}", self.inner.options.dir_path);
        }
        result
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Shared lock on the memtable set. Recursive so a thread holding a
    /// read-only batch can still issue plain reads.
    pub(crate) fn read_state(&self) -> RwLockReadGuard<'_, MemtableSet> {
        self.inner.state.read_recursive()
    }

    pub(crate) fn lookup(&self, state: &MemtableSet, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.lookup(state, key)
    }

    pub(crate) fn apply_batch(
        &self,
        records: &HashMap<Vec<u8>, LogRecord>,
        options: &WriteOptions,
    ) -> Result<()> {
        let state = self.inner.wait_memtable_space()?;
        let batch_id = self.inner.batch_ids.next_id();
        state.active.put_batch(records.values(), batch_id, options)
    }

    #[cfg(test)]
    pub(crate) fn lock_flushing(&self) -> parking_lot::MutexGuard<'_, ()> {
        self.inner.flush_lock.lock()
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("error closing database: {}", e);
        }
    }
}

fn run_flusher(inner: Arc<Inner>, signals: Receiver<FlushSignal>, exited: Sender<()>) {
    while let Ok(FlushSignal::Flush) = signals.recv() {
        if inner.closed.load(Ordering::SeqCst) {
            break;
        }
        if let Err(e) = inner.flush_immutables() {
            tracing::warn!("memtable flush failed, will retry on next signal: {}", e);
        }
    }
    let _ = exited.send(());
}

/// Split `records` into runs whose encoded size fits one segment.
fn chunk_by_size(records: Vec<ValueLogRecord>, limit: u64) -> Vec<Vec<ValueLogRecord>> {
    let mut chunks = Vec::new();
    let mut current = Vec::new();
    let mut size = 0u64;
    for record in records {
        let cost = max_data_write_size((record.key.len() + record.value.len() + 16) as u64);
        if !current.is_empty() && size + cost > limit {
            chunks.push(std::mem::take(&mut current));
            size = 0;
        }
        size += cost;
        current.push(record);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

impl Inner {
    fn key_matcher(&self) -> impl Fn(&KeyPosition) -> Result<bool> + '_ {
        move |candidate: &KeyPosition| Ok(self.vlog.read(candidate)?.key == candidate.key)
    }

    fn lookup(&self, state: &MemtableSet, key: &[u8]) -> Result<Option<Vec<u8>>> {
        for table in state.newest_first() {
            if let Some(value) = table.get(key) {
                return Ok((!value.is_tombstone()).then_some(value.value));
            }
        }
        let matcher = self.key_matcher();
        match self.index.get(key, Some(&matcher as &MatchKeyFn<'_>))? {
            Some(position) => Ok(Some(self.vlog.read(&position)?.value)),
            None => Ok(None),
        }
    }

    /// Move the active memtable to the immutable queue and open a fresh one.
    fn rotate(&self, state: &mut MemtableSet) -> Result<()> {
        let fresh = Arc::new(Memtable::open(&self.memtable_options, state.next_table_id)?);
        state.next_table_id += 1;
        let old = std::mem::replace(&mut state.active, fresh);
        tracing::debug!("rotated memtable {} ({} bytes)", old.id(), old.size());
        state.immutables.push(old);
        let _ = self.flush_tx.send(FlushSignal::Flush);
        Ok(())
    }

    /// Exclusive lock on the memtable set with room in the active memtable.
    ///
    /// When every memtable is full the lock is released while waiting for the
    /// flusher; after `wait_memtable_space_timeout` this gives up.
    fn wait_memtable_space(&self) -> Result<RwLockWriteGuard<'_, MemtableSet>> {
        let deadline = Instant::now() + self.options.wait_memtable_space_timeout;
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(Error::DbClosed);
            }
            let mut state = self.state.write();
            if !state.active.is_full() {
                return Ok(state);
            }
            if state.immutables.len() + 1 < self.options.memtable_nums {
                self.rotate(&mut state)?;
                return Ok(state);
            }

            let seen = *self.flush_generation.lock();
            drop(state);
            let _ = self.flush_tx.send(FlushSignal::Flush);
            let mut generation = self.flush_generation.lock();
            while *generation == seen {
                if self.flushed.wait_until(&mut generation, deadline).timed_out() {
                    return Err(Error::WaitMemtableSpaceTimeOut);
                }
            }
        }
    }

    /// Flush immutable memtables oldest first, stopping at the first failure.
    fn flush_immutables(&self) -> Result<()> {
        let _flush = self.flush_lock.lock();
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Ok(());
            }
            let Some(table) = self.state.read().immutables.first().cloned() else {
                return Ok(());
            };
            self.flush_memtable(&table)?;
            self.state
                .write()
                .immutables
                .retain(|t| t.id() != table.id());
            *self.flush_generation.lock() += 1;
            self.flushed.notify_all();
        }
    }

    /// Live records go to the value log and index, tombstones leave the
    /// index, then the memtable's WAL is deleted.
    fn flush_memtable(&self, table: &Memtable) -> Result<()> {
        let mut live = Vec::new();
        let mut deleted = Vec::new();
        for (key, value) in table.entries() {
            if value.is_tombstone() {
                deleted.push(key);
            } else {
                live.push(ValueLogRecord {
                    key,
                    value: value.value,
                });
            }
        }
        let (written, removed) = (live.len(), deleted.len());

        let mut positions = Vec::with_capacity(live.len());
        for chunk in chunk_by_size(live, self.options.value_log_file_size) {
            positions.extend(self.vlog.write_batch(&chunk)?);
        }
        self.vlog.sync()?;

        let matcher = self.key_matcher();
        let matcher: &MatchKeyFn<'_> = &matcher;
        self.index.put_batch(&positions, Some(matcher))?;
        self.index.delete_batch(&deleted, Some(matcher))?;
        self.index.sync()?;

        table.delete_wal()?;
        tracing::debug!(
            "flushed memtable {}: {} values, {} tombstones",
            table.id(),
            written,
            removed
        );
        Ok(())
    }

    /// Copy the records of `partition` the index still points at into a new
    /// log, returning it with the position updates to apply.
    fn rewrite_partition(&self, partition: u32) -> Result<(Wal, Vec<Remap>)> {
        let rewrite = self.vlog.open_rewrite(partition)?;
        match self.copy_survivors(partition, &rewrite) {
            Ok(remaps) => Ok((rewrite, remaps)),
            Err(e) => {
                if let Err(cleanup) = rewrite.delete() {
                    tracing::warn!("failed to remove rewrite log: {}", cleanup);
                }
                Err(e)
            }
        }
    }

    fn copy_survivors(&self, partition: u32, rewrite: &Wal) -> Result<Vec<Remap>> {
        let matcher = self.key_matcher();
        let matcher: &MatchKeyFn<'_> = &matcher;
        let limit = self.options.value_log_file_size;
        let mut remaps = Vec::new();
        let mut pending: Vec<KeyPosition> = Vec::new();
        let mut pending_size = 0u64;

        let mut write_pending = |pending: &mut Vec<KeyPosition>| -> Result<()> {
            let positions = rewrite.write_all()?;
            for (old, new) in pending.drain(..).zip(positions) {
                remaps.push(Remap {
                    key: old.key,
                    partition,
                    old: old.position,
                    new,
                });
            }
            Ok(())
        };

        for item in self.vlog.reader(partition)? {
            let (data, position) = item?;
            let record = ValueLogRecord::decode(&data)?;
            let Some(current) = self.index.get(&record.key, Some(matcher))? else {
                continue;
            };
            if current.partition != partition || current.position != position {
                continue;
            }
            let cost = max_data_write_size(data.len() as u64);
            if !pending.is_empty()
                && (pending.len() >= self.options.compact_batch_count
                    || pending_size + cost > limit)
            {
                write_pending(&mut pending)?;
                pending_size = 0;
            }
            pending_size += cost;
            rewrite.pending_writes(data);
            pending.push(KeyPosition {
                key: record.key,
                partition,
                position,
            });
        }
        if !pending.is_empty() {
            write_pending(&mut pending)?;
        }
        Ok(remaps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::options::IndexType;
    use std::time::Duration;
    use tempfile::TempDir;

    fn options(dir: &TempDir) -> Options {
        Options {
            dir_path: dir.path().to_path_buf(),
            ..Options::default()
        }
    }

    // ── Basic operations ──

    #[test]
    fn test_put_get_delete() {
        let dir = TempDir::new().unwrap();
        let db = Db::open(options(&dir)).unwrap();
        db.put(b"a", b"1").unwrap();
        assert_eq!(db.get(b"a").unwrap(), b"1");
        db.put(b"a", b"2").unwrap();
        assert_eq!(db.get(b"a").unwrap(), b"2");
        db.delete(b"a").unwrap();
        assert!(matches!(db.get(b"a"), Err(Error::KeyNotFound)));
        assert!(!db.exist(b"a").unwrap());
    }

    #[test]
    fn test_empty_key_rejected() {
        let dir = TempDir::new().unwrap();
        let db = Db::open(options(&dir)).unwrap();
        assert!(matches!(db.put(b"", b"v"), Err(Error::KeyIsEmpty)));
        assert!(matches!(db.get(b""), Err(Error::KeyIsEmpty)));
    }

    #[test]
    fn test_operations_after_close_fail() {
        let dir = TempDir::new().unwrap();
        let db = Db::open(options(&dir)).unwrap();
        db.put(b"a", b"1").unwrap();
        db.close().unwrap();
        db.close().unwrap();
        assert!(matches!(db.get(b"a"), Err(Error::DbClosed)));
        assert!(matches!(db.put(b"a", b"2"), Err(Error::DbClosed)));
        assert!(matches!(db.compact(), Err(Error::DbClosed)));
    }

    #[test]
    fn test_second_open_is_locked_out() {
        let dir = TempDir::new().unwrap();
        let _db = Db::open(options(&dir)).unwrap();
        assert!(matches!(
            Db::open(options(&dir)),
            Err(Error::DirectoryLocked(_))
        ));
    }

    #[test]
    fn test_close_releases_lock_while_handle_lives() {
        let dir = TempDir::new().unwrap();
        let first = Db::open(options(&dir)).unwrap();
        first.put(b"a", b"1").unwrap();
        first.close().unwrap();
        assert!(first.worker.lock().is_none());

        let second = Db::open(options(&dir)).unwrap();
        assert_eq!(second.get(b"a").unwrap(), b"1");
        drop(first);
        assert_eq!(second.get(b"a").unwrap(), b"1");
    }

    // ── Flushing ──

    #[test]
    fn test_reads_survive_flush() {
        let dir = TempDir::new().unwrap();
        let db = Db::open(options(&dir)).unwrap();
        for i in 0..100u32 {
            db.put(format!("k{i}").as_bytes(), &i.to_le_bytes()).unwrap();
        }
        db.delete(b"k7").unwrap();
        db.flush().unwrap();
        assert_eq!(db.immutable_count(), 0);
        assert_eq!(db.get(b"k42").unwrap(), 42u32.to_le_bytes());
        assert!(matches!(db.get(b"k7"), Err(Error::KeyNotFound)));
    }

    #[test]
    fn test_memtable_overrides_flushed_value() {
        let dir = TempDir::new().unwrap();
        let db = Db::open(options(&dir)).unwrap();
        db.put(b"k", b"old").unwrap();
        db.flush().unwrap();
        db.put(b"k", b"new").unwrap();
        assert_eq!(db.get(b"k").unwrap(), b"new");
        db.delete(b"k").unwrap();
        assert!(!db.exist(b"k").unwrap());
        db.flush().unwrap();
        assert!(!db.exist(b"k").unwrap());
    }

    #[test]
    fn test_rotation_on_full_memtable() {
        let dir = TempDir::new().unwrap();
        let db = Db::open(Options {
            memtable_size: 1024,
            memtable_nums: 4,
            ..options(&dir)
        })
        .unwrap();
        let value = vec![7u8; 300];
        for i in 0..50u32 {
            db.put(format!("key-{i}").as_bytes(), &value).unwrap();
        }
        for i in 0..50u32 {
            assert_eq!(db.get(format!("key-{i}").as_bytes()).unwrap(), value);
        }
    }

    #[test]
    fn test_writer_times_out_when_flush_is_blocked() {
        let dir = TempDir::new().unwrap();
        let db = Db::open(Options {
            memtable_size: 64,
            memtable_nums: 2,
            wait_memtable_space_timeout: Duration::from_millis(50),
            ..options(&dir)
        })
        .unwrap();
        let blocker = db.lock_flushing();
        let value = vec![1u8; 100];
        db.put(b"a", &value).unwrap();
        db.put(b"b", &value).unwrap();
        let started = Instant::now();
        assert!(matches!(
            db.put(b"c", &value),
            Err(Error::WaitMemtableSpaceTimeOut)
        ));
        assert!(started.elapsed() >= Duration::from_millis(50));
        drop(blocker);
        db.flush().unwrap();
        db.put(b"c", &value).unwrap();
        assert_eq!(db.get(b"a").unwrap(), value);
    }

    // ── Recovery ──

    #[test]
    fn test_reopen_replays_memtable_wal() {
        let dir = TempDir::new().unwrap();
        {
            let db = Db::open(options(&dir)).unwrap();
            db.put(b"a", b"1").unwrap();
            db.put(b"b", b"2").unwrap();
            db.delete(b"a").unwrap();
            db.close().unwrap();
        }
        let db = Db::open(options(&dir)).unwrap();
        assert!(!db.exist(b"a").unwrap());
        assert_eq!(db.get(b"b").unwrap(), b"2");
    }

    #[test]
    fn test_reopen_after_flush() {
        let dir = TempDir::new().unwrap();
        {
            let db = Db::open(options(&dir)).unwrap();
            db.put(b"flushed", b"yes").unwrap();
            db.flush().unwrap();
            db.put(b"buffered", b"yes").unwrap();
        }
        let db = Db::open(options(&dir)).unwrap();
        assert_eq!(db.get(b"flushed").unwrap(), b"yes");
        assert_eq!(db.get(b"buffered").unwrap(), b"yes");
    }

    // ── Compaction ──

    #[test]
    fn test_compact_keeps_latest_values() {
        let dir = TempDir::new().unwrap();
        let db = Db::open(options(&dir)).unwrap();
        for round in 0..3u32 {
            for i in 0..200u32 {
                db.put(format!("k{i}").as_bytes(), format!("v{round}-{i}").as_bytes())
                    .unwrap();
            }
            db.flush().unwrap();
        }
        for i in 0..50u32 {
            db.delete(format!("k{i}").as_bytes()).unwrap();
        }
        db.flush().unwrap();
        db.compact().unwrap();

        for i in 0..50u32 {
            assert!(!db.exist(format!("k{i}").as_bytes()).unwrap());
        }
        for i in 50..200u32 {
            assert_eq!(
                db.get(format!("k{i}").as_bytes()).unwrap(),
                format!("v2-{i}").as_bytes()
            );
        }
        let survivors: usize = (0..db.inner.vlog.partition_num() as u32)
            .map(|p| db.inner.vlog.reader(p).unwrap().count())
            .sum();
        assert_eq!(survivors, 150);
    }

    #[test]
    fn test_compact_then_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let db = Db::open(Options {
                compact_batch_count: 7,
                ..options(&dir)
            })
            .unwrap();
            for i in 0..100u32 {
                db.put(format!("k{i}").as_bytes(), b"first").unwrap();
            }
            db.flush().unwrap();
            for i in 0..100u32 {
                db.put(format!("k{i}").as_bytes(), b"second").unwrap();
            }
            db.flush().unwrap();
            db.compact().unwrap();
        }
        let db = Db::open(options(&dir)).unwrap();
        for i in 0..100u32 {
            assert_eq!(db.get(format!("k{i}").as_bytes()).unwrap(), b"second");
        }
    }

    #[test]
    fn test_hash_index_variant() {
        let dir = TempDir::new().unwrap();
        let db = Db::open(Options {
            index_type: IndexType::Hash,
            ..options(&dir)
        })
        .unwrap();
        for i in 0..100u32 {
            db.put(format!("k{i}").as_bytes(), format!("v{i}").as_bytes())
                .unwrap();
        }
        db.flush().unwrap();
        db.put(b"k3", b"updated").unwrap();
        db.delete(b"k4").unwrap();
        db.flush().unwrap();
        db.compact().unwrap();
        assert_eq!(db.get(b"k3").unwrap(), b"updated");
        assert!(!db.exist(b"k4").unwrap());
        assert_eq!(db.get(b"k99").unwrap(), b"v99");
    }

    #[test]
    fn test_chunk_by_size_splits() {
        let records: Vec<_> = (0..10u8)
            .map(|i| ValueLogRecord {
                key: vec![i],
                value: vec![0; 100],
            })
            .collect();
        let chunks = chunk_by_size(records, 400);
        assert!(chunks.len() > 1);
        assert_eq!(chunks.iter().map(Vec::len).sum::<usize>(), 10);
    }
}
