//! Segmented write-ahead log.
//!
//! Records are appended to the active segment file; once a write would push
//! the active segment past `segment_size`, the segment is synced, retired as
//! read-only, and a new segment with the next id becomes active. Records are
//! addressed by [`ChunkPosition`] and can be read back individually or
//! streamed in order with a [`Reader`].
//!
//! Used as the backing log for memtables, value-log partitions and index
//! journals.

/// Sequential readers over segments.
pub mod reader;
/// Segment files, chunk framing and chunk positions.
pub mod segment;

pub use reader::{Reader, SegmentReader};
pub use segment::{ChunkPosition, SegmentId};

use crate::config::{BLOCK_SIZE, CHUNK_HEADER_SIZE, DEFAULT_SEGMENT_SIZE};
use crate::error::{Error, Result};
use parking_lot::{Mutex, RwLock};
use segment::{parse_segment_id, Segment};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

/// Options for opening a [`Wal`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WalOptions {
    /// Directory holding the segment files.
    pub dir_path: PathBuf,
    /// Maximum size of one segment file in bytes.
    pub segment_size: u64,
    /// Extension of segment files, starting with `.`.
    pub segment_file_ext: String,
    /// Fsync after every write.
    pub sync: bool,
    /// Fsync once this many bytes were written since the last sync. 0 disables.
    pub bytes_per_sync: u32,
}

impl Default for WalOptions {
    fn default() -> Self {
        Self {
            dir_path: std::env::temp_dir().join("vectorkv-wal"),
            segment_size: DEFAULT_SEGMENT_SIZE,
            segment_file_ext: ".SEG".to_string(),
            sync: false,
            bytes_per_sync: 0,
        }
    }
}

/// Worst-case on-disk size of a record of `size` bytes, headers included.
pub fn max_data_write_size(size: u64) -> u64 {
    let header = CHUNK_HEADER_SIZE as u64;
    header + size + (size / BLOCK_SIZE as u64 + 1) * header
}

struct WalState {
    active: Segment,
    older: BTreeMap<SegmentId, Segment>,
    bytes_since_sync: u64,
    closed: bool,
}

struct PendingWrites {
    records: Vec<Vec<u8>>,
    size: u64,
}

/// Append-only log split into numbered segment files.
///
/// Thread-safe: writes take an exclusive lock on the segment set, reads take
/// a shared lock and use positional I/O. Pending writes are buffered behind
/// their own mutex.
pub struct Wal {
    options: RwLock<WalOptions>,
    state: RwLock<WalState>,
    pending: Mutex<PendingWrites>,
}

impl Wal {
    /// Open the log, creating the directory and segment #1 when empty.
    ///
    /// The highest-numbered segment becomes active; a torn record at its
    /// tail is truncated away.
    pub fn open(options: WalOptions) -> Result<Self> {
        Self::open_from(options, 1)
    }

    /// Like [`open`](Wal::open), but an empty directory starts at `first_segment_id`.
    ///
    /// Compaction uses this so a rewritten log never reuses the ids of the
    /// log it replaces.
    pub fn open_from(options: WalOptions, first_segment_id: SegmentId) -> Result<Self> {
        if !options.segment_file_ext.starts_with('.') {
            return Err(Error::InvalidOptions(format!(
                "segment file extension must start with '.': {}",
                options.segment_file_ext
            )));
        }
        if options.segment_size <= CHUNK_HEADER_SIZE as u64 {
            return Err(Error::InvalidOptions("segment size too small".into()));
        }
        fs::create_dir_all(&options.dir_path)?;

        let mut ids = Vec::new();
        for entry in fs::read_dir(&options.dir_path)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            if let Some(id) = name
                .to_str()
                .and_then(|n| parse_segment_id(n, &options.segment_file_ext))
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();

        let dir = options.dir_path.clone();
        let ext = options.segment_file_ext.clone();
        let (active, older) = match ids.split_last() {
            None => (Segment::open(&dir, &ext, first_segment_id.max(1))?, BTreeMap::new()),
            Some((&last, rest)) => {
                let mut older = BTreeMap::new();
                for &id in rest {
                    older.insert(id, Segment::open(&dir, &ext, id)?);
                }
                let mut active = Segment::open(&dir, &ext, last)?;
                active.truncate_torn_tail()?;
                (active, older)
            }
        };

        Ok(Self {
            options: RwLock::new(options),
            state: RwLock::new(WalState {
                active,
                older,
                bytes_since_sync: 0,
                closed: false,
            }),
            pending: Mutex::new(PendingWrites {
                records: Vec::new(),
                size: 0,
            }),
        })
    }

    /// Id of the segment currently accepting writes.
    pub fn active_segment_id(&self) -> SegmentId {
        self.state.read().active.id()
    }

    /// `true` when the log holds a single, empty segment.
    pub fn is_empty(&self) -> bool {
        let state = self.state.read();
        state.older.is_empty() && state.active.size() == 0
    }

    /// Total bytes across all segments.
    pub fn size(&self) -> u64 {
        let state = self.state.read();
        state.active.size() + state.older.values().map(Segment::size).sum::<u64>()
    }

    /// Sync the active segment and start a new one.
    pub fn open_new_active_segment(&self) -> Result<()> {
        let mut state = self.state.write();
        if state.closed {
            return Err(Error::DbClosed);
        }
        self.rotate(&mut state)
    }

    fn rotate(&self, state: &mut WalState) -> Result<()> {
        state.active.sync()?;
        let options = self.options.read();
        let next = Segment::open(
            &options.dir_path,
            &options.segment_file_ext,
            state.active.id() + 1,
        )?;
        let old = std::mem::replace(&mut state.active, next);
        tracing::debug!(
            "WAL {:?}{}: rotated segment {} -> {}",
            options.dir_path,
            options.segment_file_ext,
            old.id(),
            state.active.id()
        );
        state.older.insert(old.id(), old);
        state.bytes_since_sync = 0;
        Ok(())
    }

    /// Append one record and return its position.
    pub fn write(&self, data: &[u8]) -> Result<ChunkPosition> {
        let mut state = self.state.write();
        if state.closed {
            return Err(Error::DbClosed);
        }
        let segment_size = self.options.read().segment_size;
        if data.len() as u64 + CHUNK_HEADER_SIZE as u64 > segment_size {
            return Err(Error::ValueTooLarge);
        }
        if state.active.size() + max_data_write_size(data.len() as u64) > segment_size {
            self.rotate(&mut state)?;
        }
        let position = state.active.write(data)?;
        self.after_write(&mut state, position.chunk_size as u64)?;
        Ok(position)
    }

    /// Buffer a record for the next [`write_all`](Wal::write_all).
    pub fn pending_writes(&self, data: Vec<u8>) {
        let mut pending = self.pending.lock();
        pending.size += max_data_write_size(data.len() as u64);
        pending.records.push(data);
    }

    /// Discard all buffered records.
    pub fn clear_pending_writes(&self) {
        let mut pending = self.pending.lock();
        pending.records.clear();
        pending.size = 0;
    }

    /// Write every pending record as one batch into a single segment.
    ///
    /// The pending buffer is cleared whether or not the write succeeds.
    pub fn write_all(&self) -> Result<Vec<ChunkPosition>> {
        let mut pending = self.pending.lock();
        let records = std::mem::take(&mut pending.records);
        let pending_size = std::mem::take(&mut pending.size);
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let mut state = self.state.write();
        if state.closed {
            return Err(Error::DbClosed);
        }
        let segment_size = self.options.read().segment_size;
        if pending_size > segment_size {
            return Err(Error::PendingSizeTooLarge);
        }
        if state.active.size() + pending_size > segment_size {
            self.rotate(&mut state)?;
        }
        let positions = state.active.write_all(&records)?;
        let written: u64 = positions.iter().map(|p| p.chunk_size as u64).sum();
        self.after_write(&mut state, written)?;
        Ok(positions)
    }

    fn after_write(&self, state: &mut WalState, written: u64) -> Result<()> {
        state.bytes_since_sync += written;
        let options = self.options.read();
        let need_sync = options.sync
            || (options.bytes_per_sync > 0
                && state.bytes_since_sync >= options.bytes_per_sync as u64);
        if need_sync {
            state.active.sync()?;
            state.bytes_since_sync = 0;
        }
        Ok(())
    }

    /// Read the record stored at `position`.
    pub fn read(&self, position: &ChunkPosition) -> Result<Vec<u8>> {
        let state = self.state.read();
        if state.closed {
            return Err(Error::DbClosed);
        }
        let segment = if position.segment_id == state.active.id() {
            &state.active
        } else {
            state
                .older
                .get(&position.segment_id)
                .ok_or(Error::SegmentNotFound(position.segment_id))?
        };
        segment.read(position.block_number, position.chunk_offset)
    }

    /// Reader over every record currently in the log.
    pub fn reader(&self) -> Result<Reader> {
        self.reader_with_max(0)
    }

    /// Reader over segments whose id is at most `max_segment_id` (0 = all).
    pub fn reader_with_max(&self, max_segment_id: SegmentId) -> Result<Reader> {
        let state = self.state.read();
        if state.closed {
            return Err(Error::DbClosed);
        }
        let readers = state
            .older
            .values()
            .chain(std::iter::once(&state.active))
            .filter(|s| max_segment_id == 0 || s.id() <= max_segment_id)
            .map(|s| SegmentReader::new(s.id(), s.file(), s.size()))
            .collect();
        Ok(Reader::new(readers))
    }

    /// Reader positioned at `start`, skipping every earlier record.
    pub fn reader_with_start(&self, start: &ChunkPosition) -> Result<Reader> {
        let mut reader = self.reader()?;
        reader.skip_to(start)?;
        Ok(reader)
    }

    /// Flush the active segment to stable storage.
    pub fn sync(&self) -> Result<()> {
        let mut state = self.state.write();
        if state.closed {
            return Ok(());
        }
        state.active.sync()?;
        state.bytes_since_sync = 0;
        Ok(())
    }

    /// Sync and close the log. Later operations fail with `DbClosed`.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.write();
        if state.closed {
            return Ok(());
        }
        state.active.sync()?;
        state.closed = true;
        Ok(())
    }

    /// Close the log and remove every segment file.
    pub fn delete(&self) -> Result<()> {
        let mut state = self.state.write();
        state.closed = true;
        for segment in state.older.values() {
            segment.remove()?;
        }
        state.active.remove()?;
        state.older.clear();
        Ok(())
    }

    /// Rename every segment file to carry `new_ext`.
    pub fn rename_file_ext(&self, new_ext: &str) -> Result<()> {
        if !new_ext.starts_with('.') {
            return Err(Error::InvalidOptions(format!(
                "segment file extension must start with '.': {new_ext}"
            )));
        }
        let mut state = self.state.write();
        let mut options = self.options.write();
        let dir = options.dir_path.clone();
        for segment in state.older.values_mut() {
            segment.rename_ext(&dir, new_ext)?;
        }
        state.active.rename_ext(&dir, new_ext)?;
        options.segment_file_ext = new_ext.to_string();
        Ok(())
    }
}
