//! Segment files: fixed-size blocks holding CRC-framed chunks.
//!
//! A record is split into one or more chunks so that no chunk crosses a block
//! boundary. Each chunk is framed as
//! `[u32 CRC32 LE][u16 length LE][u8 type][payload]`, where the CRC covers the
//! length, the type and the payload. A block tail too short for another chunk
//! header is zero padded by the next write.

use crate::config::{BLOCK_SIZE, CHUNK_HEADER_SIZE};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Numeric identifier of a segment file.
pub type SegmentId = u32;

/// Kind of a chunk within a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkType {
    Full = 0,
    First = 1,
    Middle = 2,
    Last = 3,
}

impl ChunkType {
    fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(ChunkType::Full),
            1 => Some(ChunkType::First),
            2 => Some(ChunkType::Middle),
            3 => Some(ChunkType::Last),
            _ => None,
        }
    }
}

/// Durable address of one record inside a segmented log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ChunkPosition {
    pub segment_id: SegmentId,
    /// Block holding the record's first chunk.
    pub block_number: u32,
    /// Offset of the first chunk within its block.
    pub chunk_offset: u64,
    /// Bytes occupied by all chunks of the record, headers included.
    pub chunk_size: u32,
}

/// Build the on-disk file name of a segment: `{id:09}{ext}`.
pub fn segment_file_name(dir: &Path, ext: &str, id: SegmentId) -> PathBuf {
    dir.join(format!("{:09}{}", id, ext))
}

/// Parse the segment id out of a file name carrying `ext`.
pub fn parse_segment_id(file_name: &str, ext: &str) -> Option<SegmentId> {
    let prefix = file_name.strip_suffix(ext)?;
    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    prefix.parse().ok()
}

/// One append-only segment file.
pub(crate) struct Segment {
    id: SegmentId,
    file: Arc<File>,
    path: PathBuf,
    block_number: u32,
    block_size: u32,
}

impl Segment {
    /// Open or create the segment file with the given id.
    pub(crate) fn open(dir: &Path, ext: &str, id: SegmentId) -> Result<Self> {
        let path = segment_file_name(dir, ext, id);
        let mut opts = OpenOptions::new();
        opts.create(true).read(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o600);
        }
        let file = opts.open(&path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            id,
            file: Arc::new(file),
            path,
            block_number: (size / BLOCK_SIZE as u64) as u32,
            block_size: (size % BLOCK_SIZE as u64) as u32,
        })
    }

    pub(crate) fn id(&self) -> SegmentId {
        self.id
    }

    /// Current size of the segment in bytes.
    pub(crate) fn size(&self) -> u64 {
        self.block_number as u64 * BLOCK_SIZE as u64 + self.block_size as u64
    }

    pub(crate) fn file(&self) -> Arc<File> {
        Arc::clone(&self.file)
    }

    /// Append one record, returning its position.
    pub(crate) fn write(&mut self, data: &[u8]) -> Result<ChunkPosition> {
        let mut positions = self.write_all(&[data])?;
        positions
            .pop()
            .ok_or_else(|| Error::Corrupted("segment write produced no position".into()))
    }

    /// Append several records with a single file write.
    ///
    /// Block bookkeeping only advances once the write has reached the file.
    pub(crate) fn write_all<D: AsRef<[u8]>>(&mut self, records: &[D]) -> Result<Vec<ChunkPosition>> {
        let mut block_number = self.block_number;
        let mut block_size = self.block_size;
        let mut buf = Vec::new();
        let mut positions = Vec::with_capacity(records.len());
        for data in records {
            positions.push(encode_record(
                &mut buf,
                data.as_ref(),
                self.id,
                &mut block_number,
                &mut block_size,
            ));
        }
        (&*self.file).write_all(&buf)?;
        self.block_number = block_number;
        self.block_size = block_size;
        Ok(positions)
    }

    /// Read the record starting at the given block and offset.
    pub(crate) fn read(&self, block_number: u32, chunk_offset: u64) -> Result<Vec<u8>> {
        match read_record(&self.file, self.size(), self.id, block_number, chunk_offset)? {
            Some(record) => Ok(record.data),
            None => Err(Error::Corrupted(format!(
                "no record in segment {} at block {} offset {}",
                self.id, block_number, chunk_offset
            ))),
        }
    }

    pub(crate) fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Drop any torn record at the tail left behind by a crash mid-write.
    ///
    /// A chunk that fails its checksum only counts as torn when nothing but
    /// zero bytes follows it. Damage with live data after it is `Corrupted`.
    pub(crate) fn truncate_torn_tail(&mut self) -> Result<()> {
        let size = self.size();
        let mut block = 0u32;
        let mut offset = 0u64;
        let mut valid_end = 0u64;
        loop {
            match decode_record(&self.file, size, self.id, block, offset)? {
                Decoded::Record(record) => {
                    valid_end = record.end;
                    block = record.next_block;
                    offset = record.next_offset;
                }
                Decoded::End => break,
                Decoded::BadChunk { end, reason } => {
                    if !zeroed_from(&self.file, end, size)? {
                        return Err(Error::Corrupted(reason));
                    }
                    break;
                }
            }
        }
        if valid_end < size {
            tracing::warn!(
                "segment {:?} has a torn tail, truncating {} -> {} bytes",
                self.path,
                size,
                valid_end
            );
            self.file.set_len(valid_end)?;
            self.file.sync_all()?;
            self.block_number = (valid_end / BLOCK_SIZE as u64) as u32;
            self.block_size = (valid_end % BLOCK_SIZE as u64) as u32;
        }
        Ok(())
    }

    /// Remove the segment file from disk.
    pub(crate) fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Rename the file to carry a different extension.
    pub(crate) fn rename_ext(&mut self, dir: &Path, new_ext: &str) -> Result<()> {
        let new_path = segment_file_name(dir, new_ext, self.id);
        fs::rename(&self.path, &new_path)?;
        self.path = new_path;
        Ok(())
    }
}

/// Append the chunks of one record to `buf`, advancing the block cursor.
fn encode_record(
    buf: &mut Vec<u8>,
    data: &[u8],
    segment_id: SegmentId,
    block_number: &mut u32,
    block_size: &mut u32,
) -> ChunkPosition {
    if BLOCK_SIZE - *block_size <= CHUNK_HEADER_SIZE {
        let padding = (BLOCK_SIZE - *block_size) as usize;
        buf.resize(buf.len() + padding, 0);
        *block_number += 1;
        *block_size = 0;
    }

    let mut position = ChunkPosition {
        segment_id,
        block_number: *block_number,
        chunk_offset: *block_size as u64,
        chunk_size: 0,
    };

    let mut left = data;
    let mut first = true;
    loop {
        let room = (BLOCK_SIZE - *block_size - CHUNK_HEADER_SIZE) as usize;
        let n = left.len().min(room);
        let last = n == left.len();
        let chunk_type = match (first, last) {
            (true, true) => ChunkType::Full,
            (true, false) => ChunkType::First,
            (false, false) => ChunkType::Middle,
            (false, true) => ChunkType::Last,
        };
        append_chunk(buf, &left[..n], chunk_type);

        let written = CHUNK_HEADER_SIZE + n as u32;
        *block_size += written;
        position.chunk_size += written;
        if *block_size == BLOCK_SIZE {
            *block_number += 1;
            *block_size = 0;
        }
        left = &left[n..];
        if last {
            return position;
        }
        first = false;
    }
}

fn append_chunk(buf: &mut Vec<u8>, payload: &[u8], chunk_type: ChunkType) {
    let len = (payload.len() as u16).to_le_bytes();
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&len);
    hasher.update(&[chunk_type as u8]);
    hasher.update(payload);
    let crc = hasher.finalize();

    buf.extend_from_slice(&crc.to_le_bytes());
    buf.extend_from_slice(&len);
    buf.push(chunk_type as u8);
    buf.extend_from_slice(payload);
}

/// A record decoded from a segment together with the cursor after it.
pub(crate) struct ReadRecord {
    pub data: Vec<u8>,
    pub position: ChunkPosition,
    pub next_block: u32,
    pub next_offset: u64,
    /// Absolute file offset just past the record's last chunk.
    pub end: u64,
}

/// Outcome of decoding one record.
enum Decoded {
    Record(ReadRecord),
    End,
    /// A chunk failed validation; `end` is the file offset just past it.
    BadChunk { end: u64, reason: String },
}

/// Decode the record starting at `(block_number, chunk_offset)`.
///
/// Returns `Ok(None)` at end of data, including a torn tail that was only
/// partially written. A checksum mismatch is reported as `Corrupted`.
pub(crate) fn read_record(
    file: &File,
    file_size: u64,
    segment_id: SegmentId,
    block_number: u32,
    chunk_offset: u64,
) -> Result<Option<ReadRecord>> {
    match decode_record(file, file_size, segment_id, block_number, chunk_offset)? {
        Decoded::Record(record) => Ok(Some(record)),
        Decoded::End => Ok(None),
        Decoded::BadChunk { reason, .. } => Err(Error::Corrupted(reason)),
    }
}

fn decode_record(
    file: &File,
    file_size: u64,
    segment_id: SegmentId,
    block_number: u32,
    chunk_offset: u64,
) -> Result<Decoded> {
    let mut block = block_number;
    let mut offset = chunk_offset;
    let mut data = Vec::new();
    let mut chunk_size = 0u32;
    let header_len = CHUNK_HEADER_SIZE as u64;

    loop {
        let at = block as u64 * BLOCK_SIZE as u64 + offset;
        if at + header_len > file_size {
            return Ok(Decoded::End);
        }
        let mut header = [0u8; CHUNK_HEADER_SIZE as usize];
        read_exact_at(file, &mut header, at)?;
        if header.iter().all(|&b| b == 0) {
            return Ok(Decoded::End);
        }

        let stored_crc = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let len = u16::from_le_bytes([header[4], header[5]]) as u64;
        let chunk_end = (at + header_len + len).min(file_size);
        let Some(chunk_type) = ChunkType::from_u8(header[6]) else {
            return Ok(Decoded::BadChunk {
                end: chunk_end,
                reason: format!(
                    "unknown chunk type {} in segment {} at offset {}",
                    header[6], segment_id, at
                ),
            });
        };
        if at + header_len + len > file_size {
            return Ok(Decoded::End);
        }

        let start = data.len();
        data.resize(start + len as usize, 0);
        read_exact_at(file, &mut data[start..], at + header_len)?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header[4..]);
        hasher.update(&data[start..]);
        if hasher.finalize() != stored_crc {
            return Ok(Decoded::BadChunk {
                end: chunk_end,
                reason: format!("chunk CRC mismatch in segment {} at offset {}", segment_id, at),
            });
        }

        chunk_size += (header_len + len) as u32;
        let block_end = offset + header_len + len;
        match chunk_type {
            ChunkType::Full | ChunkType::Last => {
                let (next_block, next_offset) =
                    if BLOCK_SIZE as u64 - block_end <= header_len {
                        (block + 1, 0)
                    } else {
                        (block, block_end)
                    };
                return Ok(Decoded::Record(ReadRecord {
                    data,
                    position: ChunkPosition {
                        segment_id,
                        block_number,
                        chunk_offset,
                        chunk_size,
                    },
                    next_block,
                    next_offset,
                    end: chunk_end,
                }));
            }
            ChunkType::First | ChunkType::Middle => {
                block += 1;
                offset = 0;
            }
        }
    }
}

/// `true` when every byte in `[from, to)` is zero.
fn zeroed_from(file: &File, from: u64, to: u64) -> Result<bool> {
    let mut buf = vec![0u8; BLOCK_SIZE as usize];
    let mut at = from;
    while at < to {
        let n = ((to - at) as usize).min(buf.len());
        read_exact_at(file, &mut buf[..n], at)?;
        if buf[..n].iter().any(|&b| b != 0) {
            return Ok(false);
        }
        at += n as u64;
    }
    Ok(true)
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset)? {
            0 => return Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
            n => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
        }
    }
    Ok(())
}
