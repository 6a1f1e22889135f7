//! Sequential readers over one segment and over a whole log.

use super::segment::{read_record, ChunkPosition, SegmentId};
use crate::error::Result;
use std::fs::File;
use std::sync::Arc;

/// Cursor over the records of a single segment.
///
/// The readable size is fixed when the reader is created, so records appended
/// afterwards are not observed.
pub struct SegmentReader {
    segment_id: SegmentId,
    file: Arc<File>,
    size: u64,
    block_number: u32,
    chunk_offset: u64,
}

impl SegmentReader {
    pub(crate) fn new(segment_id: SegmentId, file: Arc<File>, size: u64) -> Self {
        Self {
            segment_id,
            file,
            size,
            block_number: 0,
            chunk_offset: 0,
        }
    }

    pub fn segment_id(&self) -> SegmentId {
        self.segment_id
    }

    /// Read the next record, or `None` at the end of the segment.
    pub fn next_record(&mut self) -> Result<Option<(Vec<u8>, ChunkPosition)>> {
        match read_record(
            &self.file,
            self.size,
            self.segment_id,
            self.block_number,
            self.chunk_offset,
        )? {
            Some(record) => {
                self.block_number = record.next_block;
                self.chunk_offset = record.next_offset;
                Ok(Some((record.data, record.position)))
            }
            None => Ok(None),
        }
    }

    fn is_before(&self, position: &ChunkPosition) -> bool {
        (self.block_number, self.chunk_offset) < (position.block_number, position.chunk_offset)
    }
}

/// Lazy iterator over every record of a log in ascending segment order.
///
/// Iteration stops after the first error.
pub struct Reader {
    readers: Vec<SegmentReader>,
    current: usize,
    failed: bool,
}

impl Reader {
    pub(crate) fn new(readers: Vec<SegmentReader>) -> Self {
        Self {
            readers,
            current: 0,
            failed: false,
        }
    }

    /// Skip every record located before `position`.
    pub(crate) fn skip_to(&mut self, position: &ChunkPosition) -> Result<()> {
        self.readers.retain(|r| r.segment_id >= position.segment_id);
        if let Some(first) = self.readers.first_mut() {
            if first.segment_id == position.segment_id {
                while first.is_before(position) {
                    if first.next_record()?.is_none() {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Id of the segment the reader is currently positioned in.
    pub fn current_segment_id(&self) -> Option<SegmentId> {
        self.readers.get(self.current).map(|r| r.segment_id)
    }
}

impl Iterator for Reader {
    type Item = Result<(Vec<u8>, ChunkPosition)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        while let Some(reader) = self.readers.get_mut(self.current) {
            match reader.next_record() {
                Ok(Some(item)) => return Some(Ok(item)),
                Ok(None) => self.current += 1,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}
