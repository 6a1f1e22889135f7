//! Record types written to memtable WALs, value logs and the index.

use super::wal::ChunkPosition;
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Kind of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogRecordType {
    /// A live key/value pair.
    Normal,
    /// A tombstone masking older values of the key.
    Deleted,
    /// Marks the end of a committed batch in a memtable WAL.
    BatchFinished,
}

/// A single write held in a memtable and its WAL until flushed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub kind: LogRecordType,
    pub batch_id: u64,
}

impl LogRecord {
    pub fn normal(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            key,
            value,
            kind: LogRecordType::Normal,
            batch_id: 0,
        }
    }

    pub fn tombstone(key: Vec<u8>) -> Self {
        Self {
            key,
            value: Vec::new(),
            kind: LogRecordType::Deleted,
            batch_id: 0,
        }
    }

    pub(crate) fn batch_finished(batch_id: u64) -> Self {
        Self {
            key: Vec::new(),
            value: Vec::new(),
            kind: LogRecordType::BatchFinished,
            batch_id,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// A key/value pair persisted in a value-log partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueLogRecord {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl ValueLogRecord {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Location of a key's current value: partition plus chunk position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPosition {
    pub key: Vec<u8>,
    pub partition: u32,
    pub position: ChunkPosition,
}
