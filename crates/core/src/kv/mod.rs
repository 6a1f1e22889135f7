//! Embedded LSM key-value engine.
//!
//! Writes go to a WAL-backed memtable; full memtables are flushed into a
//! partitioned value log whose positions are tracked by an index. Compaction
//! rewrites the value log to drop records the index no longer references.

/// Atomic write batches.
pub mod batch;
/// Database handle: open, read/write, flush, compaction, close.
pub mod db;
/// Snowflake-style batch id generator.
pub mod idgen;
/// Key → value-log position index.
pub mod index;
/// Skip-list memtables with their own WAL.
pub mod memtable;
/// Engine, write and batch options.
pub mod options;
/// Log and value-log record types.
pub mod record;
/// Partitioned value log.
pub mod vlog;
/// Segmented write-ahead log.
pub mod wal;

pub use batch::Batch;
pub use db::Db;
pub use index::{BTreeIndex, HashIndex, Index};
pub use options::{BatchOptions, IndexType, Options, WriteOptions};
