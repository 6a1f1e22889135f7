//! Collection layer: lifecycle, raw-record storage and on-disk indexes.
//!
//! A [`Database`] keeps documents in the key-value engine and one vector
//! index plus one bitmap index per loaded collection. Index files are
//! checksummed and committed with a one-deep backup.

/// Collection config and loaded collection state.
pub mod collection;
/// Database facade over the lifecycle, raw records and indexes.
pub mod database;
/// Panic boundary for public operations.
pub(crate) mod guard;
/// Lifecycle state machine keyed by collection name.
pub mod lifecycle;
/// Checksummed files with backup fallback.
pub mod persistence;

pub use collection::CollectionConfig;
pub use database::{Database, DatabaseOptions};
pub use lifecycle::CollectionState;
