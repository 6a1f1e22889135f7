//! # vectorkv-core
//!
//! Embeddable LSM key-value engine with flat vector search and
//! bitmap-filtered hybrid retrieval.
//!
//! The [`kv`] module is a self-contained engine: a write-ahead-logged
//! memtable in front of a partitioned value log with a BTree or hash index,
//! flushed in the background and compacted on demand. The [`storage`]
//! module builds collections on top of it: documents are stored as raw
//! records in the engine, vectors in a quantized flat index and metadata in
//! a roaring bitmap index.

/// Roaring-bitmap inverted index over document metadata.
pub mod bitmap;
/// Global configuration constants: framing, defaults and limits.
pub mod config;
/// Core document types: `Document`, `MetadataValue` and `Candidate`.
pub mod document;
/// Error taxonomy and `Result` alias.
pub mod error;
/// Filter clauses used by filter and hybrid search.
pub mod filter_types;
/// LSM key-value engine.
pub mod kv;
/// Score normalization and hybrid merging.
pub mod search;
/// Collections, lifecycle and index persistence.
pub mod storage;
/// Distance metrics, quantizers and flat vector indexes.
pub mod vector;

pub use document::{Candidate, Document, MetadataValue};
pub use error::{Error, Result};
pub use filter_types::{FilterClause, FilterCondition, FilterOperator};
pub use kv::{Batch, BatchOptions, Db, IndexType, Options, WriteOptions};
pub use storage::{CollectionConfig, CollectionState, Database, DatabaseOptions};
pub use vector::{DistanceMetric, QuantizationKind};
