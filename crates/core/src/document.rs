//! Core document types for vectorkv.
//!
//! A `Document` is the user-facing record of a collection: an id, an
//! embedding, and typed metadata. `MetadataValue` supports unsigned, signed,
//! float and string values, each indexed separately by the bitmap index.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A typed metadata value attached to a document.
///
/// Uses the default externally-tagged serde representation for bincode compatibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetadataValue {
    /// 64-bit unsigned integer.
    Unsigned(u64),
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit floating-point number.
    Float(f64),
    /// UTF-8 string.
    String(String),
}

impl From<u64> for MetadataValue {
    fn from(v: u64) -> Self {
        MetadataValue::Unsigned(v)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Integer(v)
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::String(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::String(v)
    }
}

/// A document with its embedding and metadata.
///
/// Stored as the raw record of a collection in the key-value engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// User-facing identifier, unique within a collection.
    pub id: String,
    /// Embedding, `dimension` components long.
    pub vector: Vec<f32>,
    /// Arbitrary key-value metadata for filtering.
    pub metadata: HashMap<String, MetadataValue>,
}

impl Document {
    pub fn new(
        id: impl Into<String>,
        vector: Vec<f32>,
        metadata: HashMap<String, MetadataValue>,
    ) -> Self {
        Self {
            id: id.into(),
            vector,
            metadata,
        }
    }

    pub(crate) fn encode(&self) -> crate::error::Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub(crate) fn decode(bytes: &[u8]) -> crate::error::Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// One search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: String,
    pub metadata: HashMap<String, MetadataValue>,
    /// Normalized score; see [`crate::search::normalize_score`].
    pub score: f32,
}
