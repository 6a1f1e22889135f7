//! Per-collection nearest-neighbour storage.
//!
//! Every collection owns one [`VectorSpace`], a flat index whose storage
//! format is chosen by its [`QuantizationKind`] at creation. The
//! [`VectorStore`] maps loaded collection names to their index.

/// Similarity and distance metrics.
pub mod distance;
/// Flat index, top-K buffer and snapshot format.
pub mod flat;
/// F8, F16 and BF16 component codecs.
pub mod quantization;
/// Collection → index registry.
pub mod store;

pub use distance::DistanceMetric;
pub use flat::{load_space, new_space, FlatIndex, ResultSet, VectorSpace};
pub use quantization::{QuantizationKind, Quantizer};
pub use store::VectorStore;
