//! Search primitives: score normalization and hybrid merging.

/// Vector/filter result merging.
pub mod hybrid;
/// Raw metric → user-facing score.
pub mod score;

pub use hybrid::{hybrid_merge, normalize_results};
pub use score::normalize_score;
