//! Mapping raw metric values to user-facing scores.

use crate::vector::DistanceMetric;

/// Normalize a raw similarity or distance.
///
/// Cosine and Pearson map `[-1, 1]` onto `[0, 100]`. Euclidean becomes
/// `100 - d`, and a distance beyond 100 is no match (`None`). The remaining
/// distances become `100 / (1 + d)`. Inner product and Tanimoto are reported
/// unchanged.
pub fn normalize_score(metric: DistanceMetric, raw: f32) -> Option<f32> {
    if raw.is_nan() {
        return None;
    }
    match metric {
        DistanceMetric::Cosine | DistanceMetric::Pearson => {
            Some((((raw + 1.0) / 2.0) * 100.0).clamp(0.0, 100.0))
        }
        DistanceMetric::Euclidean => {
            if raw > 100.0 {
                None
            } else {
                Some((100.0 - raw).max(0.0))
            }
        }
        DistanceMetric::Haversine
        | DistanceMetric::Divergence
        | DistanceMetric::Hamming
        | DistanceMetric::Sorensen => Some(100.0 / (1.0 + raw.max(0.0))),
        DistanceMetric::InnerProduct | DistanceMetric::Tanimoto => Some(raw),
    }
}
