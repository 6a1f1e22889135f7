//! Similarity and distance functions over full-precision vectors.
//!
//! Four metrics are similarities (higher is better) and five are distances
//! (lower is better). [`DistanceMetric::higher_is_better`] tells the top-K
//! buffer and the score normalizer which way to rank.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in metres.
const EARTH_RADIUS_M: f32 = 6_371_008.8;

/// Metric used to compare a query against stored vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Cosine similarity. Range: \[-1, 1\].
    Cosine,
    /// Euclidean (L2) distance.
    Euclidean,
    /// Dot product.
    InnerProduct,
    /// Great-circle distance in metres between `[lat, lon]` pairs in degrees.
    Haversine,
    /// Canberra divergence: `Σ |a-b| / (|a|+|b|)`.
    Divergence,
    /// Pearson correlation coefficient. Range: \[-1, 1\].
    Pearson,
    /// Number of differing components.
    Hamming,
    /// Tanimoto (extended Jaccard) similarity.
    Tanimoto,
    /// Sørensen (Bray–Curtis) dissimilarity: `Σ |a-b| / Σ |a+b|`.
    Sorensen,
}

impl DistanceMetric {
    /// `true` for similarity metrics, `false` for distances.
    pub fn higher_is_better(&self) -> bool {
        matches!(
            self,
            DistanceMetric::Cosine
                | DistanceMetric::InnerProduct
                | DistanceMetric::Pearson
                | DistanceMetric::Tanimoto
        )
    }

    /// Compare two equal-length vectors.
    pub fn compute(&self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        match self {
            DistanceMetric::Cosine => cosine(a, b),
            DistanceMetric::Euclidean => euclidean(a, b),
            DistanceMetric::InnerProduct => dot(a, b),
            DistanceMetric::Haversine => haversine(a, b),
            DistanceMetric::Divergence => divergence(a, b),
            DistanceMetric::Pearson => pearson(a, b),
            DistanceMetric::Hamming => hamming(a, b),
            DistanceMetric::Tanimoto => tanimoto(a, b),
            DistanceMetric::Sorensen => sorensen(a, b),
        }
    }

    /// `true` when `candidate` ranks strictly ahead of `other`.
    #[inline]
    pub fn is_better(&self, candidate: f32, other: f32) -> bool {
        if self.higher_is_better() {
            candidate > other
        } else {
            candidate < other
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    // Process in chunks of 8 for auto-vectorization
    let chunks = a.len() / 8;
    let mut sum = 0.0f32;
    for c in 0..chunks {
        let base = c * 8;
        let mut acc = 0.0f32;
        for j in 0..8 {
            acc += a[base + j] * b[base + j];
        }
        sum += acc;
    }
    for i in (chunks * 8)..a.len() {
        sum += a[i] * b[i];
    }
    sum
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let mut ab = 0.0f32;
    let mut aa = 0.0f32;
    let mut bb = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        ab += x * y;
        aa += x * x;
        bb += y * y;
    }
    let denom = (aa * bb).sqrt();
    if denom < f32::EPSILON {
        0.0
    } else {
        (ab / denom).clamp(-1.0, 1.0)
    }
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

fn haversine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() < 2 || b.len() < 2 {
        return f32::INFINITY;
    }
    let (lat1, lon1) = (a[0].to_radians(), a[1].to_radians());
    let (lat2, lon2) = (b[0].to_radians(), b[1].to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

fn divergence(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let denom = x.abs() + y.abs();
            if denom == 0.0 {
                0.0
            } else {
                (x - y).abs() / denom
            }
        })
        .sum()
}

fn pearson(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len() as f32;
    if n == 0.0 {
        return 0.0;
    }
    let mean_a = a.iter().sum::<f32>() / n;
    let mean_b = b.iter().sum::<f32>() / n;
    let mut cov = 0.0f32;
    let mut var_a = 0.0f32;
    let mut var_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    let denom = (var_a * var_b).sqrt();
    if denom < f32::EPSILON {
        0.0
    } else {
        (cov / denom).clamp(-1.0, 1.0)
    }
}

fn hamming(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).filter(|(x, y)| x != y).count() as f32
}

fn tanimoto(a: &[f32], b: &[f32]) -> f32 {
    let ab = dot(a, b);
    let denom = dot(a, a) + dot(b, b) - ab;
    if denom.abs() < f32::EPSILON {
        0.0
    } else {
        ab / denom
    }
}

fn sorensen(a: &[f32], b: &[f32]) -> f32 {
    let mut diff = 0.0f32;
    let mut total = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        diff += (x - y).abs();
        total += (x + y).abs();
    }
    if total < f32::EPSILON {
        0.0
    } else {
        diff / total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical_and_orthogonal() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let s = DistanceMetric::Cosine.compute(&a, &a);
        assert!((s - 1.0).abs() < 1e-5, "self-similarity should be 1, got {s}");
        let s = DistanceMetric::Cosine.compute(&[1.0, 0.0], &[0.0, 1.0]);
        assert!(s.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector() {
        assert_eq!(DistanceMetric::Cosine.compute(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_euclidean() {
        let d = DistanceMetric::Euclidean.compute(&[0.0, 0.0, 0.0], &[3.0, 4.0, 0.0]);
        assert!((d - 5.0).abs() < 1e-6, "expected 5, got {d}");
    }

    #[test]
    fn test_inner_product_long_vector() {
        let a: Vec<f32> = (0..19).map(|i| i as f32).collect();
        let b = vec![1.0f32; 19];
        assert_eq!(DistanceMetric::InnerProduct.compute(&a, &b), 171.0);
    }

    #[test]
    fn test_haversine_paris_london() {
        let paris = [48.8566, 2.3522];
        let london = [51.5074, -0.1278];
        let d = DistanceMetric::Haversine.compute(&paris, &london);
        assert!((d - 343_500.0).abs() < 2_000.0, "got {d}");
    }

    #[test]
    fn test_pearson_perfect_correlation() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [2.0, 4.0, 6.0, 8.0];
        assert!((DistanceMetric::Pearson.compute(&a, &b) - 1.0).abs() < 1e-5);
        let c = [8.0, 6.0, 4.0, 2.0];
        assert!((DistanceMetric::Pearson.compute(&a, &c) + 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hamming_counts_differences() {
        let d = DistanceMetric::Hamming.compute(&[1.0, 0.0, 1.0, 1.0], &[1.0, 1.0, 0.0, 1.0]);
        assert_eq!(d, 2.0);
    }

    #[test]
    fn test_tanimoto_binary() {
        let s = DistanceMetric::Tanimoto.compute(&[1.0, 1.0, 0.0], &[1.0, 0.0, 0.0]);
        assert!((s - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_divergence_and_sorensen() {
        let a = [1.0, 2.0];
        let b = [3.0, 2.0];
        assert!((DistanceMetric::Divergence.compute(&a, &b) - 0.5).abs() < 1e-6);
        assert!((DistanceMetric::Sorensen.compute(&a, &b) - 0.25).abs() < 1e-6);
        assert_eq!(DistanceMetric::Sorensen.compute(&a, &a), 0.0);
    }

    #[test]
    fn test_direction() {
        assert!(DistanceMetric::Cosine.higher_is_better());
        assert!(!DistanceMetric::Euclidean.higher_is_better());
        assert!(DistanceMetric::Cosine.is_better(0.9, 0.1));
        assert!(DistanceMetric::Euclidean.is_better(0.1, 0.9));
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&DistanceMetric::InnerProduct).unwrap();
        assert_eq!(json, "\"inner_product\"");
    }
}
