//! Merging vector scan results with filter results.
//!
//! A hybrid query scans `top_k * HYBRID_OVERSCAN` vector candidates, keeps
//! those the filter admits, normalizes their scores the same way a pure
//! vector search does, and returns the best `top_k`.

use super::score::normalize_score;
use crate::vector::{DistanceMetric, ResultSet};
use ordered_float::OrderedFloat;
use std::cmp::Reverse;
use std::collections::HashSet;

/// Normalize every scan hit, dropping the ones with no valid score.
///
/// Keeps the scan's best-first order.
pub fn normalize_results(scan: &ResultSet, metric: DistanceMetric) -> Vec<(u64, f32)> {
    scan.iter()
        .filter_map(|(id, raw)| normalize_score(metric, raw).map(|s| (id, s)))
        .collect()
}

/// Intersect `scan` with `admitted`, normalize, rank and truncate.
///
/// Ranking is by descending normalized score; equal scores are ordered by
/// ascending id.
pub fn hybrid_merge(
    scan: &ResultSet,
    admitted: &[u64],
    metric: DistanceMetric,
    top_k: usize,
) -> Vec<(u64, f32)> {
    let admitted: HashSet<u64> = admitted.iter().copied().collect();
    let mut results: Vec<(u64, f32)> = scan
        .iter()
        .filter(|(id, _)| admitted.contains(id))
        .filter_map(|(id, raw)| normalize_score(metric, raw).map(|s| (id, s)))
        .collect();
    results.sort_unstable_by_key(|&(id, score)| (Reverse(OrderedFloat(score)), id));
    results.truncate(top_k);
    results
}
