//! Reciprocal Rank Fusion
//!
//! Combines the keyword (FTS5) and vector (HNSW) result lists the Retriever
//! produces for a single query into one ranked list, before the Retriever's
//! own multi-factor scoring (semantic similarity, recency, confidence)
//! blends in on top of the fused rank.

use std::collections::HashMap;

/// Default RRF damping constant (spec.md §4.4).
pub const DEFAULT_RRF_K: f32 = 60.0;

/// `score(d) = sum of 1/(k + rank(d) + 1)` across every result list `d`
/// appears in. Items found by both searches outrank items found by only
/// one, regardless of the two searches' very different score scales.
pub fn reciprocal_rank_fusion(
    keyword_results: &[(String, f32)],
    vector_results: &[(String, f32)],
    k: f32,
) -> Vec<(String, f32)> {
    let mut scores: HashMap<String, f32> = HashMap::new();

    for (rank, (key, _)) in keyword_results.iter().enumerate() {
        *scores.entry(key.clone()).or_default() += 1.0 / (k + rank as f32 + 1.0);
    }

    for (rank, (key, _)) in vector_results.iter().enumerate() {
        *scores.entry(key.clone()).or_default() += 1.0 / (k + rank as f32 + 1.0);
    }

    let mut results: Vec<(String, f32)> = scores.into_iter().collect();
    results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    results
}

/// Normalise a RRF score list into [0, 1] by dividing by the maximum score
/// present, so it can be weighted against semantic/recency/confidence terms
/// that already live on a 0..1 scale.
pub fn normalize_rrf(scores: &[(String, f32)]) -> HashMap<String, f32> {
    let max = scores.iter().map(|(_, s)| *s).fold(0.0_f32, f32::max).max(1e-6);
    scores.iter().map(|(k, s)| (k.clone(), s / max)).collect()
}
