//! Hybrid retrieval: RRF-fused vector + keyword search, re-ranked by a
//! multi-factor score that also accounts for semantic closeness, recency of
//! use, and stored confidence.

use crate::memory::RetrievalResult;
use crate::search::{normalize_rrf, reciprocal_rank_fusion, DEFAULT_RRF_K};
use crate::storage::{Store, StoreError};

/// How many candidates each of the vector/keyword searches should fetch
/// before fusion, relative to the caller's requested `top_k`.
const CANDIDATE_MULTIPLIER: usize = 3;

const WEIGHT_RRF: f32 = 0.40;
const WEIGHT_SEMANTIC: f32 = 0.30;
const WEIGHT_RECENCY: f32 = 0.15;
const WEIGHT_CONFIDENCE: f32 = 0.15;

pub struct Retriever<'a> {
    store: &'a Store,
    min_score: f32,
}

impl<'a> Retriever<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store, min_score: 0.0 }
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    /// Find the `top_k` most relevant active memories for `query`, scored
    /// against `current_turn` for the recency term. Returns an empty list if
    /// the store has no active memories.
    pub fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        current_turn: i64,
    ) -> Result<Vec<RetrievalResult>, StoreError> {
        if self.store.active_count()? == 0 {
            return Ok(Vec::new());
        }

        let candidate_k = top_k * CANDIDATE_MULTIPLIER;
        let vector_results = self.store.search_vector(query, candidate_k)?;
        let keyword_results = self.store.search_fts(query, candidate_k)?;

        let fused = reciprocal_rank_fusion(&keyword_results, &vector_results, DEFAULT_RRF_K);
        let normalized_rrf = normalize_rrf(&fused);

        let vector_distances: std::collections::HashMap<String, f32> = vector_results.into_iter().collect();

        let mut scored: Vec<RetrievalResult> = Vec::new();
        for (id, _rrf_raw) in &fused {
            let Some(memory) = self.store.get_memory_by_id(id)? else { continue };
            if !memory.is_active {
                continue;
            }

            let rrf_term = *normalized_rrf.get(id).unwrap_or(&0.0);

            // Semantic term: a vector hit's L2 distance `d` maps to 1/(1+d);
            // keyword-only candidates (no vector hit) score 0 here.
            let semantic_term = vector_distances.get(id).map(|d| 1.0 / (1.0 + d)).unwrap_or(0.0);

            // Recency: fraction of the conversation's turns since this memory
            // was last retrieved. Never retrieved (last_used_turn == 0) or a
            // turn-zero query both score 0 rather than being penalised further.
            let recency_term = if current_turn > 0 && memory.last_used_turn > 0 {
                (memory.last_used_turn as f32 / current_turn as f32).min(1.0)
            } else {
                0.0
            };

            let confidence_term = memory.confidence.clamp(0.0, 1.0);

            let score = WEIGHT_RRF * rrf_term
                + WEIGHT_SEMANTIC * semantic_term
                + WEIGHT_RECENCY * recency_term
                + WEIGHT_CONFIDENCE * confidence_term;

            if score < self.min_score {
                continue;
            }

            scored.push(RetrievalResult { memory, score, rrf_normalized: rrf_term });
        }

        // Ties break by RRF score, then by updated_at, then by id (spec.md
        // §4.4) - the final weighted score alone isn't discriminating enough
        // to produce a stable order across runs.
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.rrf_normalized.partial_cmp(&a.rrf_normalized).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| b.memory.updated_at.cmp(&a.memory.updated_at))
                .then_with(|| a.memory.id.cmp(&b.memory.id))
        });
        scored.truncate(top_k);

        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{Embedder, EmbeddingError};
    use crate::memory::MemoryType;

    struct FakeEmbedder;
    impl Embedder for FakeEmbedder {
        fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            let mut v = vec![0.0_f32; 8];
            for (i, b) in text.bytes().enumerate() {
                v[i % 8] += b as f32;
            }
            Ok(v)
        }

        fn dimensions(&self) -> usize {
            8
        }
    }

    fn test_store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let store = Store::open(Some(path), Box::new(FakeEmbedder)).unwrap();
        (store, dir)
    }

    #[test]
    fn empty_store_returns_no_results() {
        let (store, _dir) = test_store();
        let retriever = Retriever::new(&store);
        let results = retriever.retrieve("anything", 5, 1).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn retrieve_finds_keyword_matching_memory() {
        let (store, _dir) = test_store();
        store
            .add_memory(MemoryType::Fact, "personal", "pet_name", "Bruno the dog", 0.85, "t", 1)
            .unwrap();
        store
            .add_memory(MemoryType::Preference, "dietary", "favorite_food", "pizza", 0.9, "t", 1)
            .unwrap();

        let retriever = Retriever::new(&store);
        let results = retriever.retrieve("Bruno", 5, 10).unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].memory.key, "pet_name");
    }

    #[test]
    fn retrieve_caps_results_at_top_k() {
        let (store, _dir) = test_store();
        for i in 0..10 {
            store
                .add_memory(MemoryType::Fact, "general", &format!("fact_{i}"), "some shared detail here", 0.8, "t", 1)
                .unwrap();
        }
        let retriever = Retriever::new(&store);
        let results = retriever.retrieve("shared detail", 3, 1).unwrap();
        assert!(results.len() <= 3);
    }

    #[test]
    fn min_score_filters_out_low_relevance_hits() {
        let (store, _dir) = test_store();
        store
            .add_memory(MemoryType::Fact, "general", "timezone", "IST", 0.3, "t", 1)
            .unwrap();
        let retriever = Retriever::new(&store).with_min_score(0.99);
        let results = retriever.retrieve("IST", 5, 1).unwrap();
        assert!(results.is_empty());
    }

    /// Two otherwise-identical memories, differing only in how recently they
    /// were last retrieved: the more recently used one must score strictly
    /// higher once the recency term is in play (spec.md §8 Scenario 6).
    #[test]
    fn recency_boosts_more_recently_used_memory_above_an_identical_twin() {
        let (store, _dir) = test_store();
        let stale = store
            .add_memory(MemoryType::Fact, "general", "office_location", "Bruno the dog", 0.8, "t", 1)
            .unwrap();
        let fresh = store
            .add_memory(MemoryType::Fact, "general", "office_location_2", "Bruno the dog", 0.8, "t", 1)
            .unwrap();

        store.touch_memory(&stale.id, 10).unwrap();
        store.touch_memory(&fresh.id, 90).unwrap();

        let retriever = Retriever::new(&store);
        let results = retriever.retrieve("Bruno the dog", 5, 100).unwrap();

        let stale_result = results.iter().find(|r| r.memory.id == stale.id).unwrap();
        let fresh_result = results.iter().find(|r| r.memory.id == fresh.id).unwrap();
        assert!(
            fresh_result.score > stale_result.score,
            "memory used at turn 90 ({}) should outscore one used at turn 10 ({})",
            fresh_result.score,
            stale_result.score
        );
    }

    /// When the final weighted score ties, the tiebreak falls back to the
    /// RRF-normalised component before updated_at/id (spec.md §4.4). Build
    /// the candidates directly rather than through the full pipeline so the
    /// tie is exact rather than approximate.
    #[test]
    fn sort_breaks_score_ties_by_rrf_before_updated_at_and_id() {
        use crate::memory::{Memory, MemoryType as MT, RetrievalResult as RR};
        use chrono::{Duration, Utc};

        fn memory(id: &str, updated_at: chrono::DateTime<Utc>) -> Memory {
            Memory {
                id: id.to_string(),
                r#type: MT::Fact,
                category: "general".into(),
                key: "k".into(),
                value: "v".into(),
                confidence: 0.8,
                reasoning: "t".into(),
                source_turn: 1,
                last_used_turn: 1,
                is_active: true,
                created_at: updated_at,
                updated_at,
            }
        }

        let now = Utc::now();
        let mut scored = vec![
            RR { memory: memory("b", now), score: 0.5, rrf_normalized: 0.2 },
            RR { memory: memory("a", now), score: 0.5, rrf_normalized: 0.9 },
            RR { memory: memory("c", now - Duration::seconds(1)), score: 0.5, rrf_normalized: 0.9 },
        ];

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.rrf_normalized.partial_cmp(&a.rrf_normalized).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| b.memory.updated_at.cmp(&a.memory.updated_at))
                .then_with(|| a.memory.id.cmp(&b.memory.id))
        });

        let ids: Vec<&str> = scored.iter().map(|r| r.memory.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
    }
}
