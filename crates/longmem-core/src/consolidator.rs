//! Periodic maintenance: duplicate merging, staleness decay, and expiry of
//! low-confidence memories. Keeps long-running stores lean without an LLM
//! call - everything here is plain arithmetic over what's already stored.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use crate::memory::Memory;
use crate::storage::{memory_cosine_similarity, Store, StoreError};

/// Cosine similarity above which two differently-keyed memories are
/// considered the same underlying fact.
pub const SIMILARITY_THRESHOLD: f32 = 0.85;
/// Turns of disuse after which an eligible memory's confidence decays.
pub const DEFAULT_DECAY_THRESHOLD: i64 = 200;
/// Multiplicative decay applied to confidence once a memory crosses the
/// staleness threshold.
pub const DEFAULT_DECAY_FACTOR: f32 = 0.9;
/// Confidence below which a memory is expired outright.
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.3;
/// How many of the nearest vector neighbours to examine per memory when
/// looking for semantic duplicates.
const VECTOR_DUPLICATE_CANDIDATES: usize = 10;

struct DuplicateGroup {
    canonical: Memory,
    duplicates: Vec<Memory>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConsolidationReport {
    pub duplicates_found: usize,
    pub duplicates_merged: usize,
    pub memories_decayed: usize,
    pub memories_expired: usize,
    pub total_active_before: i64,
    pub total_active_after: i64,
}

pub struct Consolidator<'a> {
    store: &'a Store,
}

impl<'a> Consolidator<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Run duplicate merging, staleness decay, and low-confidence expiry in
    /// sequence and report what happened.
    pub fn run_consolidation(&self, current_turn: i64) -> Result<ConsolidationReport, StoreError> {
        let total_before = self.store.active_count()?;
        info!(current_turn, total_before, "starting consolidation");

        let groups = self.find_duplicates()?;
        let duplicates_found = groups.len();
        let duplicates_merged = self.merge_duplicates(&groups)?;

        let memories_decayed = self.decay_stale(current_turn, DEFAULT_DECAY_THRESHOLD, DEFAULT_DECAY_FACTOR)?;
        let memories_expired = self.expire_low_confidence(DEFAULT_MIN_CONFIDENCE)?;

        let total_after = self.store.active_count()?;
        info!(
            duplicates_merged,
            memories_decayed, memories_expired, total_before, total_after, "consolidation complete"
        );

        Ok(ConsolidationReport {
            duplicates_found,
            duplicates_merged,
            memories_decayed,
            memories_expired,
            total_active_before: total_before,
            total_active_after: total_after,
        })
    }

    /// Two-pass duplicate detection: exact key collisions first (cheap,
    /// certain), then a vector-similarity pass over whatever remains
    /// ungrouped.
    fn find_duplicates(&self) -> Result<Vec<DuplicateGroup>, StoreError> {
        let active = self.store.get_active_memories()?;
        if active.len() < 2 {
            return Ok(Vec::new());
        }

        let mut grouped_ids: HashSet<String> = HashSet::new();
        let mut groups = Vec::new();

        let mut by_key: HashMap<&str, Vec<&Memory>> = HashMap::new();
        for mem in &active {
            by_key.entry(&mem.key).or_default().push(mem);
        }
        for (key, mems) in &by_key {
            if mems.len() < 2 {
                continue;
            }
            let (canonical, duplicates) = pick_canonical(mems.iter().map(|m| (*m).clone()).collect());
            for m in mems {
                grouped_ids.insert(m.id.clone());
            }
            debug!(key, canonical = %canonical.id, duplicates = duplicates.len(), "key-match duplicate group");
            groups.push(DuplicateGroup { canonical, duplicates });
        }

        for mem in &active {
            if grouped_ids.contains(&mem.id) {
                continue;
            }

            let embed_text = format!("{}: {}", mem.key, mem.value);
            let Ok(hits) = self.store.search_vector(&embed_text, VECTOR_DUPLICATE_CANDIDATES) else {
                debug!(id = %mem.id, "vector search failed during duplicate scan; skipping");
                continue;
            };

            let embed_a = match self.store.get_memory_embedding(&mem.key, &mem.value) {
                Ok(v) => v,
                Err(_) => continue,
            };

            let mut similar = Vec::new();
            for (hit_id, _distance) in hits {
                if hit_id == mem.id || grouped_ids.contains(&hit_id) {
                    continue;
                }
                let Some(hit_mem) = self.store.get_memory_by_id(&hit_id)? else { continue };
                let Ok(embed_b) = self.store.get_memory_embedding(&hit_mem.key, &hit_mem.value) else { continue };

                if memory_cosine_similarity(&embed_a, &embed_b) >= SIMILARITY_THRESHOLD {
                    similar.push(hit_mem);
                }
            }

            if similar.is_empty() {
                continue;
            }

            let mut all_mems = vec![mem.clone()];
            all_mems.extend(similar);
            for m in &all_mems {
                grouped_ids.insert(m.id.clone());
            }
            let (canonical, duplicates) = pick_canonical(all_mems);
            debug!(canonical = %canonical.id, key = %canonical.key, duplicates = duplicates.len(), "vector-match duplicate group");
            groups.push(DuplicateGroup { canonical, duplicates });
        }

        Ok(groups)
    }

    fn merge_duplicates(&self, groups: &[DuplicateGroup]) -> Result<usize, StoreError> {
        let mut merged = 0;
        for group in groups {
            for dup in &group.duplicates {
                self.store.deactivate_by_id(&dup.id)?;
                debug!(id = %dup.id, key = %dup.key, canonical = %group.canonical.id, "deactivated duplicate");
                merged += 1;
            }
        }
        Ok(merged)
    }

    /// Reduce confidence for memories that have been retrieved at least once
    /// (`last_used_turn > 0`) but not in over `decay_threshold` turns. A
    /// memory that has never been retrieved is left alone - it may simply
    /// not have been needed yet.
    pub fn decay_stale(&self, current_turn: i64, decay_threshold: i64, decay_factor: f32) -> Result<usize, StoreError> {
        let active = self.store.get_active_memories()?;
        let mut decayed = 0;

        for mem in active {
            if mem.last_used_turn <= 0 {
                continue;
            }
            let turns_since_use = current_turn - mem.last_used_turn;
            if turns_since_use <= decay_threshold {
                continue;
            }
            let new_confidence = mem.confidence * decay_factor;
            self.store.set_confidence(&mem.id, new_confidence)?;
            debug!(id = %mem.id, key = %mem.key, from = mem.confidence, to = new_confidence, "decayed stale memory");
            decayed += 1;
        }
        Ok(decayed)
    }

    /// Deactivate memories whose confidence has fallen below `min_confidence`.
    pub fn expire_low_confidence(&self, min_confidence: f32) -> Result<usize, StoreError> {
        let active = self.store.get_active_memories()?;
        let mut expired = 0;

        for mem in active {
            if mem.confidence >= min_confidence {
                continue;
            }
            self.store.deactivate_by_id(&mem.id)?;
            debug!(id = %mem.id, key = %mem.key, confidence = mem.confidence, "expired low-confidence memory");
            expired += 1;
        }
        Ok(expired)
    }
}

/// Pick the best memory in a duplicate cluster: highest confidence first,
/// then most recently updated.
fn pick_canonical(mut memories: Vec<Memory>) -> (Memory, Vec<Memory>) {
    memories.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.updated_at.cmp(&a.updated_at))
    });
    let canonical = memories.remove(0);
    (canonical, memories)
}
