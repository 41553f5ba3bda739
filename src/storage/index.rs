//! In-memory vector index over the entry store
//!
//! A derived cache: it holds only the ranking fields keyed by entry ID and
//! can be dropped and rebuilt from SQLite at any time. Writes are serialized
//! per user; queries take a per-user read lock and see either the pre- or
//! post-state of a concurrent write, never a partial one.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::entry::MemoryEntry;
use crate::error::{Error, Result};

/// Weights and decay constants for the blended relevance score
#[derive(Debug, Clone, Copy)]
pub struct ScoreParams {
    pub weight_similarity: f64,
    pub weight_recency: f64,
    pub weight_importance: f64,
    pub recency_half_life_secs: f64,
}

impl ScoreParams {
    /// Blend cosine similarity, recency decay, and importance into one score
    pub fn blended(&self, cosine: f64, elapsed_secs: f64, importance: f64) -> f64 {
        self.weight_similarity * cosine
            + self.weight_recency * recency_decay(elapsed_secs, self.recency_half_life_secs)
            + self.weight_importance * importance
    }
}

/// Exponential decay: 1.0 at zero elapsed time, 0.5 after one half-life
pub fn recency_decay(elapsed_secs: f64, half_life_secs: f64) -> f64 {
    if half_life_secs <= 0.0 {
        return 0.0;
    }
    0.5f64.powf(elapsed_secs.max(0.0) / half_life_secs)
}

/// Cosine similarity: dot product over the product of Euclidean norms
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// A ranked query hit
#[derive(Debug, Clone)]
pub struct ScoredId {
    pub id: Uuid,
    /// Blended relevance score
    pub score: f64,
    /// Raw cosine similarity component
    pub similarity: f64,
}

/// Ranking fields mirrored from a stored entry
#[derive(Debug, Clone)]
struct IndexedEntry {
    id: Uuid,
    vector: Vec<f32>,
    importance: f64,
    created_at: DateTime<Utc>,
    last_accessed_at: DateTime<Utc>,
}

type UserShard = Arc<RwLock<Vec<IndexedEntry>>>;

/// Per-user in-memory vector index
pub struct VectorIndex {
    dimensions: usize,
    users: RwLock<HashMap<String, UserShard>>,
}

impl VectorIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            users: RwLock::new(HashMap::new()),
        }
    }

    fn shard(&self, user_id: &str) -> UserShard {
        if let Some(shard) = self
            .users
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(user_id)
        {
            return Arc::clone(shard);
        }

        let mut users = self.users.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            users
                .entry(user_id.to_string())
                .or_insert_with(|| Arc::new(RwLock::new(Vec::new()))),
        )
    }

    fn existing_shard(&self, user_id: &str) -> Option<UserShard> {
        self.users
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(user_id)
            .map(Arc::clone)
    }

    /// Insert an entry's ranking fields
    pub fn insert(&self, entry: &MemoryEntry) -> Result<()> {
        if entry.vector.len() != self.dimensions {
            return Err(Error::storage(format!(
                "vector dimension mismatch: expected {}, got {}",
                self.dimensions,
                entry.vector.len()
            )));
        }

        let shard = self.shard(&entry.user_id);
        let mut entries = shard.write().unwrap_or_else(|e| e.into_inner());
        entries.retain(|e| e.id != entry.id);
        entries.push(IndexedEntry {
            id: entry.id,
            vector: entry.vector.clone(),
            importance: entry.importance,
            created_at: entry.created_at,
            last_accessed_at: entry.last_accessed_at,
        });

        Ok(())
    }

    /// Remove an entry by ID
    pub fn remove(&self, user_id: &str, id: Uuid) {
        if let Some(shard) = self.existing_shard(user_id) {
            shard
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .retain(|e| e.id != id);
        }
    }

    /// Mirror updated access stats into the index
    pub fn update_access(
        &self,
        user_id: &str,
        id: Uuid,
        importance: f64,
        last_accessed_at: DateTime<Utc>,
    ) {
        if let Some(shard) = self.existing_shard(user_id) {
            let mut entries = shard.write().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = entries.iter_mut().find(|e| e.id == id) {
                entry.importance = importance;
                entry.last_accessed_at = last_accessed_at;
            }
        }
    }

    /// Discard and repopulate one user's shard from stored entries
    pub fn rebuild(&self, user_id: &str, entries: &[MemoryEntry]) -> Result<()> {
        let rebuilt: Vec<IndexedEntry> = entries
            .iter()
            .map(|entry| {
                if entry.vector.len() != self.dimensions {
                    return Err(Error::storage(format!(
                        "vector dimension mismatch during rebuild: expected {}, got {}",
                        self.dimensions,
                        entry.vector.len()
                    )));
                }
                Ok(IndexedEntry {
                    id: entry.id,
                    vector: entry.vector.clone(),
                    importance: entry.importance,
                    created_at: entry.created_at,
                    last_accessed_at: entry.last_accessed_at,
                })
            })
            .collect::<Result<_>>()?;

        let shard = self.shard(user_id);
        *shard.write().unwrap_or_else(|e| e.into_inner()) = rebuilt;

        Ok(())
    }

    /// Drop a user's shard entirely
    pub fn clear(&self, user_id: &str) {
        self.users
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(user_id);
    }

    /// Number of indexed entries for a user
    pub fn len(&self, user_id: &str) -> usize {
        self.existing_shard(user_id)
            .map(|shard| shard.read().unwrap_or_else(|e| e.into_inner()).len())
            .unwrap_or(0)
    }

    /// Top-k entries by blended score against `query`. Ties break by
    /// `created_at` descending, then ID, so ordering is total and
    /// rebuild-stable. An unknown user or k = 0 yields an empty result.
    pub fn query(
        &self,
        user_id: &str,
        query: &[f32],
        k: usize,
        params: &ScoreParams,
    ) -> Vec<ScoredId> {
        if k == 0 {
            return Vec::new();
        }

        let Some(shard) = self.existing_shard(user_id) else {
            return Vec::new();
        };

        let now = Utc::now();
        let entries = shard.read().unwrap_or_else(|e| e.into_inner());

        let mut scored: Vec<(ScoredId, DateTime<Utc>)> = entries
            .iter()
            .map(|entry| {
                let similarity = cosine_similarity(query, &entry.vector);
                let elapsed = (now - entry.last_accessed_at).num_seconds().max(0) as f64;
                let score = params.blended(similarity, elapsed, entry.importance);
                (
                    ScoredId {
                        id: entry.id,
                        score,
                        similarity,
                    },
                    entry.created_at,
                )
            })
            .collect();

        scored.sort_by(|(a, a_created), (b, b_created)| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b_created.cmp(a_created))
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(k);

        scored.into_iter().map(|(hit, _)| hit).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::MemoryKind;

    const PARAMS: ScoreParams = ScoreParams {
        weight_similarity: 1.0,
        weight_recency: 0.0,
        weight_importance: 0.0,
        recency_half_life_secs: 3600.0,
    };

    fn entry(user: &str, vector: Vec<f32>, importance: f64) -> MemoryEntry {
        MemoryEntry::new(user, "text", MemoryKind::RawMessage, vector, importance)
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.3f32, -0.4, 0.8];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
    }

    #[test]
    fn cosine_of_opposite_vectors_is_negative_one() {
        assert!((cosine_similarity(&[1.0, 2.0], &[-1.0, -2.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_handles_zero_and_mismatched_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn recency_decay_halves_per_half_life() {
        assert!((recency_decay(0.0, 100.0) - 1.0).abs() < 1e-9);
        assert!((recency_decay(100.0, 100.0) - 0.5).abs() < 1e-9);
        assert!((recency_decay(200.0, 100.0) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn insert_rejects_wrong_dimensions() {
        let index = VectorIndex::new(3);
        let e = entry("u1", vec![1.0, 0.0], 0.5);
        assert!(index.insert(&e).is_err());
        assert_eq!(index.len("u1"), 0);
    }

    #[test]
    fn query_ranks_by_similarity() {
        let index = VectorIndex::new(2);
        let close = entry("u1", vec![1.0, 0.1], 0.5);
        let far = entry("u1", vec![0.0, 1.0], 0.5);
        index.insert(&close).unwrap();
        index.insert(&far).unwrap();

        let hits = index.query("u1", &[1.0, 0.0], 2, &PARAMS);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, close.id);
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn query_with_zero_k_or_unknown_user_is_empty() {
        let index = VectorIndex::new(2);
        index.insert(&entry("u1", vec![1.0, 0.0], 0.5)).unwrap();

        assert!(index.query("u1", &[1.0, 0.0], 0, &PARAMS).is_empty());
        assert!(index.query("nobody", &[1.0, 0.0], 5, &PARAMS).is_empty());
    }

    #[test]
    fn pure_importance_ranking() {
        // w1 = 0, w2 = 0, w3 = 1: ranking is importance alone
        let params = ScoreParams {
            weight_similarity: 0.0,
            weight_recency: 0.0,
            weight_importance: 1.0,
            recency_half_life_secs: 3600.0,
        };

        let index = VectorIndex::new(2);
        let high = entry("u1", vec![1.0, 0.0], 0.9);
        let mid = entry("u1", vec![1.0, 0.0], 0.5);
        let low = entry("u1", vec![1.0, 0.0], 0.1);
        for e in [&low, &mid, &high] {
            index.insert(e).unwrap();
        }

        let hits = index.query("u1", &[0.0, 1.0], 2, &params);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, high.id);
        assert_eq!(hits[1].id, mid.id);
        assert!((hits[0].score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn queries_are_scoped_per_user() {
        let index = VectorIndex::new(2);
        index.insert(&entry("u1", vec![1.0, 0.0], 0.5)).unwrap();
        index.insert(&entry("u2", vec![1.0, 0.0], 0.5)).unwrap();

        assert_eq!(index.query("u1", &[1.0, 0.0], 10, &PARAMS).len(), 1);
        assert_eq!(index.query("u2", &[1.0, 0.0], 10, &PARAMS).len(), 1);
    }

    #[test]
    fn rebuild_reproduces_query_ranking() {
        let index = VectorIndex::new(2);
        let entries = vec![
            entry("u1", vec![1.0, 0.0], 0.3),
            entry("u1", vec![0.7, 0.7], 0.6),
            entry("u1", vec![0.0, 1.0], 0.9),
        ];
        for e in &entries {
            index.insert(e).unwrap();
        }

        let before = index.query("u1", &[0.9, 0.2], 3, &PARAMS);
        index.rebuild("u1", &entries).unwrap();
        let after = index.query("u1", &[0.9, 0.2], 3, &PARAMS);

        assert_eq!(before.len(), after.len());
        for (b, a) in before.iter().zip(after.iter()) {
            assert_eq!(b.id, a.id);
            assert!((b.score - a.score).abs() < 1e-9);
        }
    }

    #[test]
    fn remove_and_clear_empty_the_shard() {
        let index = VectorIndex::new(2);
        let e = entry("u1", vec![1.0, 0.0], 0.5);
        index.insert(&e).unwrap();

        index.remove("u1", e.id);
        assert_eq!(index.len("u1"), 0);

        index.insert(&e).unwrap();
        index.clear("u1");
        assert_eq!(index.len("u1"), 0);
    }

    #[test]
    fn insert_same_id_replaces_instead_of_duplicating() {
        let index = VectorIndex::new(2);
        let mut e = entry("u1", vec![1.0, 0.0], 0.2);
        index.insert(&e).unwrap();
        e.importance = 0.8;
        index.insert(&e).unwrap();

        assert_eq!(index.len("u1"), 1);
    }
}
