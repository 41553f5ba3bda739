//! Relevance-ranked memory retrieval

use std::sync::Arc;

use uuid::Uuid;

use crate::config::Config;
use crate::entry::MemoryKind;
use crate::error::{Error, Result};
use crate::provider::{EmbeddingProvider, RetryPolicy};
use crate::store::MemoryStore;

/// A memory returned by retrieval, with its relevance scores
#[derive(Debug, Clone, serde::Serialize)]
pub struct RetrievedMemory {
    pub id: Uuid,
    pub text: String,
    pub kind: MemoryKind,
    /// Blended relevance score (similarity + recency + importance)
    pub score: f64,
    /// Raw cosine similarity to the query
    pub similarity: f64,
}

/// Retrieval engine over the store and index
pub struct RetrievalEngine {
    embedder: Arc<dyn EmbeddingProvider>,
    retry: RetryPolicy,
    config: Config,
}

impl RetrievalEngine {
    pub fn new(config: Config, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        let retry = RetryPolicy::new(
            config.provider_retry_attempts,
            config.provider_retry_base_ms,
            config.provider_retry_max_ms,
            config.provider_timeout(),
        );

        Self {
            embedder,
            retry,
            config,
        }
    }

    /// Return the top-k memories for a query, most relevant first.
    ///
    /// Every returned entry is touched: access count and timestamp update,
    /// and importance gets a saturating boost. Used memories strengthen,
    /// which biases future retrieval toward them.
    pub async fn retrieve_relevant(
        &self,
        store: &MemoryStore,
        user_id: &str,
        query_text: &str,
        k: usize,
        min_score: f64,
    ) -> Result<Vec<RetrievedMemory>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        if query_text.trim().is_empty() {
            return Err(Error::invalid_input("query text must not be empty"));
        }

        // No lock is held across the provider call.
        let query_vector = self
            .retry
            .run(|| self.embedder.embed(query_text))
            .await
            .map_err(|e| Error::embedding_unavailable(e.to_string()))?;

        let hits = store
            .index()
            .query(user_id, &query_vector, k, &store.score_params());

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            if hit.score < min_score {
                continue;
            }

            let Some(mut entry) = store.get_entry(user_id, hit.id)? else {
                // Index lagging behind a delete; skip and let the next
                // rebuild reconcile.
                tracing::debug!(user_id, entry_id = %hit.id, "stale index hit");
                continue;
            };

            entry.mark_accessed(self.config.access_boost);
            store.touch_entry(&entry)?;

            results.push(RetrievedMemory {
                id: entry.id,
                text: entry.text,
                kind: entry.kind,
                score: hit.score,
                similarity: hit.similarity,
            });
        }

        tracing::debug!(user_id, k, returned = results.len(), "retrieval served");

        Ok(results)
    }

    /// The API shape consumed by response-generation glue: defaults for
    /// score floor, `{text, kind, score}` per memory.
    pub async fn relevant_memories(
        &self,
        store: &MemoryStore,
        user_id: &str,
        query_text: &str,
        k: usize,
    ) -> Result<Vec<RetrievedMemory>> {
        self.retrieve_relevant(store, user_id, query_text, k, self.config.min_score)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::MemoryKind;
    use crate::provider::ProviderError;
    use crate::writer::MemoryWriter;
    use async_trait::async_trait;

    /// Maps known phrases to fixed unit vectors so similarity is exact.
    struct PhraseEmbedder;

    #[async_trait]
    impl EmbeddingProvider for PhraseEmbedder {
        async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, ProviderError> {
            let vector = match text {
                t if t.contains("cats") => vec![1.0, 0.0, 0.0],
                t if t.contains("rust") => vec![0.0, 1.0, 0.0],
                _ => vec![0.0, 0.0, 1.0],
            };
            Ok(vector)
        }
    }

    fn test_config() -> Config {
        Config {
            embedding_dimensions: 3,
            provider_retry_base_ms: 1,
            provider_retry_max_ms: 2,
            ..Default::default()
        }
    }

    async fn seeded_store(config: &Config) -> MemoryStore {
        let store = MemoryStore::open_in_memory(config.clone()).unwrap();
        let writer = MemoryWriter::new(config.clone(), Arc::new(PhraseEmbedder));
        writer
            .commit(&store, "u1", "I adore my cats", MemoryKind::RawMessage)
            .await
            .unwrap();
        writer
            .commit(&store, "u1", "learning rust this month", MemoryKind::RawMessage)
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn committed_entry_is_retrievable_with_high_self_similarity() {
        let config = test_config();
        let store = seeded_store(&config).await;
        let engine = RetrievalEngine::new(config, Arc::new(PhraseEmbedder));

        let results = engine
            .retrieve_relevant(&store, "u1", "I adore my cats", 1, 0.0)
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "I adore my cats");
        assert!(results[0].similarity >= 0.999);
    }

    #[tokio::test]
    async fn zero_k_and_empty_index_return_empty_not_error() {
        let config = test_config();
        let store = MemoryStore::open_in_memory(config.clone()).unwrap();
        let engine = RetrievalEngine::new(config, Arc::new(PhraseEmbedder));

        let none = engine
            .retrieve_relevant(&store, "u1", "anything", 0, 0.0)
            .await
            .unwrap();
        assert!(none.is_empty());

        let empty = engine
            .retrieve_relevant(&store, "nobody", "anything", 5, 0.0)
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn min_score_filters_weak_matches() {
        let config = test_config();
        let store = seeded_store(&config).await;
        let engine = RetrievalEngine::new(config, Arc::new(PhraseEmbedder));

        // The cats entry blends to ~0.7 (similarity 1.0 weighted 0.6 plus
        // full recency); the rust entry has zero similarity and blends to
        // ~0.1, so a 0.5 floor keeps exactly one.
        let results = engine
            .retrieve_relevant(&store, "u1", "I adore my cats", 5, 0.5)
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "I adore my cats");
    }

    #[tokio::test]
    async fn retrieval_touches_access_stats() {
        let config = test_config();
        let store = seeded_store(&config).await;
        let engine = RetrievalEngine::new(config.clone(), Arc::new(PhraseEmbedder));

        let hit = engine
            .retrieve_relevant(&store, "u1", "I adore my cats", 1, 0.0)
            .await
            .unwrap()
            .remove(0);

        let entry = store.get_entry("u1", hit.id).unwrap().unwrap();
        assert_eq!(entry.access_count, 1);

        let at_commit = crate::writer::score_importance("I adore my cats", MemoryKind::RawMessage);
        assert!(entry.importance > at_commit);
    }

    #[tokio::test]
    async fn repeated_retrieval_never_pushes_importance_above_one() {
        let config = test_config();
        let store = seeded_store(&config).await;
        let engine = RetrievalEngine::new(config, Arc::new(PhraseEmbedder));

        let mut last_id = None;
        for _ in 0..40 {
            let results = engine
                .retrieve_relevant(&store, "u1", "I adore my cats", 1, 0.0)
                .await
                .unwrap();
            last_id = Some(results[0].id);
        }

        let entry = store.get_entry("u1", last_id.unwrap()).unwrap().unwrap();
        assert!(entry.importance <= 1.0);
        assert_eq!(entry.access_count, 40);
    }

    #[tokio::test]
    async fn retrieval_is_scoped_to_the_user() {
        let config = test_config();
        let store = seeded_store(&config).await;
        let engine = RetrievalEngine::new(config, Arc::new(PhraseEmbedder));

        let other = engine
            .retrieve_relevant(&store, "u2", "I adore my cats", 5, 0.0)
            .await
            .unwrap();
        assert!(other.is_empty());
    }
}
