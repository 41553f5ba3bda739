//! Ingestion path: embed, score, and commit new memories

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::config::Config;
use crate::entry::{MemoryEntry, MemoryKind};
use crate::error::{Error, Result};
use crate::provider::{EmbeddingProvider, RetryPolicy};
use crate::store::MemoryStore;

const IMPORTANCE_KEYWORDS: &[&str] = &[
    "important", "urgent", "goal", "objective", "decision", "problem", "solution", "project",
    "plan", "deadline", "commitment",
];

const TOPIC_KEYWORDS: &[(&str, &[&str])] = &[
    ("business", &["business", "company", "startup", "marketing", "sales"]),
    ("personal_growth", &["growth", "habit", "mindset", "discipline", "improve"]),
    ("health", &["health", "sport", "nutrition", "fitness", "sleep", "wellbeing"]),
    ("education", &["learn", "study", "training", "skill", "course"]),
    ("technology", &["tech", "programming", "code", "software", "app"]),
    ("creativity", &["creative", "art", "design", "writing", "music"]),
    ("finances", &["money", "budget", "investment", "savings", "finance"]),
];

const EMOTION_KEYWORDS: &[(&str, &[&str])] = &[
    ("positive", &["happy", "glad", "motivated", "excited", "great", "awesome"]),
    ("negative", &["sad", "disappointed", "frustrated", "difficult", "worried", "anxious"]),
    ("determined", &["determined", "ready", "focused", "committed", "driven"]),
];

/// Deterministic importance heuristic over text features. Pure so scoring
/// stays reproducible across runs and testable in isolation.
pub fn score_importance(text: &str, kind: MemoryKind) -> f64 {
    let lower = text.to_lowercase();
    let keyword_matches = IMPORTANCE_KEYWORDS
        .iter()
        .filter(|kw| lower.contains(*kw))
        .count();

    let base = (keyword_matches as f64 * 0.2).min(0.8);
    let length_bonus = (text.len() as f64 / 1000.0).min(0.2);
    let kind_baseline = match kind {
        MemoryKind::RawMessage => 0.0,
        MemoryKind::Summary => 0.15,
        MemoryKind::Insight => 0.3,
    };

    (base + length_bonus + kind_baseline).min(1.0)
}

/// Detect coarse topics by keyword table
pub fn detect_topics(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    TOPIC_KEYWORDS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|kw| lower.contains(kw)))
        .map(|(topic, _)| topic.to_string())
        .collect()
}

/// Detect coarse emotions by keyword table; defaults to neutral
pub fn detect_emotions(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let detected: Vec<String> = EMOTION_KEYWORDS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|kw| lower.contains(kw)))
        .map(|(emotion, _)| emotion.to_string())
        .collect();

    if detected.is_empty() {
        vec!["neutral".to_string()]
    } else {
        detected
    }
}

/// Ingestion path for new memories
pub struct MemoryWriter {
    embedder: Arc<dyn EmbeddingProvider>,
    retry: RetryPolicy,
    config: Config,
    /// Users are queued here when their commit count hits the synthesis
    /// cadence; the receiver side runs profile synthesis out of band.
    synthesis_tx: Option<UnboundedSender<String>>,
}

impl MemoryWriter {
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
            synthesis_tx: None,
        }
    }

    /// Wire the auto-synthesis queue
    pub fn with_synthesis_queue(mut self, tx: UnboundedSender<String>) -> Self {
        self.synthesis_tx = Some(tx);
        self
    }

    /// Commit a new memory: validate, embed with retry, score, persist,
    /// index. Nothing is persisted when embedding fails.
    pub async fn commit(
        &self,
        store: &MemoryStore,
        user_id: &str,
        text: &str,
        kind: MemoryKind,
    ) -> Result<MemoryEntry> {
        if text.trim().is_empty() {
            return Err(Error::invalid_input("memory text must not be empty"));
        }
        if user_id.trim().is_empty() {
            return Err(Error::invalid_input("user_id must not be empty"));
        }

        // Embed before taking any lock; the provider call can block for the
        // whole retry budget.
        let vector = self
            .retry
            .run(|| self.embedder.embed(text))
            .await
            .map_err(|e| Error::embedding_unavailable(e.to_string()))?;

        if vector.len() != self.config.embedding_dimensions {
            return Err(Error::embedding_unavailable(format!(
                "provider returned {} dimensions, expected {}",
                vector.len(),
                self.config.embedding_dimensions
            )));
        }

        let importance = score_importance(text, kind);
        let entry = MemoryEntry::new(user_id, text, kind, vector, importance)
            .with_topics(detect_topics(text))
            .with_emotions(detect_emotions(text));

        store.save_entry(&entry)?;

        tracing::info!(
            user_id,
            entry_id = %entry.id,
            kind = %entry.kind,
            importance = entry.importance,
            "memory committed"
        );

        self.maybe_queue_synthesis(store, user_id);

        Ok(entry)
    }

    /// Queue a synthesis run when the user's commit count hits the cadence.
    /// Failures here never fail the commit.
    fn maybe_queue_synthesis(&self, store: &MemoryStore, user_id: &str) {
        let Some(tx) = &self.synthesis_tx else {
            return;
        };
        let every = self.config.synthesis_every_commits;
        if every == 0 {
            return;
        }

        match store.count_entries(user_id) {
            Ok(count) if count > 0 && count % every == 0 => {
                tracing::info!(user_id, count, "synthesis cadence reached");
                let _ = tx.send(user_id.to_string());
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(user_id, error = %err, "could not check synthesis cadence");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::provider::ProviderError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Deterministic embedding double: a fixed-dimension fingerprint of the
    /// text, so identical text always produces an identical vector.
    struct FingerprintEmbedder {
        dimensions: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for FingerprintEmbedder {
        async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, ProviderError> {
            let mut vector = vec![0.0f32; self.dimensions];
            for (i, byte) in text.bytes().enumerate() {
                vector[i % self.dimensions] += f32::from(byte) / 255.0;
            }
            Ok(vector)
        }
    }

    struct FailingEmbedder {
        calls: AtomicU32,
    }

    #[async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        async fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Fault("provider down".into()))
        }
    }

    fn test_config() -> Config {
        Config {
            embedding_dimensions: 8,
            provider_retry_base_ms: 1,
            provider_retry_max_ms: 2,
            ..Default::default()
        }
    }

    fn test_store(config: &Config) -> MemoryStore {
        MemoryStore::open_in_memory(config.clone()).unwrap()
    }

    #[test]
    fn importance_scores_keywords_and_length() {
        let plain = score_importance("hello there", MemoryKind::RawMessage);
        let urgent = score_importance(
            "urgent: the project deadline is an important goal",
            MemoryKind::RawMessage,
        );
        assert!(urgent > plain);
        assert!(urgent <= 1.0);
    }

    #[test]
    fn importance_is_deterministic() {
        let text = "we made a decision about the plan";
        assert_eq!(
            score_importance(text, MemoryKind::Summary),
            score_importance(text, MemoryKind::Summary)
        );
    }

    #[test]
    fn importance_kind_baseline_orders_kinds() {
        let text = "same text";
        let raw = score_importance(text, MemoryKind::RawMessage);
        let summary = score_importance(text, MemoryKind::Summary);
        let insight = score_importance(text, MemoryKind::Insight);
        assert!(raw < summary && summary < insight);
    }

    #[test]
    fn topic_and_emotion_detection() {
        let topics = detect_topics("I want to learn programming and improve my budget");
        assert!(topics.contains(&"education".to_string()));
        assert!(topics.contains(&"technology".to_string()));
        assert!(topics.contains(&"finances".to_string()));

        assert_eq!(detect_emotions("nothing special"), vec!["neutral"]);
        assert!(detect_emotions("I am so motivated and driven")
            .contains(&"determined".to_string()));
    }

    #[tokio::test]
    async fn commit_rejects_empty_text() {
        let config = test_config();
        let store = test_store(&config);
        let writer = MemoryWriter::new(
            config.clone(),
            Arc::new(FingerprintEmbedder { dimensions: 8 }),
        );

        let result = writer.commit(&store, "u1", "   ", MemoryKind::RawMessage).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert_eq!(store.count_entries("u1").unwrap(), 0);
    }

    #[tokio::test]
    async fn commit_persists_and_indexes() {
        let config = test_config();
        let store = test_store(&config);
        let writer = MemoryWriter::new(
            config.clone(),
            Arc::new(FingerprintEmbedder { dimensions: 8 }),
        );

        let entry = writer
            .commit(&store, "u1", "my urgent goal for the project", MemoryKind::RawMessage)
            .await
            .unwrap();

        assert_eq!(entry.vector.len(), 8);
        assert!(entry.importance > 0.0);
        assert_eq!(store.count_entries("u1").unwrap(), 1);
        assert_eq!(store.index().len("u1"), 1);
    }

    #[tokio::test]
    async fn failed_embedding_persists_nothing() {
        let config = test_config();
        let store = test_store(&config);
        let embedder = Arc::new(FailingEmbedder {
            calls: AtomicU32::new(0),
        });
        let writer = MemoryWriter::new(config.clone(), embedder.clone());

        let before = store.count_entries("u1").unwrap();
        let result = writer
            .commit(&store, "u1", "this will not stick", MemoryKind::RawMessage)
            .await;

        assert!(matches!(result, Err(Error::EmbeddingUnavailable(_))));
        assert_eq!(store.count_entries("u1").unwrap(), before);
        assert_eq!(
            embedder.calls.load(Ordering::SeqCst),
            config.provider_retry_attempts
        );
    }

    #[tokio::test]
    async fn dimension_mismatch_persists_nothing() {
        let config = test_config();
        let store = test_store(&config);
        let writer = MemoryWriter::new(
            config.clone(),
            Arc::new(FingerprintEmbedder { dimensions: 4 }),
        );

        let result = writer
            .commit(&store, "u1", "wrong dims", MemoryKind::RawMessage)
            .await;

        assert!(matches!(result, Err(Error::EmbeddingUnavailable(_))));
        assert_eq!(store.count_entries("u1").unwrap(), 0);
    }

    #[tokio::test]
    async fn synthesis_cadence_queues_user() {
        let mut config = test_config();
        config.synthesis_every_commits = 2;
        let store = test_store(&config);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let writer = MemoryWriter::new(
            config.clone(),
            Arc::new(FingerprintEmbedder { dimensions: 8 }),
        )
        .with_synthesis_queue(tx);

        writer.commit(&store, "u1", "first", MemoryKind::RawMessage).await.unwrap();
        assert!(rx.try_recv().is_err());

        writer.commit(&store, "u1", "second", MemoryKind::RawMessage).await.unwrap();
        assert_eq!(rx.try_recv().unwrap(), "u1");
    }
}
