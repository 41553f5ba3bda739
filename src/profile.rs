//! Profile synthesis: folding recent memories into a user profile

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;

use crate::config::Config;
use crate::entry::UserProfile;
use crate::error::{Error, Result};
use crate::provider::{RetryPolicy, SynthesisProvider};
use crate::store::MemoryStore;

const SYNTHESIS_PROMPT: &str = r#"Analyze the following memory fragments about one user and produce a behavioral profile.

Instructions:
1. Summarize who this user is, what they care about, and how they communicate.
2. Identify durable traits (preferences, habits, goals) with a confidence weight between 0 and 1.
3. Base everything only on the fragments; do not invent details.

Respond with JSON only:
{
    "summary": "2-3 sentence description of the user",
    "traits": {"trait_name": 0.8}
}"#;

/// The structured result the synthesis model must produce
#[derive(Debug, Deserialize)]
struct SynthesisResponse {
    summary: String,
    #[serde(default)]
    traits: BTreeMap<String, f64>,
}

/// Folds a user's recent memories into an updated profile
pub struct ProfileSynthesizer {
    provider: Arc<dyn SynthesisProvider>,
    retry: RetryPolicy,
    config: Config,
}

impl ProfileSynthesizer {
    pub fn new(config: Config, provider: Arc<dyn SynthesisProvider>) -> Self {
        let retry = RetryPolicy::new(
            config.provider_retry_attempts,
            config.provider_retry_base_ms,
            config.provider_retry_max_ms,
            config.provider_timeout(),
        );

        Self {
            provider,
            retry,
            config,
        }
    }

    /// Synthesize an updated profile from the user's recent memories.
    ///
    /// Replace-or-nothing: the stored profile only changes when the provider
    /// output parses cleanly. Returns `Ok(None)` when the user has no
    /// memories in the synthesis window.
    pub async fn synthesize(
        &self,
        store: &MemoryStore,
        user_id: &str,
    ) -> Result<Option<UserProfile>> {
        let cutoff = Utc::now() - ChronoDuration::days(self.config.synthesis_window_days);
        let mut selected =
            store.list_entries_since(user_id, cutoff, self.config.synthesis_top_n)?;

        if selected.is_empty() {
            tracing::debug!(user_id, "no recent memories to synthesize");
            return Ok(None);
        }

        // Selected by importance; presented chronologically so the model
        // sees a narrative.
        selected.sort_by_key(|entry| entry.created_at);
        let fragments: Vec<String> = selected
            .iter()
            .map(|entry| format!("[{}] {}", entry.kind, entry.text))
            .collect();

        let raw = self
            .retry
            .run(|| self.provider.synthesize(SYNTHESIS_PROMPT, &fragments))
            .await
            .map_err(|e| Error::synthesis_unavailable(e.to_string()))?;

        let parsed = parse_synthesis_output(&raw)?;

        let previous = store.get_profile(user_id)?;
        let profile = UserProfile::next(
            user_id,
            parsed.summary,
            parsed
                .traits
                .into_iter()
                .map(|(name, weight)| (name, weight.clamp(0.0, 1.0)))
                .collect(),
            previous.as_ref(),
        );
        store.put_profile(&profile)?;

        tracing::info!(
            user_id,
            version = profile.version,
            traits = profile.traits.len(),
            fragments = fragments.len(),
            "profile synthesized"
        );

        Ok(Some(profile))
    }

    /// Background loop: periodically re-synthesize every known user.
    /// Failures are logged and never stop the loop.
    pub async fn run_scheduled(self: Arc<Self>, store: Arc<MemoryStore>) {
        let period = Duration::from_secs(self.config.synthesis_interval_secs.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            let users = match store.list_users() {
                Ok(users) => users,
                Err(err) => {
                    tracing::warn!(error = %err, "scheduled synthesis could not list users");
                    continue;
                }
            };

            for user_id in users {
                if let Err(err) = self.synthesize(&store, &user_id).await {
                    tracing::warn!(user_id, error = %err, "scheduled synthesis failed");
                }
            }
        }
    }
}

/// Parse the provider's output, tolerating markdown code fences around the
/// JSON body.
fn parse_synthesis_output(raw: &str) -> Result<SynthesisResponse> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end_matches("```"))
        .unwrap_or(trimmed)
        .trim();

    let parsed: SynthesisResponse = serde_json::from_str(body)
        .map_err(|e| Error::synthesis_parse(format!("{}: {:.120}", e, body)))?;

    if parsed.summary.trim().is_empty() {
        return Err(Error::synthesis_parse("summary is empty"));
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{MemoryEntry, MemoryKind};
    use crate::provider::ProviderError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Returns a fixed sequence of canned responses.
    struct CannedSynthesis {
        responses: Mutex<Vec<std::result::Result<String, ProviderError>>>,
    }

    impl CannedSynthesis {
        fn new(responses: Vec<std::result::Result<String, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
            })
        }
    }

    #[async_trait]
    impl SynthesisProvider for CannedSynthesis {
        async fn synthesize(
            &self,
            _prompt: &str,
            _fragments: &[String],
        ) -> std::result::Result<String, ProviderError> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(ProviderError::Fault("out of canned responses".into()));
            }
            responses.remove(0)
        }
    }

    fn test_config() -> Config {
        Config {
            embedding_dimensions: 3,
            provider_retry_attempts: 1,
            provider_retry_base_ms: 1,
            provider_retry_max_ms: 2,
            ..Default::default()
        }
    }

    fn seeded_store(config: &Config) -> MemoryStore {
        let store = MemoryStore::open_in_memory(config.clone()).unwrap();
        for (text, importance) in [("likes rust", 0.9), ("has two cats", 0.6)] {
            let entry = MemoryEntry::new(
                "u1",
                text,
                MemoryKind::RawMessage,
                vec![0.1, 0.2, 0.3],
                importance,
            );
            store.save_entry(&entry).unwrap();
        }
        store
    }

    const GOOD_JSON: &str =
        r#"{"summary": "A rust enthusiast with cats.", "traits": {"curious": 0.8}}"#;

    #[tokio::test]
    async fn synthesize_creates_versioned_profile() {
        let config = test_config();
        let store = seeded_store(&config);
        let synthesizer = ProfileSynthesizer::new(
            config,
            CannedSynthesis::new(vec![Ok(GOOD_JSON.into()), Ok(GOOD_JSON.into())]),
        );

        let first = synthesizer.synthesize(&store, "u1").await.unwrap().unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(first.traits.get("curious"), Some(&0.8));

        let second = synthesizer.synthesize(&store, "u1").await.unwrap().unwrap();
        assert_eq!(second.version, 2);
        assert_eq!(store.get_profile("u1").unwrap().unwrap().version, 2);
    }

    #[tokio::test]
    async fn empty_window_is_a_no_op() {
        let config = test_config();
        let store = MemoryStore::open_in_memory(config.clone()).unwrap();
        let synthesizer =
            ProfileSynthesizer::new(config, CannedSynthesis::new(vec![Ok(GOOD_JSON.into())]));

        let result = synthesizer.synthesize(&store, "nobody").await.unwrap();
        assert!(result.is_none());
        assert!(store.get_profile("nobody").unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_output_leaves_profile_untouched() {
        let config = test_config();
        let store = seeded_store(&config);
        let synthesizer = ProfileSynthesizer::new(
            config,
            CannedSynthesis::new(vec![Ok(GOOD_JSON.into()), Ok("not json at all".into())]),
        );

        let first = synthesizer.synthesize(&store, "u1").await.unwrap().unwrap();
        assert_eq!(first.version, 1);

        let result = synthesizer.synthesize(&store, "u1").await;
        assert!(matches!(result, Err(Error::SynthesisParse(_))));

        let stored = store.get_profile("u1").unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.summary_text, "A rust enthusiast with cats.");
    }

    #[tokio::test]
    async fn provider_exhaustion_surfaces_unavailable() {
        let config = test_config();
        let store = seeded_store(&config);
        let synthesizer = ProfileSynthesizer::new(
            config,
            CannedSynthesis::new(vec![Err(ProviderError::RateLimited)]),
        );

        let result = synthesizer.synthesize(&store, "u1").await;
        assert!(matches!(result, Err(Error::SynthesisUnavailable(_))));
        assert!(store.get_profile("u1").unwrap().is_none());
    }

    #[test]
    fn parse_tolerates_code_fences() {
        let fenced = format!("```json\n{}\n```", GOOD_JSON);
        let parsed = parse_synthesis_output(&fenced).unwrap();
        assert_eq!(parsed.summary, "A rust enthusiast with cats.");

        assert!(parse_synthesis_output("```json\n{\"traits\": {}}\n```").is_err());
    }

    #[test]
    fn parse_clamps_are_applied_downstream() {
        let parsed =
            parse_synthesis_output(r#"{"summary": "s", "traits": {"wild": 7.5}}"#).unwrap();
        // Raw parse keeps the provider value; synthesize() clamps to [0, 1].
        assert_eq!(parsed.traits.get("wild"), Some(&7.5));
    }
}
