//! Reverie Memory Server
//!
//! HTTP API for the memory engine. Providers are wired at this composition
//! root; the deterministic stand-ins below are replaced by real API clients
//! in a deployment.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reverie_memory::{
    config::Config,
    entry::{MemoryEntry, MemoryKind, UserProfile},
    error::Error,
    profile::ProfileSynthesizer,
    provider::{EmbeddingProvider, ProviderError, SynthesisProvider},
    retrieval::RetrievalEngine,
    storage::{ScanOrder, StoreStats},
    store::MemoryStore,
    sweeper::{RetentionSweeper, SweepReport},
    writer::{detect_topics, MemoryWriter},
};

/// Application state shared across handlers
struct AppState {
    store: Arc<MemoryStore>,
    writer: MemoryWriter,
    retrieval: RetrievalEngine,
    synthesizer: Arc<ProfileSynthesizer>,
    sweeper: Arc<RetentionSweeper>,
}

type SharedState = Arc<AppState>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Starting Reverie Memory Server on port {}", config.server_port);
    tracing::info!("Data directory: {:?}", config.data_dir);

    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbedder {
        dimensions: config.embedding_dimensions,
    });
    let synthesis: Arc<dyn SynthesisProvider> = Arc::new(DigestSynthesizer);

    // Initialize components
    let store = Arc::new(MemoryStore::open(config.clone())?);
    let (synthesis_tx, mut synthesis_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let writer =
        MemoryWriter::new(config.clone(), embedder.clone()).with_synthesis_queue(synthesis_tx);
    let retrieval = RetrievalEngine::new(config.clone(), embedder.clone());
    let synthesizer = Arc::new(ProfileSynthesizer::new(config.clone(), synthesis));
    let sweeper = Arc::new(RetentionSweeper::new(config.clone()));

    // Background tasks: retention sweep, scheduled synthesis, and the
    // commit-cadence synthesis queue.
    tokio::spawn(sweeper.clone().run(store.clone()));
    tokio::spawn(synthesizer.clone().run_scheduled(store.clone()));
    {
        let store = store.clone();
        let synthesizer = synthesizer.clone();
        let cadence_writer = MemoryWriter::new(config.clone(), embedder.clone());
        tokio::spawn(async move {
            while let Some(user_id) = synthesis_rx.recv().await {
                match synthesizer.synthesize(&store, &user_id).await {
                    Ok(Some(profile)) => {
                        // Fold the fresh summary back in as compacted knowledge.
                        if let Err(err) = cadence_writer
                            .commit(&store, &user_id, &profile.summary_text, MemoryKind::Insight)
                            .await
                        {
                            tracing::warn!(user_id, error = %err, "insight commit failed");
                        }
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!(user_id, error = %err, "cadence synthesis failed");
                    }
                }
            }
        });
    }

    let state = Arc::new(AppState {
        store,
        writer,
        retrieval,
        synthesizer,
        sweeper,
    });

    // Build router
    let app = Router::new()
        // Health check
        .route("/health", get(health))
        // Memory ingestion and listing
        .route("/memories", post(commit_memory))
        .route("/memories/:user_id", get(list_memories))
        // Retrieval
        .route("/retrieve", post(retrieve_memories))
        // Profiles
        .route("/profile/:user_id", get(get_profile))
        .route("/profile/:user_id/synthesize", post(trigger_synthesis))
        // Retention
        .route("/sweep/:user_id", post(sweep_user))
        // Analytics
        .route("/stats", get(get_stats))
        // Add CORS
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state.clone());

    let port = state.store.config().server_port;
    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!("Server listening on http://127.0.0.1:{}", port);

    axum::serve(listener, app).await?;

    Ok(())
}

// === Stand-in providers ===

/// Deterministic local embedding: hashed bag-of-words, L2-normalized.
/// Identical text always maps to the identical vector.
struct HashEmbedder {
    dimensions: usize,
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let mut vector = vec![0.0f32; self.dimensions];

        for token in text.to_lowercase().split_whitespace() {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let h = hasher.finish();
            let bucket = (h % self.dimensions as u64) as usize;
            let sign = if h & (1u64 << 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }

        Ok(vector)
    }
}

/// Deterministic extractive stand-in for the synthesis model: summary from
/// the most recent fragments, traits from topic frequencies.
struct DigestSynthesizer;

#[async_trait]
impl SynthesisProvider for DigestSynthesizer {
    async fn synthesize(
        &self,
        _prompt: &str,
        fragments: &[String],
    ) -> Result<String, ProviderError> {
        let summary: String = fragments
            .iter()
            .rev()
            .take(3)
            .map(|f| f.trim())
            .collect::<Vec<_>>()
            .join(" ");
        let summary: String = summary.chars().take(400).collect();

        let mut counts: BTreeMap<String, u32> = BTreeMap::new();
        for fragment in fragments {
            for topic in detect_topics(fragment) {
                *counts.entry(topic).or_insert(0) += 1;
            }
        }
        let traits: BTreeMap<String, f64> = counts
            .into_iter()
            .map(|(topic, n)| (topic, (0.3 + 0.1 * f64::from(n)).min(1.0)))
            .collect();

        let body = serde_json::json!({
            "summary": if summary.is_empty() { "No notable history yet.".to_string() } else { summary },
            "traits": traits,
        });

        Ok(body.to_string())
    }
}

// === Handlers ===

async fn health() -> &'static str {
    "ok"
}

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::EmbeddingUnavailable(_) | Error::SynthesisUnavailable(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        Error::SynthesisParse(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// --- Memory handlers ---

#[derive(Debug, Deserialize)]
struct CommitMemoryRequest {
    user_id: String,
    text: String,
    kind: Option<String>,
}

async fn commit_memory(
    State(state): State<SharedState>,
    Json(req): Json<CommitMemoryRequest>,
) -> Result<Json<MemoryEntryResponse>, StatusCode> {
    let kind = match req.kind.as_deref() {
        None | Some("raw_message") => MemoryKind::RawMessage,
        Some("summary") => MemoryKind::Summary,
        Some("insight") => MemoryKind::Insight,
        Some(_) => return Err(StatusCode::BAD_REQUEST),
    };

    let entry = state
        .writer
        .commit(&state.store, &req.user_id, &req.text, kind)
        .await
        .map_err(|e| status_for(&e))?;

    Ok(Json(MemoryEntryResponse::from(entry)))
}

#[derive(Debug, Deserialize)]
struct ListMemoriesQuery {
    limit: Option<usize>,
}

async fn list_memories(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
    Query(query): Query<ListMemoriesQuery>,
) -> Result<Json<Vec<MemoryEntryResponse>>, StatusCode> {
    let entries = state
        .store
        .list_entries(&user_id, ScanOrder::CreatedAtDesc, query.limit)
        .map_err(|e| status_for(&e))?;

    Ok(Json(entries.into_iter().map(MemoryEntryResponse::from).collect()))
}

// --- Retrieval handlers ---

#[derive(Debug, Deserialize)]
struct RetrieveRequest {
    user_id: String,
    query: String,
    k: Option<usize>,
    min_score: Option<f64>,
}

#[derive(Debug, Serialize)]
struct RetrieveResponse {
    memories: Vec<RetrievedMemoryResponse>,
}

#[derive(Debug, Serialize)]
struct RetrievedMemoryResponse {
    text: String,
    kind: String,
    score: f64,
}

async fn retrieve_memories(
    State(state): State<SharedState>,
    Json(req): Json<RetrieveRequest>,
) -> Result<Json<RetrieveResponse>, StatusCode> {
    let config = state.store.config();
    let k = req.k.unwrap_or(config.default_k);
    let min_score = req.min_score.unwrap_or(config.min_score);

    let memories = state
        .retrieval
        .retrieve_relevant(&state.store, &req.user_id, &req.query, k, min_score)
        .await
        .map_err(|e| status_for(&e))?;

    Ok(Json(RetrieveResponse {
        memories: memories
            .into_iter()
            .map(|m| RetrievedMemoryResponse {
                text: m.text,
                kind: m.kind.to_string(),
                score: m.score,
            })
            .collect(),
    }))
}

// --- Profile handlers ---

async fn get_profile(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
) -> Result<Json<ProfileResponse>, StatusCode> {
    let profile = state
        .store
        .get_profile(&user_id)
        .map_err(|e| status_for(&e))?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(ProfileResponse::from(profile)))
}

async fn trigger_synthesis(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
) -> StatusCode {
    let store = state.store.clone();
    let synthesizer = state.synthesizer.clone();
    tokio::spawn(async move {
        if let Err(err) = synthesizer.synthesize(&store, &user_id).await {
            tracing::warn!(user_id, error = %err, "requested synthesis failed");
        }
    });

    StatusCode::ACCEPTED
}

// --- Retention handlers ---

async fn sweep_user(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
) -> Result<Json<SweepReport>, StatusCode> {
    state
        .sweeper
        .sweep_user(&state.store, &user_id)
        .map(Json)
        .map_err(|e| status_for(&e))
}

// --- Analytics handlers ---

#[derive(Debug, Deserialize)]
struct StatsQuery {
    user_id: Option<String>,
}

async fn get_stats(
    State(state): State<SharedState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<StoreStats>, StatusCode> {
    state
        .store
        .stats(query.user_id.as_deref())
        .map(Json)
        .map_err(|e| status_for(&e))
}

// === Response types ===

#[derive(Debug, Serialize)]
struct MemoryEntryResponse {
    id: String,
    user_id: String,
    text: String,
    kind: String,
    importance: f64,
    topics: Vec<String>,
    emotions: Vec<String>,
    created_at: String,
    last_accessed_at: String,
    access_count: u32,
}

impl From<MemoryEntry> for MemoryEntryResponse {
    fn from(entry: MemoryEntry) -> Self {
        Self {
            id: entry.id.to_string(),
            user_id: entry.user_id,
            text: entry.text,
            kind: entry.kind.to_string(),
            importance: entry.importance,
            topics: entry.topics,
            emotions: entry.emotions,
            created_at: entry.created_at.to_rfc3339(),
            last_accessed_at: entry.last_accessed_at.to_rfc3339(),
            access_count: entry.access_count,
        }
    }
}

#[derive(Debug, Serialize)]
struct ProfileResponse {
    user_id: String,
    summary_text: String,
    traits: BTreeMap<String, f64>,
    version: u32,
    updated_at: String,
}

impl From<UserProfile> for ProfileResponse {
    fn from(profile: UserProfile) -> Self {
        Self {
            user_id: profile.user_id,
            summary_text: profile.summary_text,
            traits: profile.traits,
            version: profile.version,
            updated_at: profile.updated_at.to_rfc3339(),
        }
    }
}
