//! # Reverie Memory
//!
//! Long-term conversational memory engine for AI assistants.
//!
//! ## Architecture
//!
//! - **Memory Store** - SQLite source of truth for entries and profiles
//! - **Vector Index** - in-memory, per-user, rebuildable similarity cache
//! - **Memory Writer** - ingestion: embed, score importance, commit
//! - **Retrieval Engine** - blended similarity/recency/importance ranking
//! - **Profile Synthesizer** - folds recent memories into a user profile
//! - **Retention Sweeper** - capacity and age limits on a timer
//!
//! The embedding and synthesis models are external capabilities behind
//! traits; see [`provider`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use reverie_memory::{Config, MemoryKind, MemoryStore, MemoryWriter, RetrievalEngine};
//!
//! let config = Config::from_env()?;
//! let store = MemoryStore::open(config.clone())?;
//! let writer = MemoryWriter::new(config.clone(), embedder.clone());
//! let retrieval = RetrievalEngine::new(config, embedder);
//!
//! // Commit a fragment
//! writer.commit(&store, user_id, text, MemoryKind::RawMessage).await?;
//!
//! // Retrieve the most relevant memories for a query
//! let memories = retrieval.relevant_memories(&store, user_id, query, 5).await?;
//! ```

pub mod config;
pub mod entry;
pub mod error;
pub mod profile;
pub mod provider;
pub mod retrieval;
pub mod storage;
pub mod store;
pub mod sweeper;
pub mod writer;

pub use config::Config;
pub use entry::{MemoryEntry, MemoryKind, UserProfile};
pub use error::{Error, Result};
pub use profile::ProfileSynthesizer;
pub use provider::{EmbeddingProvider, ProviderError, SynthesisProvider};
pub use retrieval::{RetrievalEngine, RetrievedMemory};
pub use store::MemoryStore;
pub use sweeper::{RetentionSweeper, SweepReport};
pub use writer::MemoryWriter;
