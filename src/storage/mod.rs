//! Storage backends for reverie-memory

pub mod index;
mod sqlite;

pub use index::{cosine_similarity, recency_decay, ScoreParams, ScoredId, VectorIndex};
pub use sqlite::{ScanOrder, SqliteStorage, StoreStats};
