//! Memory store coordinator
//!
//! Keeps the durable SQLite store and the derived vector index in sync.
//! SQLite is the source of truth; the index can always be discarded and
//! rebuilt from it.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::Config;
use crate::entry::{MemoryEntry, UserProfile};
use crate::error::Result;
use crate::storage::{ScanOrder, ScoreParams, SqliteStorage, StoreStats, VectorIndex};

/// Coordinates the durable store and the vector index
pub struct MemoryStore {
    config: Config,
    sqlite: SqliteStorage,
    index: VectorIndex,
}

impl MemoryStore {
    /// Open the store and populate the index from persisted entries
    pub fn open(config: Config) -> Result<Self> {
        config.ensure_dirs()?;

        let sqlite = SqliteStorage::new(&config)?;
        let index = VectorIndex::new(config.embedding_dimensions);

        let store = Self {
            config,
            sqlite,
            index,
        };
        store.rebuild_all()?;

        Ok(store)
    }

    /// Open an in-memory store, used by tests
    pub fn open_in_memory(config: Config) -> Result<Self> {
        let sqlite = SqliteStorage::in_memory()?;
        let index = VectorIndex::new(config.embedding_dimensions);

        Ok(Self {
            config,
            sqlite,
            index,
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the durable storage
    pub fn sqlite(&self) -> &SqliteStorage {
        &self.sqlite
    }

    /// Get the vector index
    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Score parameters for retrieval queries
    pub fn score_params(&self) -> ScoreParams {
        ScoreParams {
            weight_similarity: self.config.weight_similarity,
            weight_recency: self.config.weight_recency,
            weight_importance: self.config.weight_importance,
            recency_half_life_secs: self.config.recency_half_life_secs,
        }
    }

    /// Persist a new entry, then mirror it into the index. The store write
    /// is authoritative; an index failure is recoverable by rebuild.
    pub fn save_entry(&self, entry: &MemoryEntry) -> Result<()> {
        self.sqlite.insert_entry(entry)?;

        if let Err(err) = self.index.insert(entry) {
            tracing::warn!(
                user_id = %entry.user_id,
                entry_id = %entry.id,
                error = %err,
                "index insert failed; entry remains recoverable via rebuild"
            );
        }

        Ok(())
    }

    /// Persist updated access stats and mirror them into the index
    pub fn touch_entry(&self, entry: &MemoryEntry) -> Result<()> {
        self.sqlite.update_access(entry)?;
        self.index.update_access(
            &entry.user_id,
            entry.id,
            entry.importance,
            entry.last_accessed_at,
        );
        Ok(())
    }

    /// Delete entries from both the store and the index
    pub fn delete_entries(&self, user_id: &str, ids: &[Uuid]) -> Result<usize> {
        let deleted = self.sqlite.delete_entries(user_id, ids)?;
        for id in ids {
            self.index.remove(user_id, *id);
        }
        Ok(deleted)
    }

    /// Rebuild one user's index shard from the store
    pub fn rebuild_index(&self, user_id: &str) -> Result<()> {
        let entries = self.sqlite.list_entries(user_id, ScanOrder::CreatedAtDesc, None)?;
        self.index.rebuild(user_id, &entries)
    }

    /// Rebuild the whole index from the store
    pub fn rebuild_all(&self) -> Result<()> {
        for user_id in self.sqlite.list_users()? {
            self.rebuild_index(&user_id)?;
        }
        Ok(())
    }

    pub fn get_entry(&self, user_id: &str, id: Uuid) -> Result<Option<MemoryEntry>> {
        self.sqlite.get_entry(user_id, id)
    }

    pub fn list_entries(
        &self,
        user_id: &str,
        order: ScanOrder,
        limit: Option<usize>,
    ) -> Result<Vec<MemoryEntry>> {
        self.sqlite.list_entries(user_id, order, limit)
    }

    pub fn list_entries_since(
        &self,
        user_id: &str,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>> {
        self.sqlite.list_entries_since(user_id, cutoff, limit)
    }

    pub fn count_entries(&self, user_id: &str) -> Result<u64> {
        self.sqlite.count_entries(user_id)
    }

    pub fn list_users(&self) -> Result<Vec<String>> {
        self.sqlite.list_users()
    }

    pub fn stats(&self, user_id: Option<&str>) -> Result<StoreStats> {
        self.sqlite.stats(user_id)
    }

    pub fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        self.sqlite.get_profile(user_id)
    }

    pub fn put_profile(&self, profile: &UserProfile) -> Result<()> {
        self.sqlite.put_profile(profile)
    }
}
