//! SQLite storage for memory entries and user profiles
//!
//! The single source of truth. The vector index is a derived cache and can
//! always be rebuilt from the rows stored here.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::config::Config;
use crate::entry::{MemoryEntry, UserProfile};
use crate::error::{Error, Result};

/// Ordering for per-user range scans
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOrder {
    CreatedAtDesc,
    ImportanceDesc,
}

/// Aggregate statistics over the stored entries
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreStats {
    pub total_entries: u64,
    pub avg_importance: f64,
    pub user_count: u64,
}

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Create a new SQLite storage at the configured path
    pub fn new(config: &Config) -> Result<Self> {
        let conn = Connection::open(config.sqlite_path())?;
        conn.execute_batch(include_str!("schema.sql"))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory storage, used by tests
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(include_str!("schema.sql"))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert a new entry
    pub fn insert_entry(&self, entry: &MemoryEntry) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;

        conn.execute(
            r#"
            INSERT INTO entries (
                id, user_id, text, vector, kind, importance, topics, emotions,
                created_at, last_accessed_at, access_count
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                entry.id.to_string(),
                entry.user_id,
                entry.text,
                vector_to_blob(&entry.vector),
                entry.kind.to_string(),
                entry.importance,
                serde_json::to_string(&entry.topics)?,
                serde_json::to_string(&entry.emotions)?,
                entry.created_at.to_rfc3339(),
                entry.last_accessed_at.to_rfc3339(),
                entry.access_count,
            ],
        )?;

        Ok(())
    }

    /// Get an entry by owner and ID
    pub fn get_entry(&self, user_id: &str, id: Uuid) -> Result<Option<MemoryEntry>> {
        let conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;

        let result = conn
            .query_row(
                &format!(
                    "SELECT {} FROM entries WHERE user_id = ?1 AND id = ?2",
                    ENTRY_COLUMNS
                ),
                params![user_id, id.to_string()],
                EntryRow::from_row,
            )
            .optional()?;

        result.map(|row| row.into_entry()).transpose()
    }

    /// List a user's entries in the given order, optionally limited
    pub fn list_entries(
        &self,
        user_id: &str,
        order: ScanOrder,
        limit: Option<usize>,
    ) -> Result<Vec<MemoryEntry>> {
        let conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;

        let order_clause = match order {
            ScanOrder::CreatedAtDesc => "created_at DESC",
            ScanOrder::ImportanceDesc => "importance DESC, created_at DESC",
        };

        let mut sql = format!(
            "SELECT {} FROM entries WHERE user_id = ?1 ORDER BY {}",
            ENTRY_COLUMNS, order_clause
        );
        if let Some(n) = limit {
            sql.push_str(&format!(" LIMIT {}", n));
        }

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user_id], EntryRow::from_row)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?.into_entry()?);
        }

        Ok(entries)
    }

    /// List a user's entries created at or after `cutoff`, most important
    /// first. The selection scan used by profile synthesis.
    pub fn list_entries_since(
        &self,
        user_id: &str,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>> {
        let conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;

        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {} FROM entries
            WHERE user_id = ?1 AND created_at >= ?2
            ORDER BY importance DESC, created_at DESC
            LIMIT ?3
            "#,
            ENTRY_COLUMNS
        ))?;

        let rows = stmt.query_map(
            params![user_id, cutoff.to_rfc3339(), limit as i64],
            EntryRow::from_row,
        )?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?.into_entry()?);
        }

        Ok(entries)
    }

    /// Update the access stats of an entry after a retrieval hit
    pub fn update_access(&self, entry: &MemoryEntry) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;

        conn.execute(
            r#"
            UPDATE entries
            SET importance = ?1, last_accessed_at = ?2, access_count = ?3
            WHERE user_id = ?4 AND id = ?5
            "#,
            params![
                entry.importance,
                entry.last_accessed_at.to_rfc3339(),
                entry.access_count,
                entry.user_id,
                entry.id.to_string(),
            ],
        )?;

        Ok(())
    }

    /// Delete a batch of entries for one user
    pub fn delete_entries(&self, user_id: &str, ids: &[Uuid]) -> Result<usize> {
        let mut conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;

        let tx = conn.transaction()?;
        let mut deleted = 0;
        for id in ids {
            deleted += tx.execute(
                "DELETE FROM entries WHERE user_id = ?1 AND id = ?2",
                params![user_id, id.to_string()],
            )?;
        }
        tx.commit()?;

        Ok(deleted)
    }

    /// Count entries for a user
    pub fn count_entries(&self, user_id: &str) -> Result<u64> {
        let conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entries WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;

        Ok(count as u64)
    }

    /// List all users that own at least one entry
    pub fn list_users(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;

        let mut stmt = conn.prepare("SELECT DISTINCT user_id FROM entries ORDER BY user_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    /// Aggregate statistics, optionally scoped to one user
    pub fn stats(&self, user_id: Option<&str>) -> Result<StoreStats> {
        let conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;

        let (sql, user) = match user_id {
            Some(uid) => (
                "SELECT COUNT(*), COALESCE(AVG(importance), 0.0), COUNT(DISTINCT user_id) \
                 FROM entries WHERE user_id = ?1",
                Some(uid),
            ),
            None => (
                "SELECT COUNT(*), COALESCE(AVG(importance), 0.0), COUNT(DISTINCT user_id) \
                 FROM entries",
                None,
            ),
        };

        let map = |row: &rusqlite::Row<'_>| -> rusqlite::Result<StoreStats> {
            Ok(StoreStats {
                total_entries: row.get::<_, i64>(0)? as u64,
                avg_importance: row.get(1)?,
                user_count: row.get::<_, i64>(2)? as u64,
            })
        };

        let stats = match user {
            Some(uid) => conn.query_row(sql, params![uid], map)?,
            None => conn.query_row(sql, [], map)?,
        };

        Ok(stats)
    }

    /// Get a user's profile
    pub fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;

        let result = conn
            .query_row(
                "SELECT user_id, summary_text, traits, version, updated_at \
                 FROM profiles WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(ProfileRow {
                        user_id: row.get(0)?,
                        summary_text: row.get(1)?,
                        traits: row.get(2)?,
                        version: row.get(3)?,
                        updated_at: row.get(4)?,
                    })
                },
            )
            .optional()?;

        result.map(|row| row.into_profile()).transpose()
    }

    /// Replace a user's profile wholesale
    pub fn put_profile(&self, profile: &UserProfile) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;

        conn.execute(
            r#"
            INSERT INTO profiles (user_id, summary_text, traits, version, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(user_id) DO UPDATE SET
                summary_text = excluded.summary_text,
                traits = excluded.traits,
                version = excluded.version,
                updated_at = excluded.updated_at
            "#,
            params![
                profile.user_id,
                profile.summary_text,
                serde_json::to_string(&profile.traits)?,
                profile.version,
                profile.updated_at.to_rfc3339(),
            ],
        )?;

        Ok(())
    }
}

const ENTRY_COLUMNS: &str = "id, user_id, text, vector, kind, importance, topics, emotions, \
                             created_at, last_accessed_at, access_count";

/// Intermediate struct for reading entry rows
struct EntryRow {
    id: String,
    user_id: String,
    text: String,
    vector: Vec<u8>,
    kind: String,
    importance: f64,
    topics: String,
    emotions: String,
    created_at: String,
    last_accessed_at: String,
    access_count: u32,
}

impl EntryRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            text: row.get(2)?,
            vector: row.get(3)?,
            kind: row.get(4)?,
            importance: row.get(5)?,
            topics: row.get(6)?,
            emotions: row.get(7)?,
            created_at: row.get(8)?,
            last_accessed_at: row.get(9)?,
            access_count: row.get(10)?,
        })
    }

    fn into_entry(self) -> Result<MemoryEntry> {
        Ok(MemoryEntry {
            id: Uuid::parse_str(&self.id).map_err(|e| Error::storage(e.to_string()))?,
            user_id: self.user_id,
            text: self.text,
            vector: blob_to_vector(&self.vector)?,
            kind: self
                .kind
                .parse()
                .map_err(|e: String| Error::storage(e))?,
            importance: self.importance,
            topics: serde_json::from_str(&self.topics)?,
            emotions: serde_json::from_str(&self.emotions)?,
            created_at: parse_timestamp(&self.created_at)?,
            last_accessed_at: parse_timestamp(&self.last_accessed_at)?,
            access_count: self.access_count,
        })
    }
}

struct ProfileRow {
    user_id: String,
    summary_text: String,
    traits: String,
    version: u32,
    updated_at: String,
}

impl ProfileRow {
    fn into_profile(self) -> Result<UserProfile> {
        let traits: BTreeMap<String, f64> = serde_json::from_str(&self.traits)?;
        Ok(UserProfile {
            user_id: self.user_id,
            summary_text: self.summary_text,
            traits,
            version: self.version,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::storage(e.to_string()))
}

fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

fn blob_to_vector(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(Error::storage("vector blob length is not a multiple of 4"));
    }

    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
