//! Memory entry and user profile types

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of a memory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// A raw conversation message
    RawMessage,

    /// A summary of a conversation
    Summary,

    /// A synthesized insight distilled from many memories
    Insight,
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryKind::RawMessage => write!(f, "raw_message"),
            MemoryKind::Summary => write!(f, "summary"),
            MemoryKind::Insight => write!(f, "insight"),
        }
    }
}

impl std::str::FromStr for MemoryKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "raw_message" => Ok(MemoryKind::RawMessage),
            "summary" => Ok(MemoryKind::Summary),
            "insight" => Ok(MemoryKind::Insight),
            other => Err(format!("Unknown memory kind: {}", other)),
        }
    }
}

/// A single long-term memory owned by one user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Unique entry ID
    pub id: Uuid,

    /// Owning user; all queries are scoped to exactly one user
    pub user_id: String,

    /// The source text fragment
    pub text: String,

    /// Embedding of `text`, produced once at creation. Always matches the
    /// configured dimensions; an entry that failed embedding is never stored.
    #[serde(skip)]
    pub vector: Vec<f32>,

    /// Kind of memory
    pub kind: MemoryKind,

    /// Importance score in [0, 1]
    pub importance: f64,

    /// Topics detected in the text at ingestion
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<String>,

    /// Emotions detected in the text at ingestion
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub emotions: Vec<String>,

    /// When the entry was created
    pub created_at: DateTime<Utc>,

    /// When the entry was last returned by retrieval
    pub last_accessed_at: DateTime<Utc>,

    /// How many times this entry has been retrieved
    #[serde(default)]
    pub access_count: u32,
}

impl MemoryEntry {
    /// Create a new entry with its embedding
    pub fn new(
        user_id: impl Into<String>,
        text: impl Into<String>,
        kind: MemoryKind,
        vector: Vec<f32>,
        importance: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            text: text.into(),
            vector,
            kind,
            importance: importance.clamp(0.0, 1.0),
            topics: Vec::new(),
            emotions: Vec::new(),
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
        }
    }

    /// Attach detected topics
    pub fn with_topics(mut self, topics: Vec<String>) -> Self {
        self.topics = topics;
        self
    }

    /// Attach detected emotions
    pub fn with_emotions(mut self, emotions: Vec<String>) -> Self {
        self.emotions = emotions;
        self
    }

    /// Record a retrieval hit: bump the access counter and timestamp and
    /// apply a saturating importance boost.
    pub fn mark_accessed(&mut self, boost: f64) {
        self.last_accessed_at = Utc::now();
        self.access_count += 1;
        self.importance = (self.importance + boost).min(1.0);
    }
}

/// A synthesized behavioral/preference profile, one per user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    /// Owning user
    pub user_id: String,

    /// Latest synthesized natural-language description
    pub summary_text: String,

    /// Trait name -> confidence/weight
    #[serde(default)]
    pub traits: BTreeMap<String, f64>,

    /// Strictly increasing across synthesis runs
    pub version: u32,

    /// When the profile was last replaced
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    /// Build the successor of `previous` from a fresh synthesis result.
    pub fn next(
        user_id: impl Into<String>,
        summary_text: impl Into<String>,
        traits: BTreeMap<String, f64>,
        previous: Option<&UserProfile>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            summary_text: summary_text.into(),
            traits,
            version: previous.map(|p| p.version + 1).unwrap_or(1),
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_entry_clamps_importance() {
        let entry = MemoryEntry::new("u1", "hello", MemoryKind::RawMessage, vec![0.0; 4], 1.7);
        assert_eq!(entry.importance, 1.0);
        assert_eq!(entry.access_count, 0);
        assert_eq!(entry.created_at, entry.last_accessed_at);
    }

    #[test]
    fn mark_accessed_saturates_at_one() {
        let mut entry = MemoryEntry::new("u1", "hello", MemoryKind::RawMessage, vec![0.0; 4], 0.95);
        for _ in 0..10 {
            entry.mark_accessed(0.05);
        }
        assert_eq!(entry.importance, 1.0);
        assert_eq!(entry.access_count, 10);
        assert!(entry.last_accessed_at >= entry.created_at);
    }

    #[test]
    fn kind_round_trips_through_display() {
        for kind in [MemoryKind::RawMessage, MemoryKind::Summary, MemoryKind::Insight] {
            let parsed: MemoryKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert!("nonsense".parse::<MemoryKind>().is_err());
    }

    #[test]
    fn profile_versioning_starts_at_one_and_increments() {
        let first = UserProfile::next("u1", "summary", BTreeMap::new(), None);
        assert_eq!(first.version, 1);

        let second = UserProfile::next("u1", "updated", BTreeMap::new(), Some(&first));
        assert_eq!(second.version, 2);
    }
}
