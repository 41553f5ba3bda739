//! Retention sweeping: capacity and age limits per user

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use uuid::Uuid;

use crate::config::Config;
use crate::entry::{MemoryEntry, MemoryKind};
use crate::error::Result;
use crate::storage::{ScanOrder, ScoreParams};
use crate::store::MemoryStore;

/// Outcome of one user's sweep
#[derive(Debug, Clone, serde::Serialize)]
pub struct SweepReport {
    pub user_id: String,
    pub age_evicted: usize,
    pub cap_evicted: usize,
    pub remaining: u64,
}

/// Enforces per-user retention limits on a timer
pub struct RetentionSweeper {
    config: Config,
}

impl RetentionSweeper {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Eviction scoring ignores similarity (there is no query) and leans on
    /// importance, so rarely-accessed but important memories survive.
    fn sweep_params(&self) -> ScoreParams {
        ScoreParams {
            weight_similarity: 0.0,
            weight_recency: 0.3,
            weight_importance: 0.7,
            recency_half_life_secs: self.config.recency_half_life_secs,
        }
    }

    /// Sweep one user: age-based eviction first, then the count cap.
    /// Idempotent: a second run with no intervening writes evicts nothing.
    pub fn sweep_user(&self, store: &MemoryStore, user_id: &str) -> Result<SweepReport> {
        let entries = store.list_entries(user_id, ScanOrder::CreatedAtDesc, None)?;
        let now = Utc::now();
        let age_cutoff = now - ChronoDuration::days(self.config.max_age_days);

        // Insights are compacted knowledge and exempt from aging, as are
        // entries above the importance floor.
        let (expired, mut kept): (Vec<MemoryEntry>, Vec<MemoryEntry>) =
            entries.into_iter().partition(|entry| {
                entry.created_at < age_cutoff
                    && entry.kind != MemoryKind::Insight
                    && entry.importance < self.config.retention_importance_floor
            });

        let age_evicted: Vec<Uuid> = expired.iter().map(|entry| entry.id).collect();

        let cap = self.config.max_entries_per_user;
        let mut cap_evicted: Vec<Uuid> = Vec::new();
        if kept.len() > cap {
            let params = self.sweep_params();
            kept.sort_by(|a, b| {
                let score = |entry: &MemoryEntry| {
                    let elapsed = (now - entry.last_accessed_at).num_seconds().max(0) as f64;
                    params.blended(0.0, elapsed, entry.importance)
                };
                score(b)
                    .total_cmp(&score(a))
                    .then_with(|| b.created_at.cmp(&a.created_at))
            });
            cap_evicted = kept.drain(cap..).map(|entry| entry.id).collect();
        }

        if !age_evicted.is_empty() {
            store.delete_entries(user_id, &age_evicted)?;
        }
        if !cap_evicted.is_empty() {
            store.delete_entries(user_id, &cap_evicted)?;
        }

        let report = SweepReport {
            user_id: user_id.to_string(),
            age_evicted: age_evicted.len(),
            cap_evicted: cap_evicted.len(),
            remaining: store.count_entries(user_id)?,
        };

        if report.age_evicted > 0 || report.cap_evicted > 0 {
            tracing::info!(
                user_id,
                age_evicted = report.age_evicted,
                cap_evicted = report.cap_evicted,
                remaining = report.remaining,
                "retention sweep evicted entries"
            );
        }

        Ok(report)
    }

    /// Sweep every known user. A failing user is logged and skipped; one
    /// bad shard never aborts the rest of the sweep.
    pub fn sweep_all(&self, store: &MemoryStore) -> Result<Vec<SweepReport>> {
        let mut reports = Vec::new();
        for user_id in store.list_users()? {
            match self.sweep_user(store, &user_id) {
                Ok(report) => reports.push(report),
                Err(err) => {
                    tracing::warn!(user_id, error = %err, "sweep failed for user");
                }
            }
        }
        Ok(reports)
    }

    /// Background loop on the configured interval
    pub async fn run(self: Arc<Self>, store: Arc<MemoryStore>) {
        let period = Duration::from_secs(self.config.sweep_interval_secs.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if let Err(err) = self.sweep_all(&store) {
                tracing::warn!(error = %err, "retention sweep pass failed");
            }
        }
    }
}
