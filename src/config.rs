//! Configuration for reverie-memory

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Configuration for the memory engine
#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory for all storage
    pub data_dir: PathBuf,

    /// Embedding dimensions expected from the provider
    pub embedding_dimensions: usize,

    /// Weight for cosine similarity in the blended relevance score
    pub weight_similarity: f64,

    /// Weight for recency decay in the blended relevance score
    pub weight_recency: f64,

    /// Weight for importance in the blended relevance score
    pub weight_importance: f64,

    /// Half-life of the recency decay, in seconds
    pub recency_half_life_secs: f64,

    /// Minimum blended score for retrieval results (0.0 - 1.0)
    pub min_score: f64,

    /// Default number of results to return from retrieval
    pub default_k: usize,

    /// Importance boost applied to an entry on each retrieval hit
    pub access_boost: f64,

    /// Maximum number of entries kept per user
    pub max_entries_per_user: usize,

    /// Maximum age of an entry before age-based eviction, in days
    pub max_age_days: i64,

    /// Entries at or above this importance survive age-based eviction
    pub retention_importance_floor: f64,

    /// Interval between background sweeps, in seconds
    pub sweep_interval_secs: u64,

    /// Number of entries selected for a synthesis run
    pub synthesis_top_n: usize,

    /// Age window for synthesis selection, in days
    pub synthesis_window_days: i64,

    /// Trigger a synthesis every N commits per user (0 disables)
    pub synthesis_every_commits: u64,

    /// Interval between background synthesis passes, in seconds
    pub synthesis_interval_secs: u64,

    /// Timeout for a single provider call, in seconds
    pub provider_timeout_secs: u64,

    /// Number of attempts for a provider call before giving up
    pub provider_retry_attempts: u32,

    /// Base delay for provider retry backoff, in milliseconds
    pub provider_retry_base_ms: u64,

    /// Maximum delay for provider retry backoff, in milliseconds
    pub provider_retry_max_ms: u64,

    /// HTTP server port
    pub server_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("reverie-memory");

        Self {
            data_dir,
            embedding_dimensions: 384,
            weight_similarity: 0.6,
            weight_recency: 0.1,
            weight_importance: 0.3,
            recency_half_life_secs: 7.0 * 24.0 * 3600.0,
            min_score: 0.3,
            default_k: 5,
            access_boost: 0.05,
            max_entries_per_user: 1000,
            max_age_days: 90,
            retention_importance_floor: 0.7,
            sweep_interval_secs: 3600,
            synthesis_top_n: 50,
            synthesis_window_days: 30,
            synthesis_every_commits: 50,
            synthesis_interval_secs: 6 * 3600,
            provider_timeout_secs: 30,
            provider_retry_attempts: 3,
            provider_retry_base_ms: 200,
            provider_retry_max_ms: 5000,
            server_port: 8430,
        }
    }
}

impl Config {
    /// Create a new config with a custom data directory
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Load configuration from the environment, falling back to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("REVERIE_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(dim) = parse_env("REVERIE_EMBEDDING_DIM")? {
            config.embedding_dimensions = dim;
        }
        if let Some(w) = parse_env("REVERIE_WEIGHT_SIMILARITY")? {
            config.weight_similarity = w;
        }
        if let Some(w) = parse_env("REVERIE_WEIGHT_RECENCY")? {
            config.weight_recency = w;
        }
        if let Some(w) = parse_env("REVERIE_WEIGHT_IMPORTANCE")? {
            config.weight_importance = w;
        }
        if let Some(n) = parse_env("REVERIE_MAX_ENTRIES")? {
            config.max_entries_per_user = n;
        }
        if let Some(days) = parse_env("REVERIE_MAX_AGE_DAYS")? {
            config.max_age_days = days;
        }
        if let Some(secs) = parse_env("REVERIE_SWEEP_INTERVAL_SECS")? {
            config.sweep_interval_secs = secs;
        }
        if let Some(n) = parse_env("REVERIE_SYNTHESIS_TOP_N")? {
            config.synthesis_top_n = n;
        }
        if let Some(days) = parse_env("REVERIE_SYNTHESIS_WINDOW_DAYS")? {
            config.synthesis_window_days = days;
        }
        if let Some(secs) = parse_env("REVERIE_PROVIDER_TIMEOUT_SECS")? {
            config.provider_timeout_secs = secs;
        }
        if let Some(attempts) = parse_env("REVERIE_PROVIDER_RETRY_ATTEMPTS")? {
            config.provider_retry_attempts = attempts;
        }
        if let Some(port) = parse_env("REVERIE_PORT")? {
            config.server_port = port;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration is internally consistent
    pub fn validate(&self) -> Result<()> {
        if self.embedding_dimensions == 0 {
            return Err(Error::config("embedding_dimensions must be positive"));
        }
        if self.weight_similarity < 0.0 || self.weight_recency < 0.0 || self.weight_importance < 0.0
        {
            return Err(Error::config("similarity weights must be non-negative"));
        }
        if self.max_entries_per_user == 0 {
            return Err(Error::config("max_entries_per_user must be positive"));
        }
        if self.provider_retry_attempts == 0 {
            return Err(Error::config("provider_retry_attempts must be positive"));
        }
        Ok(())
    }

    /// Get the path to the SQLite database
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("memory.db")
    }

    /// Timeout budget for a single provider call
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    /// Ensure all required directories exist
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| Error::config(format!("could not parse {}: {}", key, value))),
        Err(_) => Ok(None),
    }
}
