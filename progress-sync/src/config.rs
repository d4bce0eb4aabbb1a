//! Runtime configuration for the sync engine

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sync engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Base URL of the hosted backend (e.g. `https://project.example.co`)
    pub remote_url: String,
    /// Public API key sent as the `apikey` header
    pub api_key: String,
    /// Remote table holding one progress row per user
    pub table: String,
    /// Upper bound for every remote call
    #[serde(with = "duration_secs")]
    pub remote_timeout: Duration,
    /// Period of the background reconciliation task
    #[serde(with = "duration_secs")]
    pub sync_interval: Duration,
    /// Path to the local cache database file
    pub local_db_path: String,
    /// Maximum number of connections in the local pool
    pub max_connections: u32,
    /// Whether to enable WAL mode on the local cache
    pub enable_wal: bool,
}

// Serialize Duration as seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_url: "http://localhost:54321".to_string(),
            api_key: String::new(),
            table: "user_progress".to_string(),
            remote_timeout: Duration::from_secs(10),
            sync_interval: Duration::from_secs(5 * 60),
            local_db_path: "progress_cache.db".to_string(),
            max_connections: 5,
            enable_wal: true,
        }
    }
}

impl SyncConfig {
    /// Load from `PROGRESS_SYNC_*` environment variables, reading `.env` first.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Configuration`] when a variable is present but
    /// malformed, or the resulting config fails [`SyncConfig::validate`].
    pub fn from_env() -> SyncResult<Self> {
        // A missing .env file is normal outside development
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> SyncResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let secs = |key: &str, fallback: Duration| -> SyncResult<Duration> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|e| {
                        SyncError::Configuration(format!("{} must be whole seconds: {}", key, e))
                    }),
                None => Ok(fallback),
            }
        };

        let max_connections = match lookup("PROGRESS_SYNC_MAX_CONNECTIONS") {
            Some(raw) => raw.trim().parse::<u32>().map_err(|e| {
                SyncError::Configuration(format!("PROGRESS_SYNC_MAX_CONNECTIONS: {}", e))
            })?,
            None => defaults.max_connections,
        };

        let enable_wal = match lookup("PROGRESS_SYNC_ENABLE_WAL") {
            Some(raw) => matches!(
                raw.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            ),
            None => defaults.enable_wal,
        };

        let config = Self {
            remote_url: lookup("PROGRESS_SYNC_REMOTE_URL").unwrap_or(defaults.remote_url),
            api_key: lookup("PROGRESS_SYNC_API_KEY").unwrap_or(defaults.api_key),
            table: lookup("PROGRESS_SYNC_TABLE").unwrap_or(defaults.table),
            remote_timeout: secs("PROGRESS_SYNC_REMOTE_TIMEOUT_SECS", defaults.remote_timeout)?,
            sync_interval: secs("PROGRESS_SYNC_INTERVAL_SECS", defaults.sync_interval)?,
            local_db_path: lookup("PROGRESS_SYNC_LOCAL_DB").unwrap_or(defaults.local_db_path),
            max_connections,
            enable_wal,
        };

        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns [`SyncError::Configuration`] describing the first invalid field.
    pub fn validate(&self) -> SyncResult<()> {
        if self.remote_url.trim().is_empty() {
            return Err(SyncError::Configuration("remote_url must not be empty".to_string()));
        }
        if self.table.trim().is_empty() {
            return Err(SyncError::Configuration("table must not be empty".to_string()));
        }
        if self.remote_timeout.is_zero() {
            return Err(SyncError::Configuration("remote_timeout must be positive".to_string()));
        }
        if self.sync_interval.is_zero() {
            return Err(SyncError::Configuration("sync_interval must be positive".to_string()));
        }
        if self.max_connections == 0 {
            return Err(SyncError::Configuration("max_connections must be positive".to_string()));
        }
        Ok(())
    }
}
