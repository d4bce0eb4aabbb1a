//! SQLite-backed local cache
//!
//! Provides:
//! - One JSON progress entry per user
//! - Sync metadata (last fetch / reconciliation per user)

use super::{LocalCache, SyncMarker};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::model::ProgressRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

/// Configuration for the local cache database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalCacheConfig {
    /// Path to the database file
    pub db_path: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Whether to enable WAL mode
    pub enable_wal: bool,
}

impl Default for LocalCacheConfig {
    fn default() -> Self {
        Self {
            db_path: "progress_cache.db".to_string(),
            max_connections: 5,
            enable_wal: true,
        }
    }
}

impl From<&SyncConfig> for LocalCacheConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            db_path: config.local_db_path.clone(),
            max_connections: config.max_connections,
            enable_wal: config.enable_wal,
        }
    }
}

/// Local cache handle
pub struct SqliteLocalCache {
    pool: SqlitePool,
}

impl SqliteLocalCache {
    /// Open (creating if missing) the cache database.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened or the schema cannot be created.
    pub async fn new(config: LocalCacheConfig) -> SyncResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(&config.db_path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        if config.enable_wal {
            sqlx::query("PRAGMA journal_mode = WAL")
                .execute(&pool)
                .await?;
        }

        let cache = Self { pool };
        cache.initialize_schema().await?;

        tracing::debug!(db_path = %config.db_path, "Opened local progress cache");
        Ok(cache)
    }

    async fn initialize_schema(&self) -> SyncResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS progress_cache (
                user_id TEXT PRIMARY KEY,
                record TEXT NOT NULL,
                cached_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get database pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

fn parse_timestamp(raw: &str) -> SyncResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| SyncError::Internal(format!("Invalid timestamp: {}", e)))
}

#[async_trait]
impl LocalCache for SqliteLocalCache {
    async fn get(&self, user_id: &str) -> SyncResult<Option<ProgressRecord>> {
        let row = sqlx::query("SELECT record FROM progress_cache WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let raw: String = row.try_get("record")?;
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, user_id: &str, record: &ProgressRecord) -> SyncResult<()> {
        let raw = serde_json::to_string(record)?;
        sqlx::query(
            r#"
            INSERT INTO progress_cache (user_id, record, cached_at)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                record = excluded.record,
                cached_at = excluded.cached_at
            "#,
        )
        .bind(user_id)
        .bind(raw)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::trace!(user_id = user_id, "Cached progress record");
        Ok(())
    }

    async fn remove(&self, user_id: &str) -> SyncResult<()> {
        sqlx::query("DELETE FROM progress_cache WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_synced(
        &self,
        user_id: &str,
        marker: SyncMarker,
        at: DateTime<Utc>,
    ) -> SyncResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_metadata (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(marker.key(user_id))
        .bind(at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn last_synced(
        &self,
        user_id: &str,
        marker: SyncMarker,
    ) -> SyncResult<Option<DateTime<Utc>>> {
        let row = sqlx::query("SELECT value FROM sync_metadata WHERE key = ?")
            .bind(marker.key(user_id))
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let raw: String = row.try_get("value")?;
                parse_timestamp(&raw).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn clear_user(&self, user_id: &str) -> SyncResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM progress_cache WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        for marker in [SyncMarker::Fetch, SyncMarker::Reconcile] {
            sqlx::query("DELETE FROM sync_metadata WHERE key = ?")
                .bind(marker.key(user_id))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
