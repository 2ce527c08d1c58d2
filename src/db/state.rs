//! Queue order, lifetime statistics and whole-snapshot persistence.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::path::NormalizedPath;
use crate::settings::{PersistedState, SettingsStore};
use crate::types::ExtractionStats;
use crate::{Error, Result};

use super::Database;

impl Database {
    /// Queued package paths in queue order
    pub async fn load_queue(&self) -> Result<Vec<NormalizedPath>> {
        let paths: Vec<String> =
            sqlx::query_scalar("SELECT path FROM queue_entries ORDER BY position ASC")
                .fetch_all(&self.pool)
                .await
                .map_err(Error::Sqlx)?;

        Ok(paths
            .into_iter()
            .map(|p| NormalizedPath::from_canonical(PathBuf::from(p)))
            .collect())
    }

    /// Lifetime statistics, `None` if never saved
    pub async fn load_stats(&self) -> Result<Option<ExtractionStats>> {
        let data: Option<String> =
            sqlx::query_scalar("SELECT data FROM extraction_stats WHERE id = 1")
                .fetch_optional(&self.pool)
                .await
                .map_err(Error::Sqlx)?;

        data.map(|json| serde_json::from_str(&json).map_err(Error::from))
            .transpose()
    }

    /// Replace queue, history and statistics in one transaction
    pub async fn save_snapshot(&self, state: &PersistedState) -> Result<()> {
        let stats_json = serde_json::to_string(&state.stats)?;
        let mut tx = self.pool.begin().await.map_err(Error::Sqlx)?;

        sqlx::query("DELETE FROM queue_entries")
            .execute(&mut *tx)
            .await
            .map_err(Error::Sqlx)?;
        for (position, path) in state.queue.iter().enumerate() {
            sqlx::query("INSERT OR IGNORE INTO queue_entries (position, path) VALUES (?, ?)")
                .bind(position as i64)
                .bind(path.as_path().to_string_lossy().into_owned())
                .execute(&mut *tx)
                .await
                .map_err(Error::Sqlx)?;
        }

        Self::replace_history(&mut *tx, &state.history).await?;

        sqlx::query(
            r#"
            INSERT INTO extraction_stats (id, data) VALUES (1, ?)
            ON CONFLICT(id) DO UPDATE SET data = excluded.data
            "#,
        )
        .bind(stats_json)
        .execute(&mut *tx)
        .await
        .map_err(Error::Sqlx)?;

        tx.commit().await.map_err(Error::Sqlx)?;
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for Database {
    async fn load(&self) -> Result<Option<PersistedState>> {
        let Some(stats) = self.load_stats().await? else {
            // Stats are written on every save, so their absence means a fresh database
            return Ok(None);
        };

        Ok(Some(PersistedState {
            queue: self.load_queue().await?,
            history: self.load_history().await?,
            stats,
        }))
    }

    async fn save(&self, state: &PersistedState) -> Result<()> {
        self.save_snapshot(state).await
    }
}
