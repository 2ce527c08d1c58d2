//! History ledger rows.

use sqlx::SqliteConnection;

use crate::types::HistoryEntry;
use crate::{Error, Result};

use super::{Database, HistoryRow};

impl Database {
    /// Load every history entry, oldest first
    pub async fn load_history(&self) -> Result<Vec<HistoryEntry>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT path, file_name, added_at, last_seen_at, extracted_at,
                   assets_extracted, extracted_file_count, extracted_bytes,
                   extraction_duration_ms, output_directory, file_size_bytes
            FROM history
            ORDER BY added_at ASC, seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(rows.into_iter().map(HistoryEntry::from).collect())
    }

    /// Count history entries
    pub async fn count_history(&self) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM history")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Sqlx)
    }

    /// Replace the history table contents inside an open transaction
    ///
    /// `entries` must be oldest first; their position becomes the tie-break
    /// sequence for entries sharing an `added_at` timestamp.
    pub(super) async fn replace_history(
        conn: &mut SqliteConnection,
        entries: &[HistoryEntry],
    ) -> Result<()> {
        sqlx::query("DELETE FROM history")
            .execute(&mut *conn)
            .await
            .map_err(Error::Sqlx)?;

        for (seq, entry) in entries.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO history (
                    path, file_name, added_at, last_seen_at, extracted_at,
                    assets_extracted, extracted_file_count, extracted_bytes,
                    extraction_duration_ms, output_directory, file_size_bytes, seq
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(entry.path.as_path().to_string_lossy().into_owned())
            .bind(&entry.file_name)
            .bind(entry.added_utc.timestamp_millis())
            .bind(entry.last_seen_utc.timestamp_millis())
            .bind(entry.extracted_utc.map(|t| t.timestamp_millis()))
            .bind(entry.assets_extracted as i64)
            .bind(entry.extracted_file_count as i64)
            .bind(entry.extracted_bytes as i64)
            .bind(entry.extraction_duration_ms as i64)
            .bind(
                entry
                    .output_directory
                    .as_ref()
                    .and_then(|p| p.to_str().map(String::from)),
            )
            .bind(entry.file_size_bytes as i64)
            .bind(seq as i64)
            .execute(&mut *conn)
            .await
            .map_err(Error::Sqlx)?;
        }

        Ok(())
    }
}
