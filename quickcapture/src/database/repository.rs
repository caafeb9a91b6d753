//! Repository layer for database operations
//!
//! SQLite implementation of `EntryStore` plus the listing and
//! bookkeeping queries used by the entries service.

use super::models::*;
use super::store::EntryStore;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

const ENTRY_COLUMNS: &str = "id, entry_type, content, trigger_used, created_at, status, \
                             tags_json, source_app, source_url, ai_metadata_json";

/// Repository for database operations
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new entry
    pub async fn create_entry(&self, entry: &Entry) -> Result<()> {
        let tags_json = serde_json::to_string(&entry.tags)?;
        let metadata_json = entry
            .ai_metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO entries (id, entry_type, content, trigger_used, created_at, status,
                                 tags_json, source_app, source_url, ai_metadata_json, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(entry.entry_type.as_str())
        .bind(&entry.content)
        .bind(&entry.trigger_used)
        .bind(entry.created_at)
        .bind(entry.status.map(|s| s.as_str()))
        .bind(&tags_json)
        .bind(&entry.source_app)
        .bind(&entry.source_url)
        .bind(&metadata_json)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        tracing::debug!("Created entry: {} ({})", entry.id, entry.entry_type);
        Ok(())
    }

    /// Get an entry by ID
    pub async fn get_entry(&self, id: &str) -> Result<Entry> {
        self.find_entry(id)
            .await?
            .ok_or_else(|| AppError::EntryNotFound(id.to_string()))
    }

    async fn find_entry(&self, id: &str) -> Result<Option<Entry>> {
        let row = sqlx::query_as::<_, EntryRow>(&format!(
            "SELECT {} FROM entries WHERE id = ?",
            ENTRY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Entry::try_from).transpose()
    }

    /// List entries, newest first, optionally filtered by type
    pub async fn list_entries(&self, entry_type: Option<EntryType>) -> Result<Vec<Entry>> {
        let rows = match entry_type {
            Some(kind) => {
                sqlx::query_as::<_, EntryRow>(&format!(
                    "SELECT {} FROM entries WHERE entry_type = ? ORDER BY created_at DESC",
                    ENTRY_COLUMNS
                ))
                .bind(kind.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, EntryRow>(&format!(
                    "SELECT {} FROM entries ORDER BY created_at DESC",
                    ENTRY_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(Entry::try_from).collect()
    }

    /// Entries the pipeline has not finished, including runs interrupted
    /// after their actions were recorded
    pub async fn list_entries_without_ai_metadata(&self) -> Result<Vec<Entry>> {
        let rows = sqlx::query_as::<_, EntryRow>(&format!(
            "SELECT {} FROM entries
             WHERE ai_metadata_json IS NULL
                OR json_extract(ai_metadata_json, '$.processingMeta') IS NULL
             ORDER BY created_at ASC",
            ENTRY_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Entry::try_from).collect()
    }

    /// Replace every mutable column of an entry
    pub async fn update_entry(&self, entry: &Entry) -> Result<()> {
        let tags_json = serde_json::to_string(&entry.tags)?;
        let metadata_json = entry
            .ai_metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let rows_affected = sqlx::query(
            r#"
            UPDATE entries
            SET content = ?, status = ?, tags_json = ?, ai_metadata_json = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&entry.content)
        .bind(entry.status.map(|s| s.as_str()))
        .bind(&tags_json)
        .bind(&metadata_json)
        .bind(Utc::now())
        .bind(&entry.id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(AppError::EntryNotFound(entry.id.clone()));
        }

        tracing::debug!("Updated entry: {}", entry.id);
        Ok(())
    }

    /// Update only the status column, leaving the pipeline's metadata alone
    pub async fn set_entry_status(&self, id: &str, status: EntryStatus) -> Result<()> {
        let rows_affected = sqlx::query(
            "UPDATE entries SET status = ?, updated_at = ? WHERE id = ? AND entry_type = 'todo'",
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(AppError::EntryNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Count entries, for stats and diagnostics
    pub async fn count_entries(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl EntryStore for Repository {
    async fn create(&self, entry: &Entry) -> Result<()> {
        self.create_entry(entry).await
    }

    async fn get(&self, id: &str) -> Result<Option<Entry>> {
        self.find_entry(id).await
    }

    async fn update(&self, entry: &Entry) -> Result<()> {
        self.update_entry(entry).await
    }

    async fn list_without_ai_metadata(&self) -> Result<Vec<Entry>> {
        self.list_entries_without_ai_metadata().await
    }
}
