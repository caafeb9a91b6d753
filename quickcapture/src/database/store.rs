//! Entry store contract
//!
//! The orchestration core only needs create / read / update by id plus a
//! scan for entries that have never been processed.

use super::models::Entry;
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait EntryStore: Send + Sync {
    async fn create(&self, entry: &Entry) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Entry>>;

    /// Replace the stored entry with `entry` in a single write.
    async fn update(&self, entry: &Entry) -> Result<()>;

    /// Entries whose processing never completed, oldest first: no
    /// `ai_metadata` at all, or metadata without `processingMeta`.
    async fn list_without_ai_metadata(&self) -> Result<Vec<Entry>>;
}
