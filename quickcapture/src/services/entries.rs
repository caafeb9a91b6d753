//! Entries service
//!
//! Turns finalized captures into stored entries and serves the
//! entry-level operations that are not part of the pipeline.

use crate::capture::CaptureResult;
use crate::database::{Entry, EntryStatus, EntryType, Repository};
use crate::error::{AppError, Result};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

static HASHTAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)#([A-Za-z][\w-]*)").expect("hashtag pattern"));

/// Service for managing entries
#[derive(Clone)]
pub struct EntriesService {
    repo: Repository,
}

impl EntriesService {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Store a finalized capture as a new entry
    pub async fn create_from_capture(&self, capture: &CaptureResult) -> Result<Entry> {
        let mut entry = Entry::new(
            capture.entry_type,
            capture.content.clone(),
            capture.trigger.clone(),
            capture.ended_at,
        );
        entry.tags = extract_tags(&capture.content);
        entry.source_app = capture.context.app_name.clone();
        entry.source_url = capture.context.url.clone();

        self.repo.create_entry(&entry).await?;

        tracing::info!(
            entry_id = %entry.id,
            entry_type = %entry.entry_type,
            source_app = %entry.source_app,
            "Entry created from capture"
        );
        Ok(entry)
    }

    pub async fn get_entry(&self, id: &str) -> Result<Entry> {
        self.repo.get_entry(id).await
    }

    pub async fn list_entries(&self, entry_type: Option<EntryType>) -> Result<Vec<Entry>> {
        self.repo.list_entries(entry_type).await
    }

    /// Mark a todo open or done
    pub async fn set_status(&self, id: &str, status: EntryStatus) -> Result<Entry> {
        let entry = self.repo.get_entry(id).await?;
        if entry.entry_type != EntryType::Todo {
            return Err(AppError::Generic(format!(
                "Only todo entries have a status: {}",
                id
            )));
        }

        self.repo.set_entry_status(id, status).await?;
        tracing::debug!("Entry {} marked {}", id, status);
        self.repo.get_entry(id).await
    }

    /// Search entries by content or tag
    pub async fn search_entries(&self, query: &str) -> Result<Vec<Entry>> {
        let all_entries = self.list_entries(None).await?;

        let query_lower = query.trim().trim_start_matches('#').to_lowercase();

        let filtered: Vec<Entry> = all_entries
            .into_iter()
            .filter(|entry| {
                entry.content.to_lowercase().contains(&query_lower)
                    || entry.tags.contains(&query_lower)
            })
            .collect();

        Ok(filtered)
    }
}

/// Lowercased `#hashtags` found in captured text
pub fn extract_tags(content: &str) -> BTreeSet<String> {
    HASHTAG_RE
        .captures_iter(content)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_lowercase())
        .collect()
}
