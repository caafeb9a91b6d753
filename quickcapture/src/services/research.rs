//! Research generator contract

use crate::database::EntryType;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Raw response from the research collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchOutput {
    /// Markdown summary
    pub content: String,
    pub cost: f64,
    pub processing_time_ms: u64,
}

#[async_trait]
pub trait ResearchGenerator: Send + Sync {
    async fn generate(&self, text: &str, entry_type: EntryType) -> Result<ResearchOutput>;
}
