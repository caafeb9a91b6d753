//! Tool service contract
//!
//! The collaborator that performs real system side effects (reminders,
//! calendar events, contacts, maps). Create calls return the id of the
//! external resource so the action can be reversed later.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("{0}")]
    Failed(String),
}

pub type ToolResult<T> = std::result::Result<T, ToolError>;

#[async_trait]
pub trait ToolService: Send + Sync {
    async fn create_reminder(
        &self,
        title: &str,
        notes: Option<&str>,
        due_date: Option<DateTime<Utc>>,
    ) -> ToolResult<String>;

    async fn create_calendar_event(
        &self,
        title: &str,
        notes: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ToolResult<String>;

    async fn create_contact(
        &self,
        first_name: &str,
        last_name: Option<&str>,
        phone: Option<&str>,
        email: Option<&str>,
    ) -> ToolResult<String>;

    async fn open_in_maps(&self, query: &str) -> ToolResult<()>;

    async fn delete_reminder(&self, id: &str) -> ToolResult<()>;

    async fn delete_calendar_event(&self, id: &str) -> ToolResult<()>;

    async fn delete_contact(&self, id: &str) -> ToolResult<()>;
}

/// Logs each side effect instead of performing it.
///
/// Used when no tool bridge is configured. Ids are generated locally so the
/// ledger and reversal paths behave exactly as with a real bridge.
#[derive(Default)]
pub struct DryRunToolService {
    created: Mutex<Vec<String>>,
}

impl DryRunToolService {
    pub fn new() -> Self {
        Self::default()
    }

    fn issue(&self, kind: &str) -> String {
        let id = format!("{}-{}", kind, Uuid::new_v4());
        if let Ok(mut created) = self.created.lock() {
            created.push(id.clone());
        }
        id
    }

    fn remove(&self, id: &str) -> ToolResult<()> {
        let mut created = self
            .created
            .lock()
            .map_err(|_| ToolError::Failed("dry-run registry poisoned".to_string()))?;
        let before = created.len();
        created.retain(|c| c != id);
        if created.len() == before {
            return Err(ToolError::Failed(format!("no such resource: {}", id)));
        }
        Ok(())
    }
}

#[async_trait]
impl ToolService for DryRunToolService {
    async fn create_reminder(
        &self,
        title: &str,
        _notes: Option<&str>,
        due_date: Option<DateTime<Utc>>,
    ) -> ToolResult<String> {
        tracing::info!(title, ?due_date, "[dry-run] create reminder");
        Ok(self.issue("reminder"))
    }

    async fn create_calendar_event(
        &self,
        title: &str,
        _notes: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ToolResult<String> {
        tracing::info!(title, %start, %end, "[dry-run] create calendar event");
        Ok(self.issue("event"))
    }

    async fn create_contact(
        &self,
        first_name: &str,
        last_name: Option<&str>,
        phone: Option<&str>,
        email: Option<&str>,
    ) -> ToolResult<String> {
        tracing::info!(first_name, ?last_name, ?phone, ?email, "[dry-run] create contact");
        Ok(self.issue("contact"))
    }

    async fn open_in_maps(&self, query: &str) -> ToolResult<()> {
        tracing::info!(query, "[dry-run] open in maps");
        Ok(())
    }

    async fn delete_reminder(&self, id: &str) -> ToolResult<()> {
        tracing::info!(id, "[dry-run] delete reminder");
        self.remove(id)
    }

    async fn delete_calendar_event(&self, id: &str) -> ToolResult<()> {
        tracing::info!(id, "[dry-run] delete calendar event");
        self.remove(id)
    }

    async fn delete_contact(&self, id: &str) -> ToolResult<()> {
        tracing::info!(id, "[dry-run] delete contact");
        self.remove(id)
    }
}
