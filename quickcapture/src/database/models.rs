//! Database models
//!
//! Rust structs representing captured entries and the action ledger
//! attached to them. All models use serde; the ledger is persisted as
//! a JSON column on the entry row.

use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Kind of captured entry, selected by the trigger that started the capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Todo,
    Piece,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Todo => "todo",
            EntryType::Piece => "piece",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(EntryType::Todo),
            "piece" => Ok(EntryType::Piece),
            other => Err(AppError::Generic(format!("Unknown entry type: {}", other))),
        }
    }
}

/// Completion state of a todo entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Open,
    Done,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Open => "open",
            EntryStatus::Done => "done",
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(EntryStatus::Open),
            "done" => Ok(EntryStatus::Done),
            other => Err(AppError::Generic(format!("Unknown entry status: {}", other))),
        }
    }
}

/// A captured unit of text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    /// Captured text with the trigger and terminator stripped
    pub content: String,
    pub trigger_used: String,
    pub created_at: DateTime<Utc>,
    /// Only todo entries carry a status
    pub status: Option<EntryStatus>,
    pub tags: BTreeSet<String>,
    pub source_app: String,
    pub source_url: Option<String>,
    pub ai_metadata: Option<AIMetadata>,
}

impl Entry {
    pub fn new(
        entry_type: EntryType,
        content: String,
        trigger_used: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        let status = match entry_type {
            EntryType::Todo => Some(EntryStatus::Open),
            EntryType::Piece => None,
        };

        Self {
            id: Uuid::new_v4().to_string(),
            entry_type,
            content,
            trigger_used,
            created_at,
            status,
            tags: BTreeSet::new(),
            source_app: String::new(),
            source_url: None,
            ai_metadata: None,
        }
    }
}

/// Side effect kinds an entry can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Reminder,
    Calendar,
    Contact,
    Maps,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Reminder => "reminder",
            ActionType::Calendar => "calendar",
            ActionType::Contact => "contact",
            ActionType::Maps => "maps",
        }
    }

    /// Maps only opens a query and leaves nothing behind to undo.
    pub fn is_reversible(&self) -> bool {
        !matches!(self, ActionType::Maps)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a single action in the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Executing,
    Executed,
    Failed,
    Reversed,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Executing => "executing",
            ActionStatus::Executed => "executed",
            ActionStatus::Failed => "failed",
            ActionStatus::Reversed => "reversed",
        }
    }

    /// Legal ledger edges.
    ///
    /// `Failed -> Executing` is only taken by an explicit user retry.
    pub fn can_transition_to(&self, next: ActionStatus) -> bool {
        use ActionStatus::*;
        matches!(
            (self, next),
            (Pending, Executing)
                | (Executing, Executed)
                | (Executing, Failed)
                | (Executed, Reversed)
                | (Failed, Executing)
        )
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed creation payload, one variant per action type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionPayload {
    Reminder {
        title: String,
        notes: Option<String>,
        due_date: Option<DateTime<Utc>>,
    },
    Calendar {
        title: String,
        notes: Option<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    Contact {
        first_name: String,
        last_name: Option<String>,
        phone: Option<String>,
        email: Option<String>,
    },
    Maps {
        query: String,
    },
}

impl ActionPayload {
    pub fn action_type(&self) -> ActionType {
        match self {
            ActionPayload::Reminder { .. } => ActionType::Reminder,
            ActionPayload::Calendar { .. } => ActionType::Calendar,
            ActionPayload::Contact { .. } => ActionType::Contact,
            ActionPayload::Maps { .. } => ActionType::Maps,
        }
    }
}

/// State needed to undo an executed action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReverseData {
    Reminder {
        reminder_id: String,
    },
    Calendar {
        event_id: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    Contact {
        contact_id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// User must grant access; never retried automatically
    PermissionDenied,
    Generic,
}

/// Why an action ended up `failed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionFailure {
    pub kind: FailureKind,
    pub message: String,
    pub remediation: Option<String>,
    pub failed_at: DateTime<Utc>,
}

/// One side-effect unit derived from an entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AIAction {
    pub id: String,
    pub data: ActionPayload,
    pub status: ActionStatus,
    pub executed_at: Option<DateTime<Utc>>,
    pub reversible: bool,
    pub reverse_data: Option<ReverseData>,
    #[serde(default)]
    pub failure: Option<ActionFailure>,
}

impl AIAction {
    /// Create a pending action for the given payload
    pub fn pending(data: ActionPayload) -> Self {
        let reversible = data.action_type().is_reversible();
        Self {
            id: Uuid::new_v4().to_string(),
            data,
            status: ActionStatus::Pending,
            executed_at: None,
            reversible,
            reverse_data: None,
            failure: None,
        }
    }

    pub fn action_type(&self) -> ActionType {
        self.data.action_type()
    }

    /// A reversible executed action must carry its reverse data.
    pub fn is_consistent(&self) -> bool {
        !(self.reversible && self.status == ActionStatus::Executed && self.reverse_data.is_none())
    }
}

/// AI-generated research attached to an entry. Replaced whole on regeneration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchResults {
    /// Markdown summary
    pub content: String,
    pub generated_at: DateTime<Utc>,
    pub cost: f64,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingMeta {
    pub processed_at: DateTime<Utc>,
    pub total_cost: f64,
    pub processing_time_ms: u64,
}

/// Per-entry wrapper owned by the orchestration pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AIMetadata {
    pub actions: Vec<AIAction>,
    pub research_results: Option<ResearchResults>,
    /// Absent until a processing run completes
    pub processing_meta: Option<ProcessingMeta>,
}

impl AIMetadata {
    pub fn action(&self, action_id: &str) -> Option<&AIAction> {
        self.actions.iter().find(|a| a.id == action_id)
    }

    pub fn action_mut(&mut self, action_id: &str) -> Option<&mut AIAction> {
        self.actions.iter_mut().find(|a| a.id == action_id)
    }
}

/// Raw `entries` row. JSON columns are decoded in the `TryFrom` impl.
#[derive(Debug, Clone, FromRow)]
pub struct EntryRow {
    pub id: String,
    pub entry_type: String,
    pub content: String,
    pub trigger_used: String,
    pub created_at: DateTime<Utc>,
    pub status: Option<String>,
    pub tags_json: String,
    pub source_app: String,
    pub source_url: Option<String>,
    pub ai_metadata_json: Option<String>,
}

impl TryFrom<EntryRow> for Entry {
    type Error = AppError;

    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        let status = row.status.as_deref().map(EntryStatus::from_str).transpose()?;
        let tags: BTreeSet<String> = serde_json::from_str(&row.tags_json)?;
        let ai_metadata = row
            .ai_metadata_json
            .as_deref()
            .map(serde_json::from_str::<AIMetadata>)
            .transpose()?;

        Ok(Entry {
            id: row.id,
            entry_type: row.entry_type.parse()?,
            content: row.content,
            trigger_used: row.trigger_used,
            created_at: row.created_at,
            status,
            tags,
            source_app: row.source_app,
            source_url: row.source_url,
            ai_metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        use ActionStatus::*;

        assert!(Pending.can_transition_to(Executing));
        assert!(Executing.can_transition_to(Executed));
        assert!(Executing.can_transition_to(Failed));
        assert!(Executed.can_transition_to(Reversed));
        assert!(Failed.can_transition_to(Executing));

        assert!(!Pending.can_transition_to(Executed));
        assert!(!Executed.can_transition_to(Executing));
        assert!(!Reversed.can_transition_to(Executed));
        assert!(!Reversed.can_transition_to(Reversed));
        assert!(!Failed.can_transition_to(Reversed));
    }

    #[test]
    fn test_entry_status_display_round_trips() {
        for status in [EntryStatus::Open, EntryStatus::Done] {
            let parsed: EntryStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert_eq!(format!("marked {}", EntryStatus::Done), "marked done");
    }

    #[test]
    fn test_maps_actions_are_not_reversible() {
        let maps = AIAction::pending(ActionPayload::Maps {
            query: "1 Infinite Loop".to_string(),
        });
        assert!(!maps.reversible);

        let reminder = AIAction::pending(ActionPayload::Reminder {
            title: "Buy milk".to_string(),
            notes: None,
            due_date: None,
        });
        assert!(reminder.reversible);
        assert_eq!(reminder.status, ActionStatus::Pending);
    }

    #[test]
    fn test_consistency_requires_reverse_data_when_executed() {
        let mut action = AIAction::pending(ActionPayload::Contact {
            first_name: "John".to_string(),
            last_name: None,
            phone: Some("555-123-4567".to_string()),
            email: None,
        });
        assert!(action.is_consistent());

        action.status = ActionStatus::Executed;
        assert!(!action.is_consistent());

        action.reverse_data = Some(ReverseData::Contact {
            contact_id: "c-1".to_string(),
        });
        assert!(action.is_consistent());
    }

    #[test]
    fn test_payload_serializes_with_type_tag() {
        let payload = ActionPayload::Maps {
            query: "Blue Bottle Coffee".to_string(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "maps");
        assert_eq!(json["query"], "Blue Bottle Coffee");
    }

    #[test]
    fn test_todo_entries_start_open() {
        let todo = Entry::new(EntryType::Todo, "x".into(), "///".into(), Utc::now());
        assert_eq!(todo.status, Some(EntryStatus::Open));

        let piece = Entry::new(EntryType::Piece, "x".into(), ",,,".into(), Utc::now());
        assert_eq!(piece.status, None);
    }
}
