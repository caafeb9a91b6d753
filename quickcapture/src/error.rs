//! Error types for QuickCapture
//!
//! All errors use thiserror for structured error handling.
//! These errors can be serialized for a front-end.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    #[error("Action {action_id} not found on entry {entry_id}")]
    ActionNotFound { entry_id: String, action_id: String },

    #[error("Illegal action transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Permission denied for {action}: {message}")]
    PermissionDenied { action: String, message: String },

    #[error("Action execution failed: {0}")]
    ActionExecution(String),

    #[error("Reversal failed: {0}")]
    Reversal(String),

    #[error("Action is not reversible: {0}")]
    NotReversible(String),

    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("Research generation failed: {0}")]
    Research(String),

    #[error("{operation} timed out after {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Entry is already being processed: {0}")]
    EntryBusy(String),

    #[error("Processing queue is closed")]
    QueueClosed,

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Input source error: {0}")]
    Input(String),

    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// User-facing guidance for errors the user can fix themselves.
    pub fn remediation(&self) -> Option<String> {
        match self {
            AppError::PermissionDenied { action, .. } => Some(format!(
                "Open System Settings > Privacy & Security and allow QuickCapture to access {}",
                permission_area(action)
            )),
            _ => None,
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, AppError::PermissionDenied { .. })
    }
}

fn permission_area(action: &str) -> &'static str {
    match action {
        "reminder" => "Reminders",
        "calendar" => "Calendars",
        "contact" => "Contacts",
        _ => "the requested service",
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_denied_has_remediation() {
        let err = AppError::PermissionDenied {
            action: "calendar".to_string(),
            message: "access revoked".to_string(),
        };

        assert!(err.is_permission_denied());
        let hint = err.remediation().unwrap();
        assert!(hint.contains("Calendars"));
    }

    #[test]
    fn test_generic_errors_have_no_remediation() {
        let err = AppError::ActionExecution("bridge unavailable".to_string());
        assert!(err.remediation().is_none());
        assert!(!err.is_permission_denied());
    }

    #[test]
    fn test_error_serializes_as_message() {
        let err = AppError::EntryNotFound("abc".to_string());
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, "\"Entry not found: abc\"");
    }
}
