//! Action decision engine
//!
//! Deterministic rule table from entry type and extracted fields to the
//! ordered list of pending actions. No I/O happens here.

use super::extractor::ExtractedFields;
use crate::config::DEFAULT_EVENT_DURATION_MINUTES;
use crate::database::{AIAction, ActionPayload, EntryType};
use chrono::Duration;

/// What the pipeline should do for one entry
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// Pending actions, in execution order
    pub actions: Vec<AIAction>,
    pub research: bool,
}

#[derive(Debug, Clone)]
pub struct ActionDecisionEngine {
    event_duration: Duration,
}

impl Default for ActionDecisionEngine {
    fn default() -> Self {
        Self {
            event_duration: Duration::minutes(DEFAULT_EVENT_DURATION_MINUTES),
        }
    }
}

impl ActionDecisionEngine {
    pub fn new(event_duration: Duration) -> Self {
        Self { event_duration }
    }

    pub fn decide(&self, entry_type: EntryType, content: &str, fields: &ExtractedFields) -> Decision {
        match entry_type {
            EntryType::Todo => self.decide_todo(content, fields),
            EntryType::Piece => self.decide_piece(content, fields),
        }
    }

    fn decide_todo(&self, content: &str, fields: &ExtractedFields) -> Decision {
        let title = fields
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| content.trim().to_string());
        let notes = (title != content.trim()).then(|| content.trim().to_string());

        let mut actions = vec![AIAction::pending(ActionPayload::Reminder {
            title: title.clone(),
            notes: notes.clone(),
            due_date: fields.due_date,
        })];

        if let Some(start) = fields.due_date {
            actions.push(AIAction::pending(ActionPayload::Calendar {
                title,
                notes,
                start,
                end: start + self.event_duration,
            }));
        }

        Decision {
            actions,
            research: true,
        }
    }

    fn decide_piece(&self, content: &str, fields: &ExtractedFields) -> Decision {
        let mut actions = Vec::new();

        if let Some(name) = fields.name.as_deref().filter(|n| !n.trim().is_empty()) {
            if fields.phone.is_some() || fields.email.is_some() {
                let (first_name, last_name) = split_name(name);
                actions.push(AIAction::pending(ActionPayload::Contact {
                    first_name,
                    last_name,
                    phone: fields.phone.clone(),
                    email: fields.email.clone(),
                }));
            }
        }

        if let Some(location) = fields.location.as_deref().filter(|l| !l.trim().is_empty()) {
            actions.push(AIAction::pending(ActionPayload::Maps {
                query: location.to_string(),
            }));
        }

        Decision {
            actions,
            research: !is_structured_only(content, fields),
        }
    }
}

fn split_name(name: &str) -> (String, Option<String>) {
    let name = name.trim();
    match name.split_once(char::is_whitespace) {
        Some((first, rest)) => (first.to_string(), Some(rest.trim().to_string())),
        None => (name.to_string(), None),
    }
}

/// True when nothing but contact / location data remains in the text
fn is_structured_only(content: &str, fields: &ExtractedFields) -> bool {
    let has_structure = fields.phone.is_some() || fields.email.is_some() || fields.location.is_some();
    if !has_structure {
        return false;
    }

    let mut rest = content.to_string();
    let parts = [&fields.phone, &fields.email, &fields.location, &fields.name];
    for part in parts.into_iter().flatten() {
        rest = rest.replace(part.as_str(), " ");
    }

    !rest.chars().any(char::is_alphanumeric)
}
