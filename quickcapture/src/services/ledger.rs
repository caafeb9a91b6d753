//! Action ledger
//!
//! Per-entry record of actions, their status and reversal data. Every
//! change is a read-modify-write of the whole entry through the
//! `EntryStore`, validated against the legal status edges before the
//! write. Callers must hold the entry's lock (see `EntryLocks`).

use crate::database::{
    AIAction, AIMetadata, ActionFailure, ActionStatus, Entry, EntryStore, ProcessingMeta,
    ResearchResults, ReverseData,
};
use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// A requested status change for one action
#[derive(Debug, Clone)]
pub enum Transition {
    Executing,
    Executed {
        reverse_data: Option<ReverseData>,
        at: DateTime<Utc>,
    },
    Failed(ActionFailure),
    Reversed,
}

impl Transition {
    fn target(&self) -> ActionStatus {
        match self {
            Transition::Executing => ActionStatus::Executing,
            Transition::Executed { .. } => ActionStatus::Executed,
            Transition::Failed(_) => ActionStatus::Failed,
            Transition::Reversed => ActionStatus::Reversed,
        }
    }
}

#[derive(Clone)]
pub struct ActionLedger {
    store: Arc<dyn EntryStore>,
}

impl ActionLedger {
    pub fn new(store: Arc<dyn EntryStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn EntryStore> {
        &self.store
    }

    pub async fn load(&self, entry_id: &str) -> Result<Entry> {
        self.store
            .get(entry_id)
            .await?
            .ok_or_else(|| AppError::EntryNotFound(entry_id.to_string()))
    }

    /// Attach the decided actions to an entry.
    ///
    /// An entry that already has a ledger keeps it; the existing actions are
    /// returned so a re-run continues where the previous one stopped.
    pub async fn record_actions(&self, entry_id: &str, actions: Vec<AIAction>) -> Result<Vec<AIAction>> {
        let mut entry = self.load(entry_id).await?;

        if let Some(existing) = &entry.ai_metadata {
            tracing::debug!(entry_id, "Ledger already present, keeping existing actions");
            return Ok(existing.actions.clone());
        }

        entry.ai_metadata = Some(AIMetadata {
            actions: actions.clone(),
            ..AIMetadata::default()
        });
        self.store.update(&entry).await?;

        tracing::info!(entry_id, count = actions.len(), "Recorded actions");
        Ok(actions)
    }

    pub async fn action(&self, entry_id: &str, action_id: &str) -> Result<AIAction> {
        let entry = self.load(entry_id).await?;
        entry
            .ai_metadata
            .as_ref()
            .and_then(|m| m.action(action_id))
            .cloned()
            .ok_or_else(|| AppError::ActionNotFound {
                entry_id: entry_id.to_string(),
                action_id: action_id.to_string(),
            })
    }

    /// Apply one validated status transition and persist it immediately
    pub async fn transition(
        &self,
        entry_id: &str,
        action_id: &str,
        transition: Transition,
    ) -> Result<AIAction> {
        let mut entry = self.load(entry_id).await?;
        let action = entry
            .ai_metadata
            .as_mut()
            .and_then(|m| m.action_mut(action_id))
            .ok_or_else(|| AppError::ActionNotFound {
                entry_id: entry_id.to_string(),
                action_id: action_id.to_string(),
            })?;

        let target = transition.target();
        if !action.status.can_transition_to(target) {
            return Err(AppError::InvalidTransition {
                from: action.status.to_string(),
                to: target.to_string(),
            });
        }

        let mut updated = action.clone();
        updated.status = target;
        match transition {
            Transition::Executing => updated.failure = None,
            Transition::Executed { reverse_data, at } => {
                updated.executed_at = Some(at);
                updated.reverse_data = reverse_data;
                updated.failure = None;
            }
            Transition::Failed(failure) => updated.failure = Some(failure),
            Transition::Reversed => {}
        }

        if !updated.is_consistent() {
            return Err(AppError::ActionExecution(format!(
                "{} action {} executed without reverse data",
                updated.action_type(),
                updated.id
            )));
        }

        *action = updated.clone();
        self.store.update(&entry).await?;

        tracing::debug!(
            entry_id,
            action_id,
            status = %updated.status,
            "Action transition persisted"
        );
        Ok(updated)
    }

    /// Replace any previous research with `research`
    pub async fn attach_research(&self, entry_id: &str, research: ResearchResults) -> Result<()> {
        let mut entry = self.load(entry_id).await?;
        entry
            .ai_metadata
            .get_or_insert_with(AIMetadata::default)
            .research_results = Some(research);
        self.store.update(&entry).await
    }

    /// Stamp the processing summary for a finished run
    pub async fn complete(&self, entry_id: &str, meta: ProcessingMeta) -> Result<Entry> {
        let mut entry = self.load(entry_id).await?;
        entry
            .ai_metadata
            .get_or_insert_with(AIMetadata::default)
            .processing_meta = Some(meta);
        self.store.update(&entry).await?;
        Ok(entry)
    }
}
