//! Action executor
//!
//! Runs one ledger action against the `ToolService` and records the outcome.
//! Execution is guarded so an action that already ran never produces a
//! second side effect, and reversal is idempotent once an action is
//! `reversed`.

use super::bounded::bounded_call;
use super::ledger::{ActionLedger, Transition};
use super::tools::{ToolError, ToolService};
use crate::config::DEFAULT_TOOL_TIMEOUT_MS;
use crate::database::{
    AIAction, ActionFailure, ActionPayload, ActionStatus, FailureKind, ReverseData,
};
use crate::error::{AppError, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What `execute_action` did with the action
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// The side effect ran and the action is now `executed`
    Executed(AIAction),
    /// The guard refused to run the action; it is returned unchanged
    Skipped(AIAction),
}

impl ExecutionOutcome {
    pub fn action(&self) -> &AIAction {
        match self {
            ExecutionOutcome::Executed(action) | ExecutionOutcome::Skipped(action) => action,
        }
    }
}

#[derive(Clone)]
pub struct ActionExecutor {
    tools: Arc<dyn ToolService>,
    ledger: ActionLedger,
    tool_timeout: Duration,
}

impl ActionExecutor {
    pub fn new(tools: Arc<dyn ToolService>, ledger: ActionLedger) -> Self {
        Self {
            tools,
            ledger,
            tool_timeout: Duration::from_millis(DEFAULT_TOOL_TIMEOUT_MS),
        }
    }

    pub fn with_timeout(mut self, tool_timeout: Duration) -> Self {
        self.tool_timeout = tool_timeout;
        self
    }

    pub fn ledger(&self) -> &ActionLedger {
        &self.ledger
    }

    /// Execute one action.
    ///
    /// Only `pending` actions run, plus `failed` ones when `retry` is set.
    /// A tool failure leaves the action `failed` with a failure record and is
    /// returned as `PermissionDenied` or `ActionExecution`.
    pub async fn execute_action(
        &self,
        entry_id: &str,
        action_id: &str,
        cancel: &CancellationToken,
        retry: bool,
    ) -> Result<ExecutionOutcome> {
        let action = self.ledger.action(entry_id, action_id).await?;

        match action.status {
            ActionStatus::Pending => {}
            ActionStatus::Failed if retry => {
                tracing::info!(entry_id, action_id, "Retrying failed action");
            }
            ActionStatus::Executing => {
                tracing::warn!(
                    entry_id,
                    action_id,
                    "Action was left executing by an earlier run, skipping"
                );
                return Ok(ExecutionOutcome::Skipped(action));
            }
            status => {
                tracing::debug!(entry_id, action_id, %status, "Action not runnable, skipping");
                return Ok(ExecutionOutcome::Skipped(action));
            }
        }

        let action = self
            .ledger
            .transition(entry_id, action_id, Transition::Executing)
            .await?;

        let started = std::time::Instant::now();
        match self.invoke(&action.data, cancel).await {
            Ok(reverse_data) => {
                let executed = self
                    .ledger
                    .transition(
                        entry_id,
                        action_id,
                        Transition::Executed {
                            reverse_data,
                            at: Utc::now(),
                        },
                    )
                    .await?;

                tracing::info!(
                    entry_id,
                    action_id,
                    action_type = %executed.action_type(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Action executed"
                );
                Ok(ExecutionOutcome::Executed(executed))
            }
            Err(err) => {
                let failure = ActionFailure {
                    kind: if err.is_permission_denied() {
                        FailureKind::PermissionDenied
                    } else {
                        FailureKind::Generic
                    },
                    message: err.to_string(),
                    remediation: err.remediation(),
                    failed_at: Utc::now(),
                };

                tracing::warn!(
                    entry_id,
                    action_id,
                    action_type = %action.action_type(),
                    error = %err,
                    "Action failed"
                );

                self.ledger
                    .transition(entry_id, action_id, Transition::Failed(failure))
                    .await?;
                Err(err)
            }
        }
    }

    /// Undo an executed action.
    ///
    /// Reversing a `reversed` action is a no-op. If the inverse call fails the
    /// action stays `executed` and `Reversal` is returned.
    pub async fn reverse_action(
        &self,
        entry_id: &str,
        action_id: &str,
        cancel: &CancellationToken,
    ) -> Result<AIAction> {
        let action = self.ledger.action(entry_id, action_id).await?;

        match action.status {
            ActionStatus::Reversed => {
                tracing::debug!(entry_id, action_id, "Action already reversed");
                return Ok(action);
            }
            ActionStatus::Executed => {}
            status => {
                return Err(AppError::InvalidTransition {
                    from: status.to_string(),
                    to: ActionStatus::Reversed.to_string(),
                })
            }
        }

        if !action.reversible {
            return Err(AppError::NotReversible(format!(
                "{} action {}",
                action.action_type(),
                action.id
            )));
        }

        let reverse_data = action.reverse_data.as_ref().ok_or_else(|| {
            AppError::Reversal(format!("action {} has no reverse data", action.id))
        })?;

        let operation = format!("reverse {}", action.action_type());
        let undo = async {
            let outcome = match reverse_data {
                ReverseData::Reminder { reminder_id } => {
                    self.tools.delete_reminder(reminder_id).await
                }
                ReverseData::Calendar { event_id, .. } => {
                    self.tools.delete_calendar_event(event_id).await
                }
                ReverseData::Contact { contact_id } => self.tools.delete_contact(contact_id).await,
            };
            outcome.map_err(|e| AppError::Reversal(e.to_string()))
        };

        if let Err(err) = bounded_call(cancel, self.tool_timeout, &operation, undo).await {
            tracing::warn!(entry_id, action_id, error = %err, "Reversal did not complete");
            return Err(match err {
                AppError::Reversal(_) => err,
                other => AppError::Reversal(other.to_string()),
            });
        }

        let reversed = self
            .ledger
            .transition(entry_id, action_id, Transition::Reversed)
            .await?;
        tracing::info!(entry_id, action_id, "Action reversed");
        Ok(reversed)
    }

    async fn invoke(
        &self,
        payload: &ActionPayload,
        cancel: &CancellationToken,
    ) -> Result<Option<ReverseData>> {
        let kind = payload.action_type();
        let operation = format!("{} tool call", kind);

        let call = async {
            let outcome = match payload {
                ActionPayload::Reminder {
                    title,
                    notes,
                    due_date,
                } => self
                    .tools
                    .create_reminder(title, notes.as_deref(), *due_date)
                    .await
                    .map(|reminder_id| Some(ReverseData::Reminder { reminder_id })),
                ActionPayload::Calendar {
                    title,
                    notes,
                    start,
                    end,
                } => self
                    .tools
                    .create_calendar_event(title, notes.as_deref(), *start, *end)
                    .await
                    .map(|event_id| {
                        Some(ReverseData::Calendar {
                            event_id,
                            start: *start,
                            end: *end,
                        })
                    }),
                ActionPayload::Contact {
                    first_name,
                    last_name,
                    phone,
                    email,
                } => self
                    .tools
                    .create_contact(
                        first_name,
                        last_name.as_deref(),
                        phone.as_deref(),
                        email.as_deref(),
                    )
                    .await
                    .map(|contact_id| Some(ReverseData::Contact { contact_id })),
                ActionPayload::Maps { query } => {
                    self.tools.open_in_maps(query).await.map(|_| None)
                }
            };

            outcome.map_err(|err| match err {
                ToolError::PermissionDenied(message) => AppError::PermissionDenied {
                    action: kind.as_str().to_string(),
                    message,
                },
                ToolError::Failed(message) => AppError::ActionExecution(message),
            })
        };

        bounded_call(cancel, self.tool_timeout, &operation, call).await
    }
}
