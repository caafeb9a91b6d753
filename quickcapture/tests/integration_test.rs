//! Integration tests for QuickCapture
//!
//! These tests drive the whole application end to end:
//! - Keystrokes through the trigger monitor into stored entries
//! - The orchestration pipeline against recording collaborators
//! - Reversal, retry and backlog sweeps through `AppState`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quickcapture::app::{AppState, Collaborators};
use quickcapture::capture::{ChannelInputSource, Key, KeyEvent, SourceContext};
use quickcapture::database::{
    ActionStatus, ActionType, Entry, EntryType, FailureKind, ReverseData,
};
use quickcapture::error::{AppError, Result};
use quickcapture::services::settings::{ProcessingSettings, TriggerBindingSettings};
use quickcapture::services::tools::ToolResult;
use quickcapture::services::{
    DryRunToolService, ResearchGenerator, ResearchOutput, ToolError, ToolService, TriggerSettings,
};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

/// Tool service that records every call and can refuse or stall reminders
#[derive(Default)]
struct RecordingTools {
    inner: DryRunToolService,
    creates: AtomicUsize,
    deleted: Mutex<Vec<String>>,
    deny_reminders: AtomicBool,
    reminder_delay_ms: AtomicU64,
}

impl RecordingTools {
    fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolService for RecordingTools {
    async fn create_reminder(
        &self,
        title: &str,
        notes: Option<&str>,
        due_date: Option<DateTime<Utc>>,
    ) -> ToolResult<String> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let delay = self.reminder_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.deny_reminders.load(Ordering::SeqCst) {
            return Err(ToolError::PermissionDenied("Reminders access denied".to_string()));
        }
        self.inner.create_reminder(title, notes, due_date).await
    }

    async fn create_calendar_event(
        &self,
        title: &str,
        notes: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ToolResult<String> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create_calendar_event(title, notes, start, end).await
    }

    async fn create_contact(
        &self,
        first_name: &str,
        last_name: Option<&str>,
        phone: Option<&str>,
        email: Option<&str>,
    ) -> ToolResult<String> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create_contact(first_name, last_name, phone, email).await
    }

    async fn open_in_maps(&self, query: &str) -> ToolResult<()> {
        self.inner.open_in_maps(query).await
    }

    async fn delete_reminder(&self, id: &str) -> ToolResult<()> {
        self.deleted.lock().unwrap().push(id.to_string());
        self.inner.delete_reminder(id).await
    }

    async fn delete_calendar_event(&self, id: &str) -> ToolResult<()> {
        self.deleted.lock().unwrap().push(id.to_string());
        self.inner.delete_calendar_event(id).await
    }

    async fn delete_contact(&self, id: &str) -> ToolResult<()> {
        self.deleted.lock().unwrap().push(id.to_string());
        self.inner.delete_contact(id).await
    }
}

#[derive(Default)]
struct CountingResearch {
    calls: AtomicUsize,
}

#[async_trait]
impl ResearchGenerator for CountingResearch {
    async fn generate(&self, text: &str, entry_type: EntryType) -> Result<ResearchOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ResearchOutput {
            content: format!("# Notes on {}\n\nKind: {}", text, entry_type),
            cost: 0.01,
            processing_time_ms: 3,
        })
    }
}

struct Harness {
    state: AppState,
    tools: Arc<RecordingTools>,
    research: Arc<CountingResearch>,
    keys: mpsc::Sender<KeyEvent>,
    _temp: TempDir,
}

/// Helper to start a fully wired application in a temp directory
async fn start_app() -> Harness {
    let temp_dir = TempDir::new().unwrap();
    let tools = Arc::new(RecordingTools::default());
    let research = Arc::new(CountingResearch::default());

    let collaborators = Collaborators {
        tools: tools.clone(),
        extractor: None,
        research: Some(research.clone()),
    };
    let state = AppState::with_collaborators(temp_dir.path().to_path_buf(), collaborators)
        .await
        .unwrap();

    let (source, keys) = ChannelInputSource::new(256);
    state.start_capture(&source).await.unwrap();

    Harness {
        state,
        tools,
        research,
        keys,
        _temp: temp_dir,
    }
}

/// Type `text` then press Enter
async fn type_line(keys: &mpsc::Sender<KeyEvent>, text: &str) {
    let context = SourceContext::app("Notes");
    for c in text.chars() {
        keys.send(KeyEvent::now(Key::Char(c), context.clone()))
            .await
            .unwrap();
    }
    keys.send(KeyEvent::now(Key::Enter, context)).await.unwrap();
}

/// Poll until `count` entries exist and all have finished processing
async fn wait_for_processed(state: &AppState, count: usize) -> Vec<Entry> {
    for _ in 0..500 {
        let entries = state.entries().list_entries(None).await.unwrap();
        let done = entries.len() >= count
            && entries.iter().all(|e| {
                e.ai_metadata
                    .as_ref()
                    .is_some_and(|m| m.processing_meta.is_some())
            });
        if done {
            return entries;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("entries were not processed in time");
}

fn action_id(entry: &Entry, kind: ActionType) -> String {
    entry
        .ai_metadata
        .as_ref()
        .and_then(|m| m.actions.iter().find(|a| a.action_type() == kind))
        .map(|a| a.id.clone())
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_todo_capture_runs_reminder_and_calendar() {
    let app = start_app().await;

    type_line(&app.keys, "///Buy milk tomorrow").await;

    let entries = wait_for_processed(&app.state, 1).await;
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.entry_type, EntryType::Todo);
    assert_eq!(entry.content, "Buy milk tomorrow");
    assert_eq!(entry.trigger_used, "///");
    assert_eq!(entry.source_app, "Notes");

    let meta = entry.ai_metadata.as_ref().unwrap();
    let kinds: Vec<ActionType> = meta.actions.iter().map(|a| a.action_type()).collect();
    assert_eq!(kinds, vec![ActionType::Reminder, ActionType::Calendar]);
    for action in &meta.actions {
        assert_eq!(action.status, ActionStatus::Executed);
        assert!(action.reverse_data.is_some());
        assert!(action.is_consistent());
    }
    assert!(meta.research_results.is_some());
    assert_eq!(app.research.calls.load(Ordering::SeqCst), 1);

    let stats = app.state.stats().await;
    assert_eq!(stats.total_processed, 1);
    assert_eq!(stats.currently_processing, 0);
    assert!((stats.total_cost - 0.01).abs() < 1e-9);

    app.state.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_raw_contact_piece_has_no_research() {
    let app = start_app().await;

    type_line(&app.keys, ",,,555-123-4567 John").await;

    let entries = wait_for_processed(&app.state, 1).await;
    let entry = &entries[0];
    assert_eq!(entry.entry_type, EntryType::Piece);
    assert!(entry.status.is_none());

    let meta = entry.ai_metadata.as_ref().unwrap();
    assert_eq!(meta.actions.len(), 1);
    assert_eq!(meta.actions[0].action_type(), ActionType::Contact);
    assert_eq!(meta.actions[0].status, ActionStatus::Executed);
    assert!(meta.research_results.is_none());
    assert_eq!(app.research.calls.load(Ordering::SeqCst), 0);

    app.state.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_permission_denied_then_manual_retry() {
    let app = start_app().await;
    app.tools.deny_reminders.store(true, Ordering::SeqCst);

    type_line(&app.keys, "///Call mom").await;

    let entries = wait_for_processed(&app.state, 1).await;
    let entry = &entries[0];
    let reminder_id = action_id(entry, ActionType::Reminder);
    let reminder = entry.ai_metadata.as_ref().unwrap().action(&reminder_id).unwrap();
    assert_eq!(reminder.status, ActionStatus::Failed);
    let failure = reminder.failure.as_ref().unwrap();
    assert_eq!(failure.kind, FailureKind::PermissionDenied);
    assert!(failure.remediation.as_ref().unwrap().contains("Reminders"));

    // No automatic retry happened
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(app.tools.creates.load(Ordering::SeqCst), 1);
    assert_eq!(app.state.stats().await.total_failures, 1);

    // Still denied: retry fails again and stays failed
    let denied = app.state.retry_action(&entry.id, &reminder_id).await;
    assert!(matches!(denied, Err(AppError::PermissionDenied { .. })));

    app.tools.deny_reminders.store(false, Ordering::SeqCst);
    let retried = app.state.retry_action(&entry.id, &reminder_id).await.unwrap();
    assert_eq!(retried.status, ActionStatus::Executed);
    assert!(retried.reverse_data.is_some());

    // Retrying an executed action is a no-op
    app.state.retry_action(&entry.id, &reminder_id).await.unwrap();
    assert_eq!(app.tools.creates.load(Ordering::SeqCst), 3);

    app.state.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reverse_calendar_action() {
    let app = start_app().await;

    type_line(&app.keys, "///Dentist friday at 3pm").await;

    let entries = wait_for_processed(&app.state, 1).await;
    let entry = &entries[0];
    let calendar_id = action_id(entry, ActionType::Calendar);
    let stored_event_id = match &entry
        .ai_metadata
        .as_ref()
        .unwrap()
        .action(&calendar_id)
        .unwrap()
        .reverse_data
    {
        Some(ReverseData::Calendar { event_id, .. }) => event_id.clone(),
        other => panic!("expected calendar reverse data, got {:?}", other),
    };

    let reversed = app.state.reverse_action(&entry.id, &calendar_id).await.unwrap();
    assert_eq!(reversed.status, ActionStatus::Reversed);
    assert_eq!(app.tools.deleted(), vec![stored_event_id]);

    // Second reversal performs no side effect
    let again = app.state.reverse_action(&entry.id, &calendar_id).await.unwrap();
    assert_eq!(again.status, ActionStatus::Reversed);
    assert_eq!(app.tools.deleted().len(), 1);

    // The reminder is untouched
    let stored = app.state.entries().get_entry(&entry.id).await.unwrap();
    let reminder_id = action_id(&stored, ActionType::Reminder);
    assert_eq!(
        stored.ai_metadata.unwrap().action(&reminder_id).unwrap().status,
        ActionStatus::Executed
    );

    app.state.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_backlog_sweep_processes_each_entry_once() {
    let app = start_app().await;

    // Stored but never queued, as after a crash
    for content in ["Water plants", "Book flights", "Renew passport"] {
        let capture = quickcapture::capture::CaptureResult {
            trigger: "///".to_string(),
            entry_type: EntryType::Todo,
            content: content.to_string(),
            started_at: Utc::now(),
            ended_at: Utc::now(),
            context: SourceContext::app("Mail"),
            reason: quickcapture::capture::FinalizeReason::Enter,
        };
        app.state.entries().create_from_capture(&capture).await.unwrap();
    }

    let first = app.state.process_backlog().await.unwrap();
    assert_eq!(first.enqueued, 3);

    wait_for_processed(&app.state, 3).await;
    let second = app.state.process_backlog().await.unwrap();
    assert_eq!(second.enqueued, 0);

    assert_eq!(app.state.stats().await.total_processed, 3);
    assert_eq!(app.tools.creates.load(Ordering::SeqCst), 3);

    app.state.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_updated_triggers_apply_to_next_capture() {
    let app = start_app().await;

    app.state
        .update_trigger_settings(TriggerSettings {
            bindings: vec![TriggerBindingSettings {
                trigger: "!!".to_string(),
                entry_type: EntryType::Todo,
            }],
            ..TriggerSettings::default()
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    type_line(&app.keys, "///ignored now").await;
    type_line(&app.keys, "!!Pay rent").await;

    let entries = wait_for_processed(&app.state, 1).await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].trigger_used, "!!");
    assert_eq!(entries[0].content, "Pay rent");

    let persisted = app.state.settings().get_triggers().await.unwrap();
    assert_eq!(persisted.bindings[0].trigger, "!!");

    app.state.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reverse_and_retry_rejected_while_entry_runs() {
    let app = start_app().await;
    app.tools.reminder_delay_ms.store(500, Ordering::SeqCst);

    type_line(&app.keys, "///Water plants").await;

    // Wait until the run has recorded its actions and is stuck in the tool call
    let mut running = None;
    for _ in 0..200 {
        let entries = app.state.entries().list_entries(None).await.unwrap();
        if let Some(entry) = entries.into_iter().find(|e| e.ai_metadata.is_some()) {
            running = Some(entry);
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let entry = running.expect("entry never started processing");
    let reminder_id = action_id(&entry, ActionType::Reminder);

    let reversed = app.state.reverse_action(&entry.id, &reminder_id).await;
    assert!(matches!(reversed, Err(AppError::EntryBusy(_))));
    let retried = app.state.retry_action(&entry.id, &reminder_id).await;
    assert!(matches!(retried, Err(AppError::EntryBusy(_))));

    wait_for_processed(&app.state, 1).await;
    let reversed = app.state.reverse_action(&entry.id, &reminder_id).await.unwrap();
    assert_eq!(reversed.status, ActionStatus::Reversed);
    assert_eq!(app.tools.creates.load(Ordering::SeqCst), 1);

    app.state.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_processing_settings_reschedule_sweep() {
    let app = start_app().await;
    assert!(app.state.sweep_scheduled().await);

    let disabled = ProcessingSettings {
        sweep_enabled: false,
        sweep_frequency: "2h".to_string(),
        ..ProcessingSettings::default()
    };
    app.state
        .update_processing_settings(disabled.clone())
        .await
        .unwrap();
    assert!(!app.state.sweep_scheduled().await);
    assert_eq!(app.state.settings().get_processing().await.unwrap(), disabled);

    let invalid = ProcessingSettings {
        sweep_frequency: "whenever".to_string(),
        ..ProcessingSettings::default()
    };
    assert!(matches!(
        app.state.update_processing_settings(invalid).await,
        Err(AppError::InvalidSettings(_))
    ));
    assert!(!app.state.sweep_scheduled().await);

    app.state
        .update_processing_settings(ProcessingSettings::default())
        .await
        .unwrap();
    assert!(app.state.sweep_scheduled().await);

    app.state.shutdown().await;
}
