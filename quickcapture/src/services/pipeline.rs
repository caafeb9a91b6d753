//! Per-entry orchestration pipeline
//!
//! extract -> decide -> execute each action in order -> research -> stamp
//! processing meta. Steps run strictly in sequence for one entry. A failed
//! action never stops its siblings; only cancellation aborts the run.

use super::bounded::bounded_call;
use super::decision::ActionDecisionEngine;
use super::executor::{ActionExecutor, ExecutionOutcome};
use super::extractor::{resolve_time_phrase, ContentExtractor, ExtractedFields, PatternExtractor};
use super::research::ResearchGenerator;
use crate::config::{DEFAULT_EXTRACTION_TIMEOUT_MS, DEFAULT_RESEARCH_TIMEOUT_MS};
use crate::database::{Entry, ProcessingMeta, ResearchResults};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use chrono::{Local, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Summary of one completed run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingReport {
    pub entry_id: String,
    pub executed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub research_attached: bool,
    pub cost: f64,
    pub processing_time_ms: u64,
}

impl ProcessingReport {
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Anything the queue can run for an entry
#[async_trait]
pub trait EntryProcessor: Send + Sync {
    async fn process(&self, entry_id: &str, cancel: &CancellationToken) -> Result<ProcessingReport>;
}

#[derive(Clone)]
pub struct Orchestrator {
    extractor: Option<Arc<dyn ContentExtractor>>,
    fallback: PatternExtractor,
    decision: ActionDecisionEngine,
    executor: ActionExecutor,
    research: Option<Arc<dyn ResearchGenerator>>,
    extraction_timeout: Duration,
    research_timeout: Duration,
}

impl Orchestrator {
    pub fn new(executor: ActionExecutor) -> Self {
        Self {
            extractor: None,
            fallback: PatternExtractor::new(),
            decision: ActionDecisionEngine::default(),
            executor,
            research: None,
            extraction_timeout: Duration::from_millis(DEFAULT_EXTRACTION_TIMEOUT_MS),
            research_timeout: Duration::from_millis(DEFAULT_RESEARCH_TIMEOUT_MS),
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn ContentExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn with_research(mut self, research: Arc<dyn ResearchGenerator>) -> Self {
        self.research = Some(research);
        self
    }

    pub fn with_timeouts(mut self, extraction: Duration, research: Duration) -> Self {
        self.extraction_timeout = extraction;
        self.research_timeout = research;
        self
    }

    /// Remote extraction with the local matcher as fallback
    async fn extract(&self, entry: &Entry, cancel: &CancellationToken) -> Result<ExtractedFields> {
        let Some(extractor) = &self.extractor else {
            return Ok(self.fallback.extract_at(&entry.content, Local::now()));
        };

        let remote = bounded_call(
            cancel,
            self.extraction_timeout,
            "extraction",
            extractor.extract(&entry.content),
        )
        .await;

        match remote {
            Ok(mut fields) => {
                if fields.due_date.is_none() {
                    fields.due_date = fields
                        .time
                        .as_deref()
                        .and_then(|t| resolve_time_phrase(t, Local::now()));
                }
                Ok(fields)
            }
            Err(AppError::Cancelled) => Err(AppError::Cancelled),
            Err(e) => {
                tracing::warn!(
                    entry_id = %entry.id,
                    error = %e,
                    "Extraction failed, using local pattern matcher"
                );
                Ok(self.fallback.extract_at(&entry.content, Local::now()))
            }
        }
    }

    /// Generate and attach research. Returns the cost when something was attached.
    async fn research(&self, entry: &Entry, cancel: &CancellationToken) -> Result<Option<f64>> {
        let Some(generator) = &self.research else {
            tracing::debug!(entry_id = %entry.id, "No research generator configured");
            return Ok(None);
        };

        let generated = bounded_call(
            cancel,
            self.research_timeout,
            "research",
            generator.generate(&entry.content, entry.entry_type),
        )
        .await;

        match generated {
            Ok(output) => {
                let cost = output.cost;
                self.executor
                    .ledger()
                    .attach_research(
                        &entry.id,
                        ResearchResults {
                            content: output.content,
                            generated_at: Utc::now(),
                            cost: output.cost,
                            processing_time_ms: output.processing_time_ms,
                        },
                    )
                    .await?;
                Ok(Some(cost))
            }
            Err(AppError::Cancelled) => Err(AppError::Cancelled),
            Err(e) => {
                tracing::warn!(entry_id = %entry.id, error = %e, "Research generation failed");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl EntryProcessor for Orchestrator {
    async fn process(&self, entry_id: &str, cancel: &CancellationToken) -> Result<ProcessingReport> {
        let started = Instant::now();
        let ledger = self.executor.ledger();
        let entry = ledger.load(entry_id).await?;
        let mut report = ProcessingReport {
            entry_id: entry_id.to_string(),
            ..ProcessingReport::default()
        };

        tracing::info!(entry_id, entry_type = %entry.entry_type, "Processing entry");

        let fields = self.extract(&entry, cancel).await?;
        let decision = self.decision.decide(entry.entry_type, &entry.content, &fields);
        let had_research = entry
            .ai_metadata
            .as_ref()
            .is_some_and(|m| m.research_results.is_some());
        let actions = ledger.record_actions(entry_id, decision.actions).await?;

        for action in &actions {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            match self.executor.execute_action(entry_id, &action.id, cancel, false).await {
                Ok(ExecutionOutcome::Executed(_)) => report.executed += 1,
                Ok(ExecutionOutcome::Skipped(_)) => report.skipped += 1,
                Err(AppError::Cancelled) => return Err(AppError::Cancelled),
                Err(e) => {
                    report.failed += 1;
                    tracing::debug!(entry_id, action_id = %action.id, error = %e, "Continuing after failed action");
                }
            }
        }

        if decision.research && !had_research {
            if let Some(cost) = self.research(&entry, cancel).await? {
                report.research_attached = true;
                report.cost += cost;
            }
        }

        report.processing_time_ms = started.elapsed().as_millis() as u64;
        ledger
            .complete(
                entry_id,
                ProcessingMeta {
                    processed_at: Utc::now(),
                    total_cost: report.cost,
                    processing_time_ms: report.processing_time_ms,
                },
            )
            .await?;

        tracing::info!(
            entry_id,
            executed = report.executed,
            failed = report.failed,
            skipped = report.skipped,
            cost = report.cost,
            elapsed_ms = report.processing_time_ms,
            "Entry processed"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{initialize_database, ActionStatus, ActionType, EntryType, Repository};
    use crate::services::ledger::ActionLedger;
    use crate::services::research::ResearchOutput;
    use crate::services::tools::DryRunToolService;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedResearch {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ResearchGenerator for FixedResearch {
        async fn generate(&self, text: &str, _entry_type: EntryType) -> Result<ResearchOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ResearchOutput {
                content: format!("## {}", text),
                cost: 0.02,
                processing_time_ms: 5,
            })
        }
    }

    struct BrokenExtractor;

    #[async_trait]
    impl ContentExtractor for BrokenExtractor {
        async fn extract(&self, _text: &str) -> Result<ExtractedFields> {
            Err(AppError::Extraction("service unavailable".to_string()))
        }
    }

    struct HangingExtractor;

    #[async_trait]
    impl ContentExtractor for HangingExtractor {
        async fn extract(&self, _text: &str) -> Result<ExtractedFields> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(ExtractedFields::default())
        }
    }

    async fn create_test_orchestrator() -> (Orchestrator, Repository, Arc<FixedResearch>) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        initialize_database(&pool).await.unwrap();
        let repo = Repository::new(pool);
        let ledger = ActionLedger::new(Arc::new(repo.clone()));
        let executor = ActionExecutor::new(Arc::new(DryRunToolService::new()), ledger);
        let research = Arc::new(FixedResearch {
            calls: AtomicUsize::new(0),
        });
        let orchestrator = Orchestrator::new(executor)
            .with_extractor(Arc::new(BrokenExtractor))
            .with_research(research.clone());
        (orchestrator, repo, research)
    }

    #[tokio::test]
    async fn test_todo_runs_reminder_calendar_and_research() {
        let (orchestrator, repo, research) = create_test_orchestrator().await;
        let entry = Entry::new(EntryType::Todo, "Buy milk tomorrow".into(), "///".into(), Utc::now());
        repo.create_entry(&entry).await.unwrap();

        let report = orchestrator
            .process(&entry.id, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.executed, 2);
        assert!(report.research_attached);
        assert!((report.cost - 0.02).abs() < f64::EPSILON);

        let stored = repo.get_entry(&entry.id).await.unwrap();
        let meta = stored.ai_metadata.unwrap();
        let types: Vec<ActionType> = meta.actions.iter().map(|a| a.action_type()).collect();
        assert_eq!(types, vec![ActionType::Reminder, ActionType::Calendar]);
        assert!(meta
            .actions
            .iter()
            .all(|a| a.status == ActionStatus::Executed && a.reverse_data.is_some()));
        assert!(meta.research_results.is_some());
        assert!(meta.processing_meta.is_some());
        assert_eq!(research.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_extraction_timeout_falls_back_to_patterns() {
        let (orchestrator, repo, _research) = create_test_orchestrator().await;
        let orchestrator = orchestrator
            .with_extractor(Arc::new(HangingExtractor))
            .with_timeouts(Duration::from_millis(50), Duration::from_secs(1));
        let entry = Entry::new(EntryType::Todo, "Buy milk tomorrow".into(), "///".into(), Utc::now());
        repo.create_entry(&entry).await.unwrap();

        let started = Instant::now();
        let report = orchestrator
            .process(&entry.id, &CancellationToken::new())
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(report.executed, 2);

        let meta = repo.get_entry(&entry.id).await.unwrap().ai_metadata.unwrap();
        let calendar = meta
            .actions
            .iter()
            .find(|a| a.action_type() == ActionType::Calendar);
        assert!(calendar.is_some());
    }

    #[tokio::test]
    async fn test_raw_contact_piece_skips_research() {
        let (orchestrator, repo, research) = create_test_orchestrator().await;
        let entry = Entry::new(EntryType::Piece, "555-123-4567 John".into(), ",,,".into(), Utc::now());
        repo.create_entry(&entry).await.unwrap();

        let report = orchestrator
            .process(&entry.id, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.executed, 1);
        assert!(!report.research_attached);
        assert_eq!(research.calls.load(Ordering::SeqCst), 0);

        let meta = repo.get_entry(&entry.id).await.unwrap().ai_metadata.unwrap();
        assert_eq!(meta.actions.len(), 1);
        assert_eq!(meta.actions[0].action_type(), ActionType::Contact);
        assert!(meta.research_results.is_none());
    }

    #[tokio::test]
    async fn test_rerun_does_not_repeat_side_effects() {
        let (orchestrator, repo, research) = create_test_orchestrator().await;
        let entry = Entry::new(EntryType::Todo, "Call the bank".into(), "///".into(), Utc::now());
        repo.create_entry(&entry).await.unwrap();
        let cancel = CancellationToken::new();

        orchestrator.process(&entry.id, &cancel).await.unwrap();
        let second = orchestrator.process(&entry.id, &cancel).await.unwrap();

        assert_eq!(second.executed, 0);
        assert_eq!(second.skipped, 1);
        assert!(!second.research_attached);
        assert_eq!(research.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_stops_before_actions() {
        let (orchestrator, repo, _research) = create_test_orchestrator().await;
        let entry = Entry::new(EntryType::Todo, "Call the bank".into(), "///".into(), Utc::now());
        repo.create_entry(&entry).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = orchestrator.process(&entry.id, &cancel).await;
        assert!(matches!(result, Err(AppError::Cancelled)));

        let stored = repo.get_entry(&entry.id).await.unwrap();
        let pending = stored
            .ai_metadata
            .map(|m| m.actions.iter().all(|a| a.status == ActionStatus::Pending))
            .unwrap_or(true);
        assert!(pending);
    }
}
