//! Application state and initialization
//!
//! This module manages the central application state and lifecycle.
//! All services are constructed here, owned by `AppState`, and torn down
//! by `AppState::shutdown`.

use crate::capture::{spawn_monitor, CaptureResult, InputSource, TriggerConfiguration};
use crate::config::DATABASE_FILE_NAME;
use crate::database::{self, AIAction, Entry, EntryStatus, Repository};
use crate::error::{AppError, Result};
use crate::services::settings::{ProcessingSettings, ServiceSettings};
use crate::services::{
    ActionExecutor, ActionLedger, ContentExtractor, DryRunToolService, EntriesService, EntryLocks,
    HttpContentExtractor, HttpEndpoint, HttpResearchGenerator, HttpToolService, Orchestrator,
    ProcessingQueue, ProcessingStats, ResearchGenerator, SettingsService, SweepReport,
    SweepScheduler, ToolService, TriggerSettings,
};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// External collaborators the pipeline talks to
#[derive(Clone)]
pub struct Collaborators {
    pub tools: Arc<dyn ToolService>,
    /// None = local pattern matcher only
    pub extractor: Option<Arc<dyn ContentExtractor>>,
    /// None = research is skipped
    pub research: Option<Arc<dyn ResearchGenerator>>,
}

impl Collaborators {
    /// Log side effects instead of performing them; no remote services
    pub fn dry_run() -> Self {
        Self {
            tools: Arc::new(DryRunToolService::new()),
            extractor: None,
            research: None,
        }
    }

    /// HTTP adapters for every configured endpoint
    pub fn from_settings(services: &ServiceSettings) -> Result<Self> {
        let endpoint = |url: &str| HttpEndpoint::new(url, services.api_key.clone());

        let tools: Arc<dyn ToolService> = match &services.tool_bridge_url {
            Some(url) => Arc::new(HttpToolService::new(endpoint(url)?)),
            None => {
                tracing::warn!("No tool bridge configured, actions run in dry-run mode");
                Arc::new(DryRunToolService::new())
            }
        };

        let extractor: Option<Arc<dyn ContentExtractor>> = match &services.extractor_url {
            Some(url) => Some(Arc::new(HttpContentExtractor::new(endpoint(url)?))),
            None => None,
        };

        let research: Option<Arc<dyn ResearchGenerator>> = match &services.research_url {
            Some(url) => Some(Arc::new(HttpResearchGenerator::new(endpoint(url)?))),
            None => None,
        };

        Ok(Self {
            tools,
            extractor,
            research,
        })
    }
}

/// Central application state holding all services
pub struct AppState {
    pub app_data_dir: PathBuf,
    pool: SqlitePool,
    repo: Repository,
    entries: EntriesService,
    settings: SettingsService,
    executor: ActionExecutor,
    queue: ProcessingQueue,
    scheduler: SweepScheduler,
    triggers: watch::Sender<TriggerConfiguration>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AppState {
    /// Initialize with the collaborators named in `settings.json`
    pub async fn initialize(app_data_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&app_data_dir)?;
        let settings = SettingsService::new(app_data_dir.clone()).load().await?;
        let collaborators = Collaborators::from_settings(&settings.services)?;
        Self::with_collaborators(app_data_dir, collaborators).await
    }

    /// Initialize with caller-provided collaborators
    pub async fn with_collaborators(
        app_data_dir: PathBuf,
        collaborators: Collaborators,
    ) -> Result<Self> {
        tracing::info!("Initializing application");
        tracing::info!("App data directory: {:?}", app_data_dir);

        std::fs::create_dir_all(&app_data_dir)?;

        let settings_service = SettingsService::new(app_data_dir.clone());
        let settings = settings_service.load().await?;
        let trigger_config = TriggerConfiguration::try_from(&settings.triggers)?;
        let processing = &settings.processing;

        let pool = database::create_pool(&app_data_dir.join(DATABASE_FILE_NAME)).await?;
        let repo = Repository::new(pool.clone());
        let store = Arc::new(repo.clone());

        let ledger = ActionLedger::new(store.clone());
        let executor = ActionExecutor::new(collaborators.tools, ledger)
            .with_timeout(Duration::from_millis(processing.tool_timeout_ms));

        let mut orchestrator = Orchestrator::new(executor.clone()).with_timeouts(
            Duration::from_millis(processing.extraction_timeout_ms),
            Duration::from_millis(processing.research_timeout_ms),
        );
        if let Some(extractor) = collaborators.extractor {
            orchestrator = orchestrator.with_extractor(extractor);
        }
        if let Some(research) = collaborators.research {
            orchestrator = orchestrator.with_research(research);
        }

        let cancel = CancellationToken::new();
        let queue = ProcessingQueue::start(
            Arc::new(orchestrator),
            EntryLocks::new(),
            processing.max_concurrent,
            processing.queue_capacity,
            cancel.child_token(),
        );

        let scheduler = SweepScheduler::new(queue.clone(), store).await?;
        scheduler.start().await?;
        scheduler
            .schedule_sweep(processing.sweep_frequency()?, processing.sweep_enabled)
            .await?;

        let (triggers, _) = watch::channel(trigger_config);

        tracing::info!("Application initialized successfully");

        Ok(Self {
            app_data_dir,
            pool,
            entries: EntriesService::new(repo.clone()),
            repo,
            settings: settings_service,
            executor,
            queue,
            scheduler,
            triggers,
            cancel,
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn entries(&self) -> &EntriesService {
        &self.entries
    }

    pub fn settings(&self) -> &SettingsService {
        &self.settings
    }

    pub fn queue(&self) -> &ProcessingQueue {
        &self.queue
    }

    /// Spawn the trigger monitor on `source` and the sink that turns
    /// captures into queued entries
    pub async fn start_capture(&self, source: &dyn InputSource) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<CaptureResult>();
        let monitor = spawn_monitor(source, self.triggers.subscribe(), tx, self.cancel.child_token())?;

        let entries = self.entries.clone();
        let queue = self.queue.clone();
        let sink = tokio::spawn(async move {
            while let Some(capture) = rx.recv().await {
                let entry = match entries.create_from_capture(&capture).await {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::error!("Failed to store capture: {}", e);
                        continue;
                    }
                };
                if let Err(e) = queue.enqueue(&entry.id).await {
                    tracing::warn!(entry_id = %entry.id, "Entry not queued: {}", e);
                }
            }
            tracing::debug!("Capture sink stopped");
        });

        let mut tasks = self.tasks.lock().await;
        tasks.push(monitor);
        tasks.push(sink);
        Ok(())
    }

    /// Queue every entry the pipeline has never seen
    pub async fn process_backlog(&self) -> Result<SweepReport> {
        self.queue.sweep(&self.repo).await
    }

    /// Undo one executed action
    pub async fn reverse_action(&self, entry_id: &str, action_id: &str) -> Result<AIAction> {
        let _guard = self
            .queue
            .locks()
            .try_acquire(entry_id)
            .ok_or_else(|| AppError::EntryBusy(entry_id.to_string()))?;

        self.executor
            .reverse_action(entry_id, action_id, &self.cancel)
            .await
    }

    /// Run a failed action again, on explicit user request
    pub async fn retry_action(&self, entry_id: &str, action_id: &str) -> Result<AIAction> {
        let _guard = self
            .queue
            .locks()
            .try_acquire(entry_id)
            .ok_or_else(|| AppError::EntryBusy(entry_id.to_string()))?;

        let outcome = self
            .executor
            .execute_action(entry_id, action_id, &self.cancel, true)
            .await?;
        Ok(outcome.action().clone())
    }

    /// Persist new trigger settings and hand them to the monitor.
    /// A capture already in progress finishes under the old configuration.
    pub async fn update_trigger_settings(&self, triggers: TriggerSettings) -> Result<()> {
        let config = self.settings.update_triggers(triggers).await?;
        self.triggers.send_replace(config);
        tracing::info!("Trigger configuration updated");
        Ok(())
    }

    /// Persist processing settings and reschedule the backlog sweep.
    /// Worker count and timeouts apply on the next start.
    pub async fn update_processing_settings(&self, processing: ProcessingSettings) -> Result<()> {
        let frequency = processing.sweep_frequency()?;
        let enabled = processing.sweep_enabled;
        self.settings.update_processing(processing).await?;
        self.scheduler.schedule_sweep(frequency, enabled).await
    }

    pub async fn sweep_scheduled(&self) -> bool {
        self.scheduler.is_scheduled().await
    }

    pub async fn stats(&self) -> ProcessingStats {
        self.queue.stats().await
    }

    pub async fn set_entry_status(&self, entry_id: &str, status: EntryStatus) -> Result<Entry> {
        self.entries.set_status(entry_id, status).await
    }

    /// Cancel everything, stop the scheduler and wait for the workers
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down");
        self.cancel.cancel();

        if let Err(e) = self.scheduler.shutdown().await {
            tracing::error!("Failed to stop scheduler: {}", e);
        }

        self.queue.shutdown().await;

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!("Background task ended abnormally: {}", e);
            }
        }

        self.pool.close().await;
        tracing::info!("Shutdown complete");
    }
}
