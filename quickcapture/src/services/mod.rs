//! Services module
//!
//! The orchestration core and its collaborators, plus the settings,
//! scheduling and entry services that wrap the repository.

pub mod bounded;
pub mod decision;
pub mod entries;
pub mod executor;
pub mod extractor;
pub mod http;
pub mod ledger;
pub mod locks;
pub mod pipeline;
pub mod queue;
pub mod research;
pub mod scheduler;
pub mod settings;
pub mod tools;

pub use decision::{ActionDecisionEngine, Decision};
pub use entries::EntriesService;
pub use executor::{ActionExecutor, ExecutionOutcome};
pub use extractor::{ContentExtractor, ExtractedFields, PatternExtractor};
pub use http::{HttpContentExtractor, HttpEndpoint, HttpResearchGenerator, HttpToolService};
pub use ledger::{ActionLedger, Transition};
pub use locks::{EntryGuard, EntryLocks};
pub use pipeline::{EntryProcessor, Orchestrator, ProcessingReport};
pub use queue::{ProcessingQueue, ProcessingStats, SweepReport};
pub use research::{ResearchGenerator, ResearchOutput};
pub use scheduler::{SweepFrequency, SweepScheduler};
pub use settings::{AppSettings, SettingsService, TriggerSettings};
pub use tools::{DryRunToolService, ToolError, ToolService};
