//! Application configuration constants
//!
//! Central location for all configuration constants, resource limits,
//! and validation boundaries used throughout the application.

// ===== Trigger Defaults =====

/// Default trigger for todo entries
pub const DEFAULT_TODO_TRIGGER: &str = "///";

/// Default trigger for piece entries
pub const DEFAULT_PIECE_TRIGGER: &str = ",,,";

/// Idle time after the last keystroke before a capture finalizes
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 3_000;

/// Minimum idle timeout. Shorter values finalize mid-word.
pub const MIN_IDLE_TIMEOUT_MS: u64 = 250;

/// Maximum idle timeout (2 minutes)
pub const MAX_IDLE_TIMEOUT_MS: u64 = 120_000;

/// Maximum length of a single trigger string, in characters
pub const MAX_TRIGGER_LENGTH: usize = 8;

// ===== Processing Limits =====

/// Default number of entries orchestrated in parallel.
/// Bounds cost and rate against the external AI services.
pub const DEFAULT_MAX_CONCURRENT: usize = 5;

/// Upper bound for the worker pool size
pub const MAX_CONCURRENT_LIMIT: usize = 32;

/// Default capacity of the pending entry channel
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Default timeout for a content extraction call
pub const DEFAULT_EXTRACTION_TIMEOUT_MS: u64 = 15_000;

/// Default timeout for a single tool service call
pub const DEFAULT_TOOL_TIMEOUT_MS: u64 = 10_000;

/// Default timeout for research generation (slowest collaborator)
pub const DEFAULT_RESEARCH_TIMEOUT_MS: u64 = 60_000;

/// Minimum timeout accepted for any external call
pub const MIN_CALL_TIMEOUT_MS: u64 = 100;

/// Maximum timeout accepted for any external call (10 minutes)
pub const MAX_CALL_TIMEOUT_MS: u64 = 600_000;

/// Default sweep frequency for entries missing AI metadata
pub const DEFAULT_SWEEP_FREQUENCY: &str = "15m";

// ===== Action Defaults =====

/// Duration of calendar events created from a resolved date
pub const DEFAULT_EVENT_DURATION_MINUTES: i64 = 60;

/// Hour of day used when only a date (no time) was resolved
pub const DEFAULT_DUE_HOUR: u32 = 9;

/// Hour of day used for "tonight"
pub const TONIGHT_HOUR: u32 = 20;

// ===== Storage =====

/// File name of the SQLite database inside the data directory
pub const DATABASE_FILE_NAME: &str = "quickcapture.db";

/// Environment variable overriding the data directory
pub const DATA_DIR_ENV: &str = "QUICKCAPTURE_DATA_DIR";

/// Data directory used when the environment variable is unset
pub const DEFAULT_DATA_DIR: &str = "quickcapture-data";
