//! Settings service
//!
//! Manages application settings persistence using JSON file storage.

use crate::capture::{TriggerBinding, TriggerConfiguration};
use crate::config::{
    DEFAULT_EXTRACTION_TIMEOUT_MS, DEFAULT_IDLE_TIMEOUT_MS, DEFAULT_MAX_CONCURRENT,
    DEFAULT_PIECE_TRIGGER, DEFAULT_QUEUE_CAPACITY, DEFAULT_RESEARCH_TIMEOUT_MS,
    DEFAULT_SWEEP_FREQUENCY, DEFAULT_TODO_TRIGGER, DEFAULT_TOOL_TIMEOUT_MS, MAX_CALL_TIMEOUT_MS,
    MAX_CONCURRENT_LIMIT, MAX_IDLE_TIMEOUT_MS, MIN_CALL_TIMEOUT_MS, MIN_IDLE_TIMEOUT_MS,
};
use crate::database::EntryType;
use crate::error::{AppError, Result};
use crate::services::SweepFrequency;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

/// One trigger string and the entry type it creates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerBindingSettings {
    pub trigger: String,
    pub entry_type: EntryType,
}

/// Capture trigger configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSettings {
    #[serde(default = "default_bindings")]
    pub bindings: Vec<TriggerBindingSettings>,
    /// Explicit terminator character (None = Enter / idle timeout only)
    #[serde(default)]
    pub terminator: Option<char>,
    #[serde(default = "default_true")]
    pub confirm_on_enter: bool,
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

fn default_bindings() -> Vec<TriggerBindingSettings> {
    vec![
        TriggerBindingSettings {
            trigger: DEFAULT_TODO_TRIGGER.to_string(),
            entry_type: EntryType::Todo,
        },
        TriggerBindingSettings {
            trigger: DEFAULT_PIECE_TRIGGER.to_string(),
            entry_type: EntryType::Piece,
        },
    ]
}

fn default_true() -> bool {
    true
}

fn default_idle_timeout_ms() -> u64 {
    DEFAULT_IDLE_TIMEOUT_MS
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            bindings: default_bindings(),
            terminator: None,
            confirm_on_enter: true,
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

impl TryFrom<&TriggerSettings> for TriggerConfiguration {
    type Error = AppError;

    fn try_from(settings: &TriggerSettings) -> Result<Self> {
        if !(MIN_IDLE_TIMEOUT_MS..=MAX_IDLE_TIMEOUT_MS).contains(&settings.idle_timeout_ms) {
            return Err(AppError::InvalidSettings(format!(
                "Idle timeout must be between {}ms and {}ms",
                MIN_IDLE_TIMEOUT_MS, MAX_IDLE_TIMEOUT_MS
            )));
        }

        let config = TriggerConfiguration {
            bindings: settings
                .bindings
                .iter()
                .map(|b| TriggerBinding {
                    trigger: b.trigger.clone(),
                    entry_type: b.entry_type,
                })
                .collect(),
            terminator: settings.terminator,
            confirm_on_enter: settings.confirm_on_enter,
            idle_timeout: Duration::from_millis(settings.idle_timeout_ms),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Worker pool, timeouts and scheduled sweeps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingSettings {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_extraction_timeout_ms")]
    pub extraction_timeout_ms: u64,
    #[serde(default = "default_tool_timeout_ms")]
    pub tool_timeout_ms: u64,
    #[serde(default = "default_research_timeout_ms")]
    pub research_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub sweep_enabled: bool,
    #[serde(default = "default_sweep_frequency")]
    pub sweep_frequency: String, // "15m", "1h", "daily", ...
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_extraction_timeout_ms() -> u64 {
    DEFAULT_EXTRACTION_TIMEOUT_MS
}

fn default_tool_timeout_ms() -> u64 {
    DEFAULT_TOOL_TIMEOUT_MS
}

fn default_research_timeout_ms() -> u64 {
    DEFAULT_RESEARCH_TIMEOUT_MS
}

fn default_sweep_frequency() -> String {
    DEFAULT_SWEEP_FREQUENCY.to_string()
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            queue_capacity: default_queue_capacity(),
            extraction_timeout_ms: default_extraction_timeout_ms(),
            tool_timeout_ms: default_tool_timeout_ms(),
            research_timeout_ms: default_research_timeout_ms(),
            sweep_enabled: true,
            sweep_frequency: default_sweep_frequency(),
        }
    }
}

impl ProcessingSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 || self.max_concurrent > MAX_CONCURRENT_LIMIT {
            return Err(AppError::InvalidSettings(format!(
                "max_concurrent must be between 1 and {}",
                MAX_CONCURRENT_LIMIT
            )));
        }
        if self.queue_capacity == 0 {
            return Err(AppError::InvalidSettings(
                "queue_capacity must be greater than 0".to_string(),
            ));
        }

        let timeouts = [
            ("extraction_timeout_ms", self.extraction_timeout_ms),
            ("tool_timeout_ms", self.tool_timeout_ms),
            ("research_timeout_ms", self.research_timeout_ms),
        ];
        for (name, value) in timeouts {
            if !(MIN_CALL_TIMEOUT_MS..=MAX_CALL_TIMEOUT_MS).contains(&value) {
                return Err(AppError::InvalidSettings(format!(
                    "{} must be between {}ms and {}ms",
                    name, MIN_CALL_TIMEOUT_MS, MAX_CALL_TIMEOUT_MS
                )));
            }
        }

        self.sweep_frequency()?;
        Ok(())
    }

    pub fn sweep_frequency(&self) -> Result<SweepFrequency> {
        self.sweep_frequency
            .parse()
            .map_err(|e: String| AppError::InvalidSettings(e))
    }
}

/// Endpoints of the external collaborators. Unset means local fallback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceSettings {
    #[serde(default)]
    pub extractor_url: Option<String>,
    #[serde(default)]
    pub research_url: Option<String>,
    #[serde(default)]
    pub tool_bridge_url: Option<String>,
    /// Sent as a bearer token to every endpoint
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AppSettings {
    #[serde(default)]
    pub triggers: TriggerSettings,
    #[serde(default)]
    pub processing: ProcessingSettings,
    #[serde(default)]
    pub services: ServiceSettings,
}

impl AppSettings {
    pub fn validate(&self) -> Result<()> {
        TriggerConfiguration::try_from(&self.triggers)?;
        self.processing.validate()
    }
}

/// Service for managing application settings
#[derive(Clone)]
pub struct SettingsService {
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new(app_data_dir: PathBuf) -> Self {
        Self {
            settings_path: app_data_dir.join("settings.json"),
        }
    }

    /// Load settings from disk or create default if not exists
    pub async fn load(&self) -> Result<AppSettings> {
        if !self.settings_path.exists() {
            tracing::info!("Settings file not found, creating default settings");
            let default = AppSettings::default();
            self.save(&default).await?;
            return Ok(default);
        }

        let content = fs::read_to_string(&self.settings_path).await?;
        let settings: AppSettings = serde_json::from_str(&content)
            .map_err(|e| AppError::InvalidSettings(format!("Failed to parse settings: {}", e)))?;
        settings.validate()?;

        Ok(settings)
    }

    /// Save settings to disk
    pub async fn save(&self, settings: &AppSettings) -> Result<()> {
        settings.validate()?;
        let content = serde_json::to_string_pretty(settings)?;

        fs::write(&self.settings_path, content).await?;
        tracing::info!("Settings saved to {:?}", self.settings_path);

        Ok(())
    }

    pub async fn get_triggers(&self) -> Result<TriggerSettings> {
        let settings = self.load().await?;
        Ok(settings.triggers)
    }

    /// Update trigger settings and return the configuration to hand the monitor
    pub async fn update_triggers(&self, triggers: TriggerSettings) -> Result<TriggerConfiguration> {
        let config = TriggerConfiguration::try_from(&triggers)?;
        let mut settings = self.load().await?;
        settings.triggers = triggers;
        self.save(&settings).await?;
        Ok(config)
    }

    pub async fn get_processing(&self) -> Result<ProcessingSettings> {
        let settings = self.load().await?;
        Ok(settings.processing)
    }

    /// Worker count and timeouts take effect on next start
    pub async fn update_processing(&self, processing: ProcessingSettings) -> Result<()> {
        processing.validate()?;
        let mut settings = self.load().await?;
        settings.processing = processing;
        self.save(&settings).await?;
        Ok(())
    }
}
