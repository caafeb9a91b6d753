//! Trigger configuration and suffix matching
//!
//! `TriggerMatcher` owns the rolling pre-trigger buffer. The buffer never
//! holds more characters than the longest configured trigger, so old
//! keystrokes fall off the front as new ones arrive.

use crate::config::{DEFAULT_IDLE_TIMEOUT_MS, MAX_TRIGGER_LENGTH};
use crate::database::EntryType;
use crate::error::{AppError, Result};
use std::collections::{HashSet, VecDeque};
use std::time::Duration;

/// One configured trigger string and the entry type it produces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerBinding {
    pub trigger: String,
    pub entry_type: EntryType,
}

/// Read-only input to the monitor
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerConfiguration {
    pub bindings: Vec<TriggerBinding>,
    /// Explicit terminator character, stripped from the captured content
    pub terminator: Option<char>,
    /// Whether Enter finalizes a capture (otherwise it is captured as a newline)
    pub confirm_on_enter: bool,
    pub idle_timeout: Duration,
}

impl Default for TriggerConfiguration {
    fn default() -> Self {
        Self {
            bindings: vec![
                TriggerBinding {
                    trigger: crate::config::DEFAULT_TODO_TRIGGER.to_string(),
                    entry_type: EntryType::Todo,
                },
                TriggerBinding {
                    trigger: crate::config::DEFAULT_PIECE_TRIGGER.to_string(),
                    entry_type: EntryType::Piece,
                },
            ],
            terminator: None,
            confirm_on_enter: true,
            idle_timeout: Duration::from_millis(DEFAULT_IDLE_TIMEOUT_MS),
        }
    }
}

impl TriggerConfiguration {
    pub fn validate(&self) -> Result<()> {
        if self.bindings.is_empty() {
            return Err(AppError::InvalidSettings(
                "At least one trigger must be configured".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for binding in &self.bindings {
            let len = binding.trigger.chars().count();
            if len == 0 || len > MAX_TRIGGER_LENGTH {
                return Err(AppError::InvalidSettings(format!(
                    "Trigger '{}' must be 1-{} characters",
                    binding.trigger, MAX_TRIGGER_LENGTH
                )));
            }
            if binding.trigger.chars().any(char::is_whitespace) {
                return Err(AppError::InvalidSettings(format!(
                    "Trigger '{}' must not contain whitespace",
                    binding.trigger
                )));
            }
            if !seen.insert(binding.trigger.as_str()) {
                return Err(AppError::InvalidSettings(format!(
                    "Trigger '{}' is configured twice",
                    binding.trigger
                )));
            }
            if let Some(term) = self.terminator {
                if binding.trigger.contains(term) {
                    return Err(AppError::InvalidSettings(format!(
                        "Terminator '{}' appears inside trigger '{}'",
                        term, binding.trigger
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn longest_trigger_len(&self) -> usize {
        self.bindings
            .iter()
            .map(|b| b.trigger.chars().count())
            .max()
            .unwrap_or(0)
    }
}

/// Result of feeding one character to the matcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchProgress {
    /// No trigger is in progress
    None,
    /// The buffer tail is a proper prefix of a trigger, `depth` characters long
    Partial { depth: usize },
    /// A trigger matched and no longer trigger can extend it
    Complete(TriggerBinding),
    /// A trigger matched but a longer trigger could still match
    Ambiguous { matched: TriggerBinding, depth: usize },
}

struct CompiledTrigger {
    chars: Vec<char>,
    binding: TriggerBinding,
}

pub struct TriggerMatcher {
    /// Sorted longest first so the first exact hit is the longest one
    triggers: Vec<CompiledTrigger>,
    buffer: VecDeque<char>,
    capacity: usize,
}

impl TriggerMatcher {
    pub fn new(config: &TriggerConfiguration) -> Self {
        let mut triggers: Vec<CompiledTrigger> = config
            .bindings
            .iter()
            .map(|b| CompiledTrigger {
                chars: b.trigger.chars().collect(),
                binding: b.clone(),
            })
            .collect();
        triggers.sort_by(|a, b| b.chars.len().cmp(&a.chars.len()));

        let capacity = config.longest_trigger_len().max(1);
        Self {
            triggers,
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, c: char) -> MatchProgress {
        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(c);
        self.evaluate()
    }

    pub fn pop(&mut self) {
        self.buffer.pop_back();
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn evaluate(&self) -> MatchProgress {
        let exact = self
            .triggers
            .iter()
            .find(|t| self.ends_with(&t.chars))
            .map(|t| &t.binding);
        let exact_len = exact.map(|b| b.trigger.chars().count()).unwrap_or(0);

        // Deepest buffer suffix that is a proper prefix of a longer trigger.
        // It must cover the exact match, otherwise the longer trigger would
        // not actually extend it.
        let depth = self
            .triggers
            .iter()
            .filter(|t| t.chars.len() > exact_len)
            .filter_map(|t| {
                let max_k = (t.chars.len() - 1).min(self.buffer.len());
                (exact_len.max(1)..=max_k)
                    .rev()
                    .find(|&k| self.ends_with(&t.chars[..k]))
            })
            .max();

        match (exact, depth) {
            (Some(binding), None) => MatchProgress::Complete(binding.clone()),
            (Some(binding), Some(depth)) => MatchProgress::Ambiguous {
                matched: binding.clone(),
                depth,
            },
            (None, Some(depth)) => MatchProgress::Partial { depth },
            (None, None) => MatchProgress::None,
        }
    }

    fn ends_with(&self, pattern: &[char]) -> bool {
        if pattern.len() > self.buffer.len() {
            return false;
        }
        self.buffer
            .iter()
            .skip(self.buffer.len() - pattern.len())
            .zip(pattern)
            .all(|(a, b)| a == b)
    }
}
