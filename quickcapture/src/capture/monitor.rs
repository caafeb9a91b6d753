//! Capture state machine
//!
//! `TriggerMonitor` is a pure state machine: it is fed key events and clock
//! ticks and returns finished captures. `spawn_monitor` drives it from an
//! `InputSource` on a dedicated task and hands results off through an
//! unbounded channel so the keystroke producer is never blocked.

use super::input::{InputSource, Key, KeyEvent, SourceContext};
use super::trigger::{MatchProgress, TriggerBinding, TriggerConfiguration, TriggerMatcher};
use crate::database::EntryType;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Observable state of the monitor. Finalizing happens inside a single
/// call and is never observed between events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Matching,
    Capturing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeReason {
    Terminator,
    Enter,
    IdleTimeout,
    InputClosed,
}

/// A finished capture, consumed once to build an entry
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureResult {
    pub trigger: String,
    pub entry_type: EntryType,
    pub content: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub context: SourceContext,
    pub reason: FinalizeReason,
}

#[derive(Debug)]
struct ActiveCapture {
    binding: TriggerBinding,
    content: String,
    started_at: DateTime<Utc>,
    last_key_at: DateTime<Utc>,
    context: SourceContext,
}

#[derive(Debug)]
enum Phase {
    Idle,
    /// The buffer tail is a trigger prefix. `candidate` is a shorter trigger
    /// that already matched and wins if the longer one does not complete;
    /// `overflow` holds what was typed after it and becomes content then.
    Matching {
        candidate: Option<TriggerBinding>,
        depth: usize,
        overflow: String,
        last_key_at: DateTime<Utc>,
    },
    Capturing(ActiveCapture),
}

pub struct TriggerMonitor {
    config: TriggerConfiguration,
    pending_config: Option<TriggerConfiguration>,
    matcher: TriggerMatcher,
    phase: Phase,
}

impl TriggerMonitor {
    pub fn new(config: TriggerConfiguration) -> Self {
        let matcher = TriggerMatcher::new(&config);
        Self {
            config,
            pending_config: None,
            matcher,
            phase: Phase::Idle,
        }
    }

    pub fn state(&self) -> MonitorState {
        match self.phase {
            Phase::Idle => MonitorState::Idle,
            Phase::Matching { .. } => MonitorState::Matching,
            Phase::Capturing(_) => MonitorState::Capturing,
        }
    }

    pub fn configuration(&self) -> &TriggerConfiguration {
        &self.config
    }

    /// Swap the configuration. Deferred until the current capture ends.
    pub fn set_configuration(&mut self, config: TriggerConfiguration) {
        if matches!(self.phase, Phase::Capturing(_)) {
            tracing::debug!("Deferring trigger configuration until capture completes");
            self.pending_config = Some(config);
        } else {
            self.apply_configuration(config);
        }
    }

    fn apply_configuration(&mut self, config: TriggerConfiguration) {
        self.matcher = TriggerMatcher::new(&config);
        self.config = config;
        self.phase = Phase::Idle;
        tracing::info!(
            triggers = self.config.bindings.len(),
            "Trigger configuration applied"
        );
    }

    /// When the pending capture or candidate will expire, if any
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        let timeout = chrono::Duration::from_std(self.config.idle_timeout).ok()?;
        match &self.phase {
            Phase::Idle => None,
            Phase::Matching {
                candidate: Some(_),
                last_key_at,
                ..
            } => Some(*last_key_at + timeout),
            Phase::Matching { candidate: None, .. } => None,
            Phase::Capturing(capture) => Some(capture.last_key_at + timeout),
        }
    }

    /// Feed one key event
    pub fn on_key(&mut self, event: KeyEvent) -> Option<CaptureResult> {
        // A late event can arrive after the idle deadline passed unobserved.
        if let Some(expired) = self.on_tick(event.at) {
            self.handle_key(event);
            return Some(expired);
        }
        self.handle_key(event)
    }

    /// Check the idle timer against `now`
    pub fn on_tick(&mut self, now: DateTime<Utc>) -> Option<CaptureResult> {
        let deadline = self.next_deadline()?;
        if now < deadline {
            return None;
        }

        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Capturing(capture) => self.finalize(capture, FinalizeReason::IdleTimeout, now),
            Phase::Matching {
                candidate: Some(binding),
                overflow,
                ..
            } => {
                // The user paused right after a shorter trigger; commit it.
                self.begin_capture(binding, now, SourceContext::default(), overflow);
                None
            }
            other => {
                self.phase = other;
                None
            }
        }
    }

    /// Flush an in-progress capture, e.g. when the input stream ends
    pub fn flush(&mut self, now: DateTime<Utc>) -> Option<CaptureResult> {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Capturing(capture) => self.finalize(capture, FinalizeReason::InputClosed, now),
            _ => {
                self.matcher.clear();
                None
            }
        }
    }

    fn handle_key(&mut self, event: KeyEvent) -> Option<CaptureResult> {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Capturing(capture) => self.capture_key(capture, event),
            Phase::Matching {
                candidate,
                depth,
                overflow,
                ..
            } => self.matching_key(candidate, depth, overflow, event),
            Phase::Idle => {
                self.idle_key(event);
                None
            }
        }
    }

    fn idle_key(&mut self, event: KeyEvent) {
        match event.key {
            Key::Char(c) => {
                let progress = self.matcher.push(c);
                self.advance(progress, event);
            }
            Key::Backspace => self.matcher.pop(),
            Key::Enter | Key::Escape => self.matcher.clear(),
        }
    }

    fn matching_key(
        &mut self,
        candidate: Option<TriggerBinding>,
        depth: usize,
        mut overflow: String,
        event: KeyEvent,
    ) -> Option<CaptureResult> {
        let Some(binding) = candidate else {
            // Nothing committed yet, behave exactly like Idle.
            self.idle_key(event);
            return None;
        };

        match event.key {
            Key::Char(c) => {
                let progress = self.matcher.push(c);
                // Still on the way to a longer trigger than the candidate
                let candidate_len = binding.trigger.chars().count();
                let extended = match &progress {
                    MatchProgress::Partial { depth: next } if *next > depth => Some(*next),
                    MatchProgress::Ambiguous {
                        matched,
                        depth: next,
                    } if *next > depth && matched.trigger.chars().count() <= candidate_len => {
                        Some(*next)
                    }
                    _ => None,
                };
                if let Some(next) = extended {
                    overflow.push(c);
                    self.phase = Phase::Matching {
                        candidate: Some(binding),
                        depth: next,
                        overflow,
                        last_key_at: event.at,
                    };
                    return None;
                }

                match progress {
                    MatchProgress::Complete(_) | MatchProgress::Ambiguous { .. } => {
                        self.advance(progress, event);
                        None
                    }
                    // The longer trigger did not materialize.
                    _ => self.commit_candidate(binding, overflow, event),
                }
            }
            Key::Backspace => {
                self.matcher.pop();
                if overflow.pop().is_some() {
                    self.phase = Phase::Matching {
                        candidate: Some(binding),
                        depth: depth.saturating_sub(1),
                        overflow,
                        last_key_at: event.at,
                    };
                }
                None
            }
            Key::Enter if !overflow.is_empty() => self.commit_candidate(binding, overflow, event),
            // Committing here would only produce an empty capture.
            Key::Escape | Key::Enter => {
                self.matcher.clear();
                None
            }
        }
    }

    /// Start capturing under `binding`; `overflow` and then `event` become content
    fn commit_candidate(
        &mut self,
        binding: TriggerBinding,
        overflow: String,
        event: KeyEvent,
    ) -> Option<CaptureResult> {
        let context = event.context.clone();
        self.begin_capture(binding, event.at, context, overflow);
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Capturing(capture) => self.capture_key(capture, event),
            other => {
                self.phase = other;
                None
            }
        }
    }

    fn advance(&mut self, progress: MatchProgress, event: KeyEvent) {
        match progress {
            MatchProgress::Complete(binding) => {
                self.begin_capture(binding, event.at, event.context, String::new());
            }
            MatchProgress::Ambiguous { matched, depth } => {
                self.phase = Phase::Matching {
                    candidate: Some(matched),
                    depth,
                    overflow: String::new(),
                    last_key_at: event.at,
                };
            }
            MatchProgress::Partial { depth } => {
                self.phase = Phase::Matching {
                    candidate: None,
                    depth,
                    overflow: String::new(),
                    last_key_at: event.at,
                };
            }
            MatchProgress::None => self.phase = Phase::Idle,
        }
    }

    fn begin_capture(
        &mut self,
        binding: TriggerBinding,
        at: DateTime<Utc>,
        context: SourceContext,
        content: String,
    ) {
        tracing::debug!(trigger = %binding.trigger, "Capture started");
        self.matcher.clear();
        self.phase = Phase::Capturing(ActiveCapture {
            binding,
            content,
            started_at: at,
            last_key_at: at,
            context,
        });
    }

    fn capture_key(&mut self, mut capture: ActiveCapture, event: KeyEvent) -> Option<CaptureResult> {
        match event.key {
            Key::Char(c) if Some(c) == self.config.terminator => {
                return self.finalize(capture, FinalizeReason::Terminator, event.at);
            }
            Key::Char(c) => capture.content.push(c),
            Key::Enter if self.config.confirm_on_enter => {
                return self.finalize(capture, FinalizeReason::Enter, event.at);
            }
            Key::Enter => capture.content.push('\n'),
            Key::Backspace => {
                capture.content.pop();
            }
            Key::Escape => {
                tracing::debug!(trigger = %capture.binding.trigger, "Capture abandoned");
                self.reset();
                return None;
            }
        }

        if capture.context.app_name.is_empty() {
            capture.context = event.context;
        }
        capture.last_key_at = event.at;
        self.phase = Phase::Capturing(capture);
        None
    }

    fn finalize(
        &mut self,
        capture: ActiveCapture,
        reason: FinalizeReason,
        at: DateTime<Utc>,
    ) -> Option<CaptureResult> {
        self.reset();

        let content = capture.content.trim();
        if content.is_empty() {
            tracing::debug!(trigger = %capture.binding.trigger, "Discarding empty capture");
            return None;
        }

        tracing::info!(
            trigger = %capture.binding.trigger,
            entry_type = %capture.binding.entry_type,
            ?reason,
            "Capture finalized"
        );

        Some(CaptureResult {
            trigger: capture.binding.trigger,
            entry_type: capture.binding.entry_type,
            content: content.to_string(),
            started_at: capture.started_at,
            ended_at: at,
            context: capture.context,
            reason,
        })
    }

    fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.matcher.clear();
        if let Some(config) = self.pending_config.take() {
            self.apply_configuration(config);
        }
    }
}

/// Run the monitor against `source` until cancelled or the input closes.
pub fn spawn_monitor(
    source: &dyn InputSource,
    mut config: watch::Receiver<TriggerConfiguration>,
    sink: mpsc::UnboundedSender<CaptureResult>,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>> {
    let mut events = source.subscribe()?;
    let mut monitor = TriggerMonitor::new(config.borrow_and_update().clone());

    let handle = tokio::spawn(async move {
        tracing::info!("Trigger monitor started");
        let mut config_open = true;

        loop {
            let sleep = sleep_until(monitor.next_deadline());

            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                changed = config.changed(), if config_open => {
                    match changed {
                        Ok(()) => monitor.set_configuration(config.borrow_and_update().clone()),
                        Err(_) => config_open = false,
                    }
                    None
                }
                event = events.recv() => match event {
                    Some(event) => monitor.on_key(event),
                    None => {
                        if let Some(capture) = monitor.flush(Utc::now()) {
                            let _ = sink.send(capture);
                        }
                        break;
                    }
                },
                _ = sleep => monitor.on_tick(Utc::now()),
            };

            if let Some(capture) = result {
                if sink.send(capture).is_err() {
                    tracing::warn!("Capture sink closed; stopping trigger monitor");
                    break;
                }
            }
        }

        tracing::info!("Trigger monitor stopped");
    });

    Ok(handle)
}

async fn sleep_until(deadline: Option<DateTime<Utc>>) {
    match deadline {
        Some(deadline) => {
            let remaining = (deadline - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(remaining).await;
        }
        None => std::future::pending::<()>().await,
    }
}
