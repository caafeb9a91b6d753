//! Keystroke input sources
//!
//! The monitor never talks to a platform hook directly. Anything that can
//! produce a stream of `KeyEvent`s implements `InputSource`.

use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Application the keystrokes were typed into
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceContext {
    pub app_name: String,
    pub url: Option<String>,
}

impl SourceContext {
    pub fn app(name: impl Into<String>) -> Self {
        Self {
            app_name: name.into(),
            url: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Enter,
    Backspace,
    Escape,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyEvent {
    pub key: Key,
    pub at: DateTime<Utc>,
    pub context: SourceContext,
}

impl KeyEvent {
    pub fn new(key: Key, at: DateTime<Utc>, context: SourceContext) -> Self {
        Self { key, at, context }
    }

    pub fn now(key: Key, context: SourceContext) -> Self {
        Self::new(key, Utc::now(), context)
    }
}

/// Capability interface over a platform keystroke hook
pub trait InputSource: Send + Sync {
    /// Start delivering events. A source can be subscribed once.
    fn subscribe(&self) -> Result<mpsc::Receiver<KeyEvent>>;
}

/// Source fed from an in-process channel, for embedding and tests
pub struct ChannelInputSource {
    receiver: Mutex<Option<mpsc::Receiver<KeyEvent>>>,
}

impl ChannelInputSource {
    pub fn new(capacity: usize) -> (Self, mpsc::Sender<KeyEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                receiver: Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

impl InputSource for ChannelInputSource {
    fn subscribe(&self) -> Result<mpsc::Receiver<KeyEvent>> {
        self.receiver
            .lock()
            .map_err(|_| AppError::Input("input source lock poisoned".to_string()))?
            .take()
            .ok_or_else(|| AppError::Input("input source already subscribed".to_string()))
    }
}

/// Reads lines from stdin and replays them as keystrokes followed by Enter
pub struct StdinInputSource {
    context: SourceContext,
}

impl StdinInputSource {
    pub fn new() -> Self {
        Self {
            context: SourceContext::app("terminal"),
        }
    }
}

impl Default for StdinInputSource {
    fn default() -> Self {
        Self::new()
    }
}

impl InputSource for StdinInputSource {
    fn subscribe(&self) -> Result<mpsc::Receiver<KeyEvent>> {
        let (tx, rx) = mpsc::channel(1024);
        let context = self.context.clone();

        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!("Failed to read stdin: {}", e);
                        break;
                    }
                };

                let keys = line.chars().map(Key::Char).chain(std::iter::once(Key::Enter));
                for key in keys {
                    if tx.send(KeyEvent::now(key, context.clone())).await.is_err() {
                        return;
                    }
                }
            }
            tracing::info!("Stdin input closed");
        });

        Ok(rx)
    }
}
