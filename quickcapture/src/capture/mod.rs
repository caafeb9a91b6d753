//! Capture module
//!
//! Turns a raw keystroke stream into discrete `CaptureResult` events:
//! - `input`: the `InputSource` capability and bundled sources
//! - `trigger`: trigger configuration and the rolling suffix matcher
//! - `monitor`: the capture state machine and its async driver

pub mod input;
pub mod monitor;
pub mod trigger;

pub use input::{ChannelInputSource, InputSource, Key, KeyEvent, SourceContext, StdinInputSource};
pub use monitor::{spawn_monitor, CaptureResult, FinalizeReason, MonitorState, TriggerMonitor};
pub use trigger::{TriggerBinding, TriggerConfiguration};
