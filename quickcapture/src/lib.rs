//! QuickCapture library
//!
//! Trigger detection over a keystroke stream and the autonomous action
//! pipeline that follows each capture. Exposed as a library for the
//! binary and for integration tests.

pub mod app;
pub mod capture;
pub mod config;
pub mod database;
pub mod error;
pub mod services;
