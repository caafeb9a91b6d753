//! Per-entry run locks
//!
//! At most one orchestration run, reversal or retry may hold an entry at a
//! time. Acquisition never waits: a busy entry is reported to the caller.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct EntryLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl EntryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `entry_id`, or `None` if someone already holds it
    pub fn try_acquire(&self, entry_id: &str) -> Option<EntryGuard> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if !held.insert(entry_id.to_string()) {
            return None;
        }
        Some(EntryGuard {
            entry_id: entry_id.to_string(),
            held: self.held.clone(),
        })
    }

    pub fn is_held(&self, entry_id: &str) -> bool {
        self.held
            .lock()
            .map(|held| held.contains(entry_id))
            .unwrap_or(false)
    }

    pub fn held_count(&self) -> usize {
        self.held.lock().map(|held| held.len()).unwrap_or(0)
    }
}

/// Releases the entry when dropped
#[derive(Debug)]
pub struct EntryGuard {
    entry_id: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl Drop for EntryGuard {
    fn drop(&mut self) {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(&self.entry_id);
    }
}
