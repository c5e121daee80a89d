//! In-memory execution bookkeeping: dedup gate and active-set tracking.
//!
//! One tracker instance is owned by the supervisor and shared with every
//! dispatch task. The `seen` set is monotonic for the lifetime of the
//! process; unbounded growth is an accepted trade-off for process-lifetime
//! dedup. The `active` set drives the machine's Busy/Idle transitions, so
//! first/last edge detection must be exact under concurrent mutation.

use std::collections::HashSet;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct TrackerState {
    seen: HashSet<String>,
    active: HashSet<String>,
}

/// Tracks which execution IDs were dispatched and which are running.
#[derive(Debug, Default)]
pub struct ExecutionTracker {
    state: Mutex<TrackerState>,
}

impl ExecutionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if this execution ID was already dispatched by this process.
    pub fn already_dispatched(&self, id: &str) -> bool {
        self.lock().seen.contains(id)
    }

    /// Record an execution ID as dispatched. Idempotent, append-only.
    pub fn mark_dispatched(&self, id: &str) {
        self.lock().seen.insert(id.to_string());
    }

    /// Add an execution to the active set.
    ///
    /// Returns true iff the set was empty immediately before the call,
    /// the signal to flip the machine status to Busy.
    pub fn begin_active(&self, id: &str) -> bool {
        let mut state = self.lock();
        let was_empty = state.active.is_empty();
        state.active.insert(id.to_string());
        was_empty
    }

    /// Remove an execution from the active set.
    ///
    /// Returns true iff the set is empty immediately after the call,
    /// the signal to flip the machine status back to Idle.
    pub fn end_active(&self, id: &str) -> bool {
        let mut state = self.lock();
        state.active.remove(id);
        state.active.is_empty()
    }

    /// Number of currently running executions. Observability only.
    pub fn active_count(&self) -> usize {
        self.lock().active.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        // A poisoned lock means a panic while holding it; the sets are still
        // structurally sound, so recover the guard rather than propagate.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
