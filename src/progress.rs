//! Progress reporting for the per-user segmentation passes.
//!
//! Progress is emitted from rayon worker threads when the `parallel` feature
//! is on, so implementations must be `Send + Sync`. Reporting never affects
//! the generated tables.

use log::info;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// Segmentation passes, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Sliding-window staypoint detection
    Staypoints,
    /// Tripleg segmentation between staypoints
    Triplegs,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Staypoints => "staypoints",
            Phase::Triplegs => "triplegs",
        }
    }

    /// Human-readable label used in progress logs.
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Staypoints => "User staypoint generation",
            Phase::Triplegs => "User tripleg generation",
        }
    }
}

/// Receives phase transitions and one tick per processed user.
pub trait ProgressCallback: Send + Sync {
    /// Called when a pass starts. `total` is the number of users.
    fn on_phase(&self, phase: Phase, total: u32);
    /// Called after one user has been processed.
    fn on_progress(&self);
}

/// Discards all progress.
pub struct NoopProgress;

impl ProgressCallback for NoopProgress {
    fn on_phase(&self, _phase: Phase, _total: u32) {}
    fn on_progress(&self) {}
}

/// Atomic tracker that can be polled from another thread.
pub struct AtomicProgressTracker {
    pub phase: Mutex<String>,
    pub completed: AtomicU32,
    pub total: AtomicU32,
}

impl Default for AtomicProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl AtomicProgressTracker {
    pub fn new() -> Self {
        Self {
            phase: Mutex::new(String::new()),
            completed: AtomicU32::new(0),
            total: AtomicU32::new(0),
        }
    }
}

impl ProgressCallback for AtomicProgressTracker {
    fn on_phase(&self, phase: Phase, total: u32) {
        if let Ok(mut current) = self.phase.lock() {
            *current = phase.as_str().to_string();
        }
        self.completed.store(0, Ordering::SeqCst);
        self.total.store(total, Ordering::SeqCst);
    }

    fn on_progress(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Logs per-user progress at `info` level. Backs the `print_progress` option.
pub struct LogProgress {
    tracker: AtomicProgressTracker,
    label: Mutex<&'static str>,
}

impl Default for LogProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl LogProgress {
    pub fn new() -> Self {
        Self {
            tracker: AtomicProgressTracker::new(),
            label: Mutex::new(""),
        }
    }
}

impl ProgressCallback for LogProgress {
    fn on_phase(&self, phase: Phase, total: u32) {
        if let Ok(mut label) = self.label.lock() {
            *label = phase.label();
        }
        self.tracker.on_phase(phase, total);
        info!("{}: {} users", phase.label(), total);
    }

    fn on_progress(&self) {
        let done = self.tracker.completed.fetch_add(1, Ordering::SeqCst) + 1;
        let total = self.tracker.total.load(Ordering::SeqCst);
        let label = self.label.lock().map(|l| *l).unwrap_or("");
        info!("{}: {}/{}", label, done, total);
    }
}
