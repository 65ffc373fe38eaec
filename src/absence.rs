//! Per-monitor absence tracking.
//!
//! Each monitor carries a counter of consecutive seconds without activity:
//! - Activity observed: the counter resets to zero
//! - No activity: the counter grows by one interval

/// Observable state of a single tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbsenceState {
    /// Activity was seen on the last pass (or nothing has been recorded yet).
    Present,
    /// No activity for this many seconds.
    Absent(u64),
}

/// Absence counter for one monitor.
#[derive(Debug, Default, Clone)]
pub struct AbsenceTracker {
    absent_seconds: u64,
}

impl AbsenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one pass worth of observation.
    pub fn record(&mut self, active: bool, interval_seconds: u64) -> AbsenceState {
        if active {
            self.absent_seconds = 0;
        } else {
            self.absent_seconds = self.absent_seconds.saturating_add(interval_seconds);
        }
        self.state()
    }

    /// Forget accumulated absence.
    pub fn reset(&mut self) {
        self.absent_seconds = 0;
    }

    pub fn absent_seconds(&self) -> u64 {
        self.absent_seconds
    }

    pub fn state(&self) -> AbsenceState {
        match self.absent_seconds {
            0 => AbsenceState::Present,
            n => AbsenceState::Absent(n),
        }
    }

    /// Whether this monitor has been gone for at least `threshold_seconds`.
    pub fn is_past(&self, threshold_seconds: u64) -> bool {
        self.absent_seconds > 0 && self.absent_seconds >= threshold_seconds
    }
}
