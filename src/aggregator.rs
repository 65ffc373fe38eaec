//! Idle aggregation loop.
//!
//! Once per interval every monitor is observed and its absence counter
//! updated. When every counter has reached the threshold the action runs
//! once and all counters start again from zero.

use crate::absence::AbsenceState;
use crate::absence::AbsenceTracker;
use crate::action::ActionError;
use crate::action::ActionSink;
use crate::config::IdleConfig;
use crate::monitor::Monitor;
use crate::monitor::Observation;
use crate::snapshot::ProcessSnapshot;
use crate::snapshot::SnapshotProvider;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

/// Result of one evaluation pass.
#[derive(Debug)]
pub enum TickOutcome {
    /// Nothing is monitored, so nothing can ever fire.
    NoMonitors,
    /// Some monitors have not been absent long enough.
    Waiting { idle: usize, total: usize },
    /// The action was invoked; counters were reset.
    Fired(Result<(), ActionError>),
}

struct Watched {
    monitor: Box<dyn Monitor>,
    tracker: AbsenceTracker,
}

/// Drives monitors and fires the action when all of them are idle.
pub struct IdleAggregator {
    config: IdleConfig,
    watched: Vec<Watched>,
    snapshots: Arc<dyn SnapshotProvider>,
    sink: Arc<dyn ActionSink>,
}

impl IdleAggregator {
    pub fn new(
        config: IdleConfig,
        monitors: Vec<Box<dyn Monitor>>,
        snapshots: Arc<dyn SnapshotProvider>,
        sink: Arc<dyn ActionSink>,
    ) -> Self {
        let watched = monitors
            .into_iter()
            .map(|monitor| Watched {
                monitor,
                tracker: AbsenceTracker::new(),
            })
            .collect();

        Self {
            config,
            watched,
            snapshots,
            sink,
        }
    }

    pub fn config(&self) -> &IdleConfig {
        &self.config
    }

    /// Current absence per monitor, in configuration order.
    pub fn states(&self) -> Vec<(&str, AbsenceState)> {
        self.watched
            .iter()
            .map(|w| (w.monitor.name(), w.tracker.state()))
            .collect()
    }

    /// Absence counters in configuration order.
    pub fn absent_seconds(&self) -> Vec<u64> {
        self.watched
            .iter()
            .map(|w| w.tracker.absent_seconds())
            .collect()
    }

    /// Sleep, evaluate, repeat until `cancel` fires.
    pub async fn run(&mut self, cancel: &CancellationToken) {
        let interval = self.config.interval();
        info!(
            "Idle aggregator started: {} monitors, threshold {}s, sleeping {}s between passes",
            self.watched.len(),
            self.config.threshold_seconds,
            self.config.interval_seconds
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(interval) => {}
            }

            let started = Instant::now();
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = self.tick() => {}
            }

            let elapsed = started.elapsed();
            if elapsed > interval {
                warn!(
                    "Evaluation pass took {:?}, longer than the {:?} interval",
                    elapsed, interval
                );
            }
        }

        info!("Idle aggregator stopped");
    }

    /// Run one evaluation pass.
    pub async fn tick(&mut self) -> TickOutcome {
        let snapshot = self.fetch_snapshot().await;
        let observation = Observation::new(snapshot.as_ref());
        let interval = self.config.interval_seconds;
        let threshold = self.config.threshold_seconds;

        for w in &mut self.watched {
            let name = w.monitor.name();
            let active = match w.monitor.observe(&observation) {
                Ok(active) => active,
                Err(e) => {
                    warn!("Monitor '{}' could not observe, counting as no activity: {}", name, e);
                    false
                }
            };

            match w.tracker.record(active, interval) {
                AbsenceState::Present => {
                    debug!("  [{}] active, reset absent time [0/{}]", name, threshold);
                }
                AbsenceState::Absent(n) => {
                    debug!("  [{}] inactive, absent time [{}/{}]", name, n, threshold);
                }
            }
        }

        if self.watched.is_empty() {
            return TickOutcome::NoMonitors;
        }

        let total = self.watched.len();
        let idle = self
            .watched
            .iter()
            .filter(|w| w.tracker.is_past(threshold))
            .count();

        if idle < total {
            return TickOutcome::Waiting { idle, total };
        }

        TickOutcome::Fired(self.fire().await)
    }

    async fn fetch_snapshot(&self) -> Option<ProcessSnapshot> {
        if !self.watched.iter().any(|w| w.monitor.needs_snapshot()) {
            return None;
        }

        debug!("Examining process table");
        match self.snapshots.snapshot().await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("Failed to read process table: {}", e);
                None
            }
        }
    }

    /// Reset every counter, then invoke the action once.
    async fn fire(&mut self) -> Result<(), ActionError> {
        for w in &mut self.watched {
            w.tracker.reset();
        }

        info!(
            "All {} monitors absent for at least {}s, taking action [{}]",
            self.watched.len(),
            self.config.threshold_seconds,
            self.config.action
        );

        let timeout = self.config.action_timeout;
        let result = match tokio::time::timeout(timeout, self.sink.invoke(&self.config.action)).await
        {
            Ok(result) => result,
            Err(_) => Err(ActionError::TimedOut(timeout)),
        };

        match &result {
            Ok(()) => info!("Action completed"),
            Err(e) => warn!("Action failed, resuming monitoring: {}", e),
        }
        result
    }
}
