//! Process table monitor.

use super::Monitor;
use super::MonitorError;
use super::Observation;
use super::ObserveError;
use crate::snapshot::ProcessSnapshot;
use regex::Regex;
use tracing::debug;

/// Reports activity while any process command line matches a pattern.
#[derive(Debug, Clone)]
pub struct PollingMonitor {
    name: String,
    pattern: Regex,
}

impl PollingMonitor {
    /// Compile `pattern`; it matches anywhere in a command line.
    pub fn new(name: impl Into<String>, pattern: &str) -> Result<Self, MonitorError> {
        let name = name.into();
        let pattern = Regex::new(pattern).map_err(|source| MonitorError::InvalidPattern {
            name: name.clone(),
            source,
        })?;
        Ok(Self { name, pattern })
    }

    /// True iff at least one line of `snapshot` matches.
    pub fn matches(&self, snapshot: &ProcessSnapshot) -> bool {
        snapshot.lines().iter().any(|line| self.pattern.is_match(line))
    }
}

impl Monitor for PollingMonitor {
    fn name(&self) -> &str {
        &self.name
    }

    fn needs_snapshot(&self) -> bool {
        true
    }

    fn observe(&self, observation: &Observation<'_>) -> Result<bool, ObserveError> {
        let snapshot = observation
            .snapshot()
            .ok_or(ObserveError::SnapshotUnavailable)?;
        debug!("Looking for [{}]", self.pattern.as_str());
        Ok(self.matches(snapshot))
    }
}
