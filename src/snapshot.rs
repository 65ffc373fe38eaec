//! Process table snapshots.
//!
//! Polling monitors never read the process table themselves; the aggregator
//! fetches one snapshot per pass through a [`SnapshotProvider`].

use async_trait::async_trait;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::trace;

/// Errors fetching a process table snapshot.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Failed to run {command}: {source}")]
    Spawn {
        command: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with code {code:?}")]
    Failed {
        command: &'static str,
        code: Option<i32>,
    },
}

/// Command lines of the processes running at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSnapshot {
    lines: Vec<String>,
}

impl ProcessSnapshot {
    pub fn new(lines: Vec<String>) -> Self {
        Self { lines }
    }

    /// Build from raw `ps` output, dropping the header row and blank lines.
    pub fn from_ps_output(output: &str) -> Self {
        let lines = output
            .lines()
            .skip(1)
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        Self { lines }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for ProcessSnapshot {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            lines: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Source of process table snapshots.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    async fn snapshot(&self) -> Result<ProcessSnapshot, SnapshotError>;
}

/// Reads the process table with `ps -eo args`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PsSnapshot;

const PS_COMMAND: &str = "ps";

#[async_trait]
impl SnapshotProvider for PsSnapshot {
    async fn snapshot(&self) -> Result<ProcessSnapshot, SnapshotError> {
        let output = Command::new(PS_COMMAND)
            .args(["-eo", "args"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await
            .map_err(|source| SnapshotError::Spawn {
                command: PS_COMMAND,
                source,
            })?;

        if !output.status.success() {
            return Err(SnapshotError::Failed {
                command: PS_COMMAND,
                code: output.status.code(),
            });
        }

        let snapshot = ProcessSnapshot::from_ps_output(&String::from_utf8_lossy(&output.stdout));
        trace!("Process table snapshot: {} entries", snapshot.len());
        Ok(snapshot)
    }
}
