//! Action invocation.
//!
//! Runs the configured command through the shell when the machine is idle.

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

/// Shell used to interpret the action string.
const SHELL: &str = "/bin/sh";

/// Log every Nth failure after the initial burst.
const ERROR_LOG_RATE_LIMIT: u32 = 10;

/// Errors invoking the action.
#[derive(Error, Debug)]
pub enum ActionError {
    #[error("Failed to spawn action: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Action exited with code {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("Action did not finish within {0:?}")]
    TimedOut(Duration),
}

/// Something that can carry out the configured action.
#[async_trait]
pub trait ActionSink: Send + Sync {
    async fn invoke(&self, action: &str) -> Result<(), ActionError>;
}

/// Runs the action with `/bin/sh -c`.
#[derive(Debug, Default)]
pub struct ShellAction {
    /// Log commands instead of executing them.
    dry_run: bool,

    /// Failures so far, for rate-limited logging.
    failures: AtomicU32,
}

impl ShellAction {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            failures: AtomicU32::new(0),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    fn report_failure(&self, code: Option<i32>, stderr: &str) {
        let count = self.failures.fetch_add(1, Ordering::Relaxed);
        if count < 5 || count % ERROR_LOG_RATE_LIMIT == 0 {
            error!("Action failed (exit code {:?}): {}", code, stderr);
            if count == 5 {
                warn!(
                    "Rate-limiting action error logs (showing every {}th error)",
                    ERROR_LOG_RATE_LIMIT
                );
            }
        }
    }
}

#[async_trait]
impl ActionSink for ShellAction {
    async fn invoke(&self, action: &str) -> Result<(), ActionError> {
        if self.dry_run {
            info!("[DRY RUN] Would execute: {} -c {:?}", SHELL, action);
            return Ok(());
        }

        debug!("Executing: {} -c {:?}", SHELL, action);

        let output = Command::new(SHELL)
            .arg("-c")
            .arg(action)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ActionError::Spawn)?
            .wait_with_output()
            .await
            .map_err(ActionError::Spawn)?;

        if output.status.success() {
            trace!("Action succeeded");
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            self.report_failure(output.status.code(), &stderr);
            Err(ActionError::Failed {
                code: output.status.code(),
                stderr,
            })
        }
    }
}
