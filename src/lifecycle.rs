//! Single-instance lock and termination handling.
//!
//! A pid file marks the running daemon. It is created atomically at startup
//! and removed exactly once on the way out, whether the loop returns, an
//! error propagates, a panic unwinds, or a termination signal arrives.

use std::fmt;
use std::fs;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use thiserror::Error;
use tokio::signal::unix::Signal;
use tokio::signal::unix::SignalKind;
use tokio::signal::unix::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

/// Errors acquiring the instance lock.
#[derive(Error, Debug)]
pub enum LockError {
    #[error(
        "Another instance is running [{}] (lock file {})",
        .owner.as_deref().unwrap_or("unknown"),
        .path.display()
    )]
    AlreadyRunning {
        path: PathBuf,
        owner: Option<String>,
    },

    #[error("Failed to create lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Exclusive ownership of the "one running instance" pid file.
#[derive(Debug)]
pub struct LockToken {
    path: PathBuf,
    pid: u32,
    released: AtomicBool,
}

impl LockToken {
    /// Create the pid file for this process.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, LockError> {
        Self::acquire_as(path.into(), std::process::id())
    }

    fn acquire_as(path: PathBuf, pid: u32) -> Result<Self, LockError> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let owner = fs::read_to_string(&path)
                    .ok()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty());
                return Err(LockError::AlreadyRunning { path, owner });
            }
            Err(source) => return Err(LockError::Io { path, source }),
        };

        if let Err(source) = writeln!(file, "{pid}") {
            let _ = fs::remove_file(&path);
            return Err(LockError::Io { path, source });
        }

        info!("Acquired lock {} [{}]", path.display(), pid);
        Ok(Self {
            path,
            pid,
            released: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Remove the pid file if it is still ours. Safe to call repeatedly.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }

        match fs::read_to_string(&self.path) {
            Ok(content) if content.trim() == self.pid.to_string() => {
                match fs::remove_file(&self.path) {
                    Ok(()) => info!("Released lock {}", self.path.display()),
                    Err(e) => warn!("Failed to remove lock {}: {}", self.path.display(), e),
                }
            }
            Ok(content) => {
                warn!(
                    "Lock {} now belongs to [{}], leaving it in place",
                    self.path.display(),
                    content.trim()
                );
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Lock {} already gone", self.path.display());
            }
            Err(e) => warn!("Failed to read lock {}: {}", self.path.display(), e),
        }
    }
}

impl Drop for LockToken {
    fn drop(&mut self) {
        self.release();
    }
}

/// Signals that end the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    Hangup,
    Interrupt,
    Quit,
    Terminate,
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Hangup => "SIGHUP",
            Self::Interrupt => "SIGINT",
            Self::Quit => "SIGQUIT",
            Self::Terminate => "SIGTERM",
        };
        f.write_str(name)
    }
}

/// Registered listeners for SIGHUP, SIGINT, SIGQUIT and SIGTERM.
pub struct TerminationSignals {
    hangup: Signal,
    interrupt: Signal,
    quit: Signal,
    terminate: Signal,
}

impl TerminationSignals {
    /// Install handlers; from here on these signals no longer kill the process.
    pub fn register() -> io::Result<Self> {
        Ok(Self {
            hangup: signal(SignalKind::hangup())?,
            interrupt: signal(SignalKind::interrupt())?,
            quit: signal(SignalKind::quit())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Wait for the next termination signal.
    pub async fn recv(&mut self) -> TerminationSignal {
        tokio::select! {
            _ = self.hangup.recv() => TerminationSignal::Hangup,
            _ = self.interrupt.recv() => TerminationSignal::Interrupt,
            _ = self.quit.recv() => TerminationSignal::Quit,
            _ = self.terminate.recv() => TerminationSignal::Terminate,
        }
    }

    /// Cancel `shutdown` when a signal arrives.
    ///
    /// The task does nothing else; cleanup happens on the main path once the
    /// cancellation is observed. It also ends quietly if `shutdown` is
    /// cancelled for another reason.
    pub fn spawn_shutdown(
        mut self,
        shutdown: CancellationToken,
    ) -> JoinHandle<Option<TerminationSignal>> {
        tokio::spawn(async move {
            tokio::select! {
                () = shutdown.cancelled() => None,
                sig = self.recv() => {
                    info!("Received {}, shutting down", sig);
                    shutdown.cancel();
                    Some(sig)
                }
            }
        })
    }
}
