//! Liveness monitors.
//!
//! A monitor answers one question per pass: has there been activity?
//! Polling monitors inspect a process table snapshot supplied by the caller;
//! event monitors report whether a background listener latched a packet.

mod process;
mod wake;

pub use process::PollingMonitor;
pub use wake::EventMonitor;
pub use wake::Latch;
pub use wake::MagicSignature;
pub use wake::RECV_TIMEOUT;
pub use wake::WakeListener;

use crate::config::MonitorSpec;
use crate::interfaces::InterfaceSource;
use crate::snapshot::ProcessSnapshot;
use std::net::Ipv4Addr;
use std::net::SocketAddr;
use thiserror::Error;
use tracing::info;

/// Inputs shared by every monitor during one pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct Observation<'a> {
    snapshot: Option<&'a ProcessSnapshot>,
}

impl<'a> Observation<'a> {
    pub fn new(snapshot: Option<&'a ProcessSnapshot>) -> Self {
        Self { snapshot }
    }

    /// Process table for this pass, if it could be read.
    pub fn snapshot(&self) -> Option<&'a ProcessSnapshot> {
        self.snapshot
    }
}

/// A pluggable liveness signal.
pub trait Monitor: Send {
    /// Name used in log lines.
    fn name(&self) -> &str;

    /// Whether the caller must fetch a process table before observing.
    fn needs_snapshot(&self) -> bool {
        false
    }

    /// Report whether activity was seen.
    ///
    /// Must not block: any waiting happens elsewhere.
    fn observe(&self, observation: &Observation<'_>) -> Result<bool, ObserveError>;
}

/// A single observation failed; the pass counts it as no activity.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ObserveError {
    #[error("Process table snapshot unavailable")]
    SnapshotUnavailable,

    #[error("Listener for '{0}' has stopped")]
    ListenerStopped(String),
}

/// Errors constructing monitors at startup.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Monitor '{name}' has an invalid pattern: {source}")]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("Monitor '{name}' cannot listen on {addr}: {source}")]
    Bind {
        name: String,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Monitor '{name}' has no hardware addresses to match")]
    NoSignatures { name: String },

    #[error("Failed to enumerate network interfaces: {0}")]
    Interfaces(#[source] std::io::Error),
}

/// Monitors built from configuration plus the listeners that feed them.
pub struct MonitorSet {
    pub monitors: Vec<Box<dyn Monitor>>,
    pub listeners: Vec<WakeListener>,
}

/// Build monitors in configuration order.
///
/// Event monitors bind their sockets here so a port conflict stops startup
/// instead of producing a monitor that is silently always absent.
pub async fn build_monitors(
    specs: &[MonitorSpec],
    interfaces: &dyn InterfaceSource,
) -> Result<MonitorSet, MonitorError> {
    let mut monitors: Vec<Box<dyn Monitor>> = Vec::with_capacity(specs.len());
    let mut listeners = Vec::new();
    let mut signatures: Option<Vec<MagicSignature>> = None;

    for spec in specs {
        match spec {
            MonitorSpec::Process { name, pattern } => {
                monitors.push(Box::new(PollingMonitor::new(name, pattern)?));
            }
            MonitorSpec::Event { name, port } => {
                if signatures.is_none() {
                    let found = interfaces
                        .hardware_addresses()
                        .map_err(MonitorError::Interfaces)?
                        .into_iter()
                        .map(MagicSignature::for_mac)
                        .collect();
                    signatures = Some(found);
                }

                let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, *port));
                let (monitor, listener) =
                    EventMonitor::bind(name, addr, signatures.clone().unwrap_or_default()).await?;
                monitors.push(Box::new(monitor));
                listeners.push(listener);
            }
        }
        info!("Monitoring {}", spec.name());
    }

    Ok(MonitorSet {
        monitors,
        listeners,
    })
}
