//! Wake-on-LAN event monitor.
//!
//! A listener task receives UDP datagrams and latches a flag when a magic
//! packet addressed to this host arrives. The aggregator reads and clears the
//! flag once per pass, so any number of packets between two passes count as
//! one activity.

use super::Monitor;
use super::MonitorError;
use super::Observation;
use super::ObserveError;
use crate::interfaces::MacAddress;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

/// Upper bound on one receive before the listener rechecks for shutdown.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Pause after a receive error so a persistent fault cannot spin.
const ERROR_BACKOFF: Duration = Duration::from_millis(250);

const SYNC_STREAM: [u8; 6] = [0xff; 6];
const MAC_REPEAT: usize = 16;
const MAX_DATAGRAM: usize = 1500;

/// Byte sequence a magic packet for one interface contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagicSignature(Vec<u8>);

impl MagicSignature {
    /// Six `0xff` bytes followed by the address sixteen times.
    pub fn for_mac(mac: MacAddress) -> Self {
        let mut bytes = Vec::with_capacity(SYNC_STREAM.len() + 6 * MAC_REPEAT);
        bytes.extend_from_slice(&SYNC_STREAM);
        for _ in 0..MAC_REPEAT {
            bytes.extend_from_slice(&mac.octets());
        }
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Whether `payload` carries this signature anywhere.
    pub fn matches(&self, payload: &[u8]) -> bool {
        payload.windows(self.0.len()).any(|w| w == self.0.as_slice())
    }
}

/// Single-bit "activity since last read" flag shared with a listener.
#[derive(Debug, Clone)]
pub struct Latch {
    inner: Arc<LatchState>,
}

#[derive(Debug)]
struct LatchState {
    set: AtomicBool,
    alive: AtomicBool,
}

impl Latch {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LatchState {
                set: AtomicBool::new(false),
                alive: AtomicBool::new(true),
            }),
        }
    }

    pub fn set(&self) {
        self.inner.set.store(true, Ordering::Release);
    }

    /// Read and clear in one step.
    pub fn take(&self) -> bool {
        self.inner.set.swap(false, Ordering::AcqRel)
    }

    /// Whether the writer side is still running.
    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::Acquire)
    }

    fn mark_stopped(&self) {
        self.inner.alive.store(false, Ordering::Release);
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

/// Reports activity when a Wake-on-LAN packet arrived since the last pass.
#[derive(Debug)]
pub struct EventMonitor {
    name: String,
    local_addr: SocketAddr,
    latch: Latch,
}

impl EventMonitor {
    /// Bind the listening socket.
    ///
    /// The returned listener must be spawned for the monitor to see packets.
    pub async fn bind(
        name: impl Into<String>,
        addr: SocketAddr,
        signatures: Vec<MagicSignature>,
    ) -> Result<(Self, WakeListener), MonitorError> {
        let name = name.into();
        if signatures.is_empty() {
            return Err(MonitorError::NoSignatures { name });
        }

        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| MonitorError::Bind {
                name: name.clone(),
                addr,
                source,
            })?;
        let local_addr = socket.local_addr().map_err(|source| MonitorError::Bind {
            name: name.clone(),
            addr,
            source,
        })?;
        info!("Monitor '{}' listening on udp {}", name, local_addr);

        let latch = Latch::new();
        let listener = WakeListener {
            name: name.clone(),
            socket,
            signatures,
            latch: latch.clone(),
        };

        Ok((
            Self {
                name,
                local_addr,
                latch,
            },
            listener,
        ))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Read and clear the latch.
    pub fn take(&self) -> Result<bool, ObserveError> {
        let latched = self.latch.take();
        if !latched && !self.latch.is_alive() {
            return Err(ObserveError::ListenerStopped(self.name.clone()));
        }
        Ok(latched)
    }
}

impl Monitor for EventMonitor {
    fn name(&self) -> &str {
        &self.name
    }

    fn observe(&self, _observation: &Observation<'_>) -> Result<bool, ObserveError> {
        self.take()
    }
}

/// Background half of an [`EventMonitor`].
#[derive(Debug)]
pub struct WakeListener {
    name: String,
    socket: UdpSocket,
    signatures: Vec<MagicSignature>,
    latch: Latch,
}

/// Marks the latch dead however the listener task ends.
struct StopGuard(Latch);

impl Drop for StopGuard {
    fn drop(&mut self) {
        self.0.mark_stopped();
    }
}

impl WakeListener {
    /// Start the receive loop; it runs until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let _guard = StopGuard(self.latch.clone());
            self.listen(&cancel).await;
            if cancel.is_cancelled() {
                debug!("Listener '{}' stopped", self.name);
            } else {
                error!("Listener '{}' exited unexpectedly", self.name);
            }
        })
    }

    async fn listen(&self, cancel: &CancellationToken) {
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            let received = tokio::select! {
                () = cancel.cancelled() => return,
                r = tokio::time::timeout(RECV_TIMEOUT, self.socket.recv_from(&mut buf)) => r,
            };

            match received {
                Err(_) => {
                    trace!("Listener '{}' receive timed out", self.name);
                }
                Ok(Ok((len, peer))) => {
                    if self.matches(&buf[..len]) {
                        debug!("Listener '{}' got magic packet from {}", self.name, peer);
                        self.latch.set();
                    } else {
                        trace!("Listener '{}' ignored {} bytes from {}", self.name, len, peer);
                    }
                }
                Ok(Err(e)) => {
                    warn!("Listener '{}' receive failed: {}", self.name, e);
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            }
        }
    }

    fn matches(&self, payload: &[u8]) -> bool {
        self.signatures.iter().any(|s| s.matches(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const MAC: MacAddress = MacAddress::new([0x52, 0x54, 0x00, 0x12, 0x34, 0x56]);

    fn loopback() -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, 0))
    }

    async fn send(to: SocketAddr, payload: &[u8]) {
        let sender = UdpSocket::bind(loopback()).await.unwrap();
        sender.send_to(payload, to).await.unwrap();
    }

    async fn wait_for_latch(monitor: &EventMonitor) -> bool {
        for _ in 0..100 {
            if monitor.take().unwrap() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[test]
    fn test_signature_layout() {
        let sig = MagicSignature::for_mac(MAC);
        let bytes = sig.as_bytes();
        assert_eq!(bytes.len(), 102);
        assert_eq!(&bytes[..6], &[0xff; 6]);
        assert_eq!(&bytes[6..12], &MAC.octets());
        assert_eq!(&bytes[96..], &MAC.octets());
    }

    #[test]
    fn test_signature_matching() {
        let sig = MagicSignature::for_mac(MAC);
        let mut payload = sig.as_bytes().to_vec();
        assert!(sig.matches(&payload));

        // SecureOn password trailer
        payload.extend_from_slice(&[1, 2, 3, 4, 5, 6]);
        assert!(sig.matches(&payload));

        let other = MagicSignature::for_mac(MacAddress::new([2, 0, 0, 0, 0, 1]));
        assert!(!other.matches(&payload));
        assert!(!sig.matches(&payload[..50]));
        assert!(!sig.matches(&[]));
    }

    #[test]
    fn test_latch_read_and_clear() {
        let latch = Latch::new();
        assert!(!latch.take());

        latch.set();
        latch.set();
        latch.set();
        assert!(latch.take());
        assert!(!latch.take());
    }

    #[tokio::test]
    async fn test_bind_requires_signatures() {
        let result = EventMonitor::bind("wol", loopback(), Vec::new()).await;
        assert!(matches!(result, Err(MonitorError::NoSignatures { .. })));
    }

    #[tokio::test]
    async fn test_bind_conflict() {
        let sigs = vec![MagicSignature::for_mac(MAC)];
        let (first, _listener) = EventMonitor::bind("a", loopback(), sigs.clone())
            .await
            .unwrap();

        let result = EventMonitor::bind("b", first.local_addr(), sigs).await;
        assert!(matches!(result, Err(MonitorError::Bind { name, .. }) if name == "b"));
    }

    #[tokio::test]
    async fn test_magic_packet_latches_once() {
        let sig = MagicSignature::for_mac(MAC);
        let (monitor, listener) = EventMonitor::bind("wol", loopback(), vec![sig.clone()])
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        let handle = listener.spawn(cancel.clone());

        assert_eq!(monitor.take(), Ok(false));

        send(monitor.local_addr(), sig.as_bytes()).await;
        assert!(wait_for_latch(&monitor).await);
        assert_eq!(monitor.take(), Ok(false));

        // Several packets before one read collapse into a single activity
        for _ in 0..3 {
            send(monitor.local_addr(), sig.as_bytes()).await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(monitor.observe(&Observation::default()), Ok(true));
        assert_eq!(monitor.observe(&Observation::default()), Ok(false));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_foreign_packet_ignored() {
        let (monitor, listener) =
            EventMonitor::bind("wol", loopback(), vec![MagicSignature::for_mac(MAC)])
                .await
                .unwrap();
        let cancel = CancellationToken::new();
        let handle = listener.spawn(cancel.clone());

        let foreign = MagicSignature::for_mac(MacAddress::new([2, 0, 0, 0, 0, 1]));
        send(monitor.local_addr(), foreign.as_bytes()).await;
        send(monitor.local_addr(), b"hello").await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(monitor.take(), Ok(false));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_stops_listener_promptly() {
        let (monitor, listener) =
            EventMonitor::bind("wol", loopback(), vec![MagicSignature::for_mac(MAC)])
                .await
                .unwrap();
        let cancel = CancellationToken::new();
        let handle = listener.spawn(cancel.clone());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("listener should stop well before its receive timeout")
            .unwrap();

        assert_eq!(
            monitor.take(),
            Err(ObserveError::ListenerStopped("wol".to_string()))
        );
    }
}
