//! Hardware addresses of local network interfaces.
//!
//! Used to recognise Wake-on-LAN packets addressed to this host.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;
use tracing::trace;

/// Default sysfs directory listing network interfaces.
pub const SYSFS_NET: &str = "/sys/class/net";

/// A 48-bit Ethernet hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress([u8; 6]);

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Invalid hardware address: {0:?}")]
pub struct ParseMacError(String);

impl MacAddress {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// All-zero addresses belong to loopback and virtual devices.
    pub fn is_unspecified(&self) -> bool {
        self.0 == [0; 6]
    }
}

impl FromStr for MacAddress {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');

        for byte in &mut bytes {
            let part = parts.next().ok_or_else(|| ParseMacError(s.to_string()))?;
            if part.len() != 2 {
                return Err(ParseMacError(s.to_string()));
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| ParseMacError(s.to_string()))?;
        }

        if parts.next().is_some() {
            return Err(ParseMacError(s.to_string()));
        }

        Ok(Self(bytes))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// Enumerates hardware addresses of this host.
pub trait InterfaceSource: Send + Sync {
    fn hardware_addresses(&self) -> io::Result<Vec<MacAddress>>;
}

/// Reads `<root>/<iface>/address` for every interface under sysfs.
#[derive(Debug, Clone)]
pub struct SysfsInterfaces {
    root: PathBuf,
}

impl SysfsInterfaces {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for SysfsInterfaces {
    fn default() -> Self {
        Self::new(SYSFS_NET)
    }
}

impl InterfaceSource for SysfsInterfaces {
    fn hardware_addresses(&self) -> io::Result<Vec<MacAddress>> {
        let mut addresses = Vec::new();

        for entry in std::fs::read_dir(&self.root)?.flatten() {
            let iface = entry.file_name();
            let iface = iface.to_string_lossy();
            if iface == "lo" {
                continue;
            }

            let Ok(raw) = std::fs::read_to_string(entry.path().join("address")) else {
                trace!("No address for interface {}", iface);
                continue;
            };

            match raw.parse::<MacAddress>() {
                Ok(mac) if mac.is_unspecified() => {
                    trace!("Skipping interface {} with unspecified address", iface);
                }
                Ok(mac) => {
                    debug!("Interface {} has address {}", iface, mac);
                    if !addresses.contains(&mac) {
                        addresses.push(mac);
                    }
                }
                Err(e) => trace!("Skipping interface {}: {}", iface, e),
            }
        }

        Ok(addresses)
    }
}
