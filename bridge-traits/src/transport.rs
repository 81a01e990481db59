//! Daemon Transport Abstractions
//!
//! Provides the byte-stream contract the client engine uses to talk to the
//! daemon, plus the address model used to locate it.
//!
//! The engine never blocks indefinitely on a transport: readiness is always
//! polled with a bounded timeout so that shutdown flags can be observed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{BridgeError, Result};

/// Default TCP port the daemon listens on when none is given.
pub const DEFAULT_TCP_PORT: u16 = 9667;

/// Rendezvous address of a daemon instance.
///
/// Parsed from `unix:///path/to/socket` or `tcp://host[:port]`. A bare path
/// is treated as a Unix socket path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DaemonAddress {
    /// Local Unix-domain socket
    Unix(PathBuf),
    /// TCP endpoint
    Tcp { host: String, port: u16 },
}

impl DaemonAddress {
    /// Builds a TCP address from a host and port.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Builds a Unix socket address.
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Self::Unix(path.into())
    }
}

impl FromStr for DaemonAddress {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(BridgeError::InvalidAddress("empty address".to_string()));
        }

        if let Some(path) = s.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(BridgeError::InvalidAddress(s.to_string()));
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }

        if let Some(rest) = s.strip_prefix("tcp://") {
            let (host, port) = match rest.rsplit_once(':') {
                Some((host, port)) => {
                    let port = port
                        .parse::<u16>()
                        .map_err(|_| BridgeError::InvalidAddress(s.to_string()))?;
                    (host, port)
                }
                None => (rest, DEFAULT_TCP_PORT),
            };
            if host.is_empty() {
                return Err(BridgeError::InvalidAddress(s.to_string()));
            }
            return Ok(Self::tcp(host, port));
        }

        if s.contains("://") {
            return Err(BridgeError::InvalidAddress(format!(
                "unsupported scheme in {}",
                s
            )));
        }

        Ok(Self::Unix(PathBuf::from(s)))
    }
}

impl fmt::Display for DaemonAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaemonAddress::Unix(path) => write!(f, "unix://{}", path.display()),
            DaemonAddress::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
        }
    }
}

/// Result of a bounded readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Inbound bytes are available
    Ready,
    /// Timeout elapsed with nothing to read
    Idle,
    /// Peer closed the stream
    Closed,
}

/// Bidirectional byte stream to the daemon.
///
/// Implementations must never block longer than the timeout passed to
/// [`wait_readable`](Transport::wait_readable), and `write` must return
/// `Ok(0)` instead of blocking when the stream is momentarily not writable.
pub trait Transport: Send {
    /// Wait until inbound data is available, the peer closes, or `timeout` elapses.
    fn wait_readable(&mut self, timeout: Duration) -> Result<Readiness>;

    /// Read available bytes into `buf`. Returns `Ok(0)` when the peer closed.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write as many bytes as the stream accepts right now.
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Close the stream. Further calls fail with [`BridgeError::Closed`].
    fn shutdown(&mut self) -> Result<()>;

    /// Human-readable peer description for logs.
    fn peer(&self) -> String {
        "daemon".to_string()
    }
}

/// Factory for transports, injected by the host platform.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::transport::{DaemonAddress, TransportConnector};
///
/// fn open(connector: &dyn TransportConnector) -> bridge_traits::error::Result<()> {
///     let address: DaemonAddress = "tcp://127.0.0.1:9667".parse()?;
///     let _transport = connector.connect(&address)?;
///     Ok(())
/// }
/// ```
pub trait TransportConnector: Send + Sync {
    /// Open a new transport to `address`.
    fn connect(&self, address: &DaemonAddress) -> Result<Box<dyn Transport>>;

    /// Address used when neither configuration nor environment provide one.
    fn default_address(&self) -> Option<DaemonAddress> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unix_address() {
        let addr: DaemonAddress = "unix:///tmp/xmms-ipc-alice".parse().unwrap();
        assert_eq!(addr, DaemonAddress::unix("/tmp/xmms-ipc-alice"));
    }

    #[test]
    fn test_parse_bare_path_is_unix() {
        let addr: DaemonAddress = "/var/run/xmms".parse().unwrap();
        assert_eq!(addr, DaemonAddress::unix("/var/run/xmms"));
    }

    #[test]
    fn test_parse_tcp_address() {
        let addr: DaemonAddress = "tcp://192.168.1.2:1234".parse().unwrap();
        assert_eq!(addr, DaemonAddress::tcp("192.168.1.2", 1234));
    }

    #[test]
    fn test_parse_tcp_default_port() {
        let addr: DaemonAddress = "tcp://localhost".parse().unwrap();
        assert_eq!(addr, DaemonAddress::tcp("localhost", DEFAULT_TCP_PORT));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!("".parse::<DaemonAddress>().is_err());
        assert!("tcp://:12".parse::<DaemonAddress>().is_err());
        assert!("tcp://host:notaport".parse::<DaemonAddress>().is_err());
        assert!("http://host".parse::<DaemonAddress>().is_err());
        assert!("unix://".parse::<DaemonAddress>().is_err());
    }

    #[test]
    fn test_display_round_trips() {
        let addr = DaemonAddress::tcp("example.org", 9000);
        assert_eq!(addr.to_string(), "tcp://example.org:9000");
        assert_eq!(addr.to_string().parse::<DaemonAddress>().unwrap(), addr);
    }
}
