//! Socket Transport Implementation

use bridge_traits::{
    error::{BridgeError, Result},
    transport::{DaemonAddress, Readiness, Transport, TransportConnector},
};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Shortest timeout the OS accepts for socket reads.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Bytes taken by one readiness probe.
const PROBE_LEN: usize = 4096;

/// Upper bound for a single write attempt.
const WRITE_TIMEOUT: Duration = Duration::from_millis(20);

enum Stream {
    #[cfg(unix)]
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl Stream {
    fn set_read_timeout(&self, timeout: Duration) -> io::Result<()> {
        match self {
            #[cfg(unix)]
            Stream::Unix(s) => s.set_read_timeout(Some(timeout)),
            Stream::Tcp(s) => s.set_read_timeout(Some(timeout)),
        }
    }

    fn set_write_timeout(&self, timeout: Duration) -> io::Result<()> {
        match self {
            #[cfg(unix)]
            Stream::Unix(s) => s.set_write_timeout(Some(timeout)),
            Stream::Tcp(s) => s.set_write_timeout(Some(timeout)),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            #[cfg(unix)]
            Stream::Unix(s) => s.read(buf),
            Stream::Tcp(s) => s.read(buf),
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            #[cfg(unix)]
            Stream::Unix(s) => s.write(buf),
            Stream::Tcp(s) => s.write(buf),
        }
    }

    fn shutdown(&self) -> io::Result<()> {
        match self {
            #[cfg(unix)]
            Stream::Unix(s) => s.shutdown(Shutdown::Both),
            Stream::Tcp(s) => s.shutdown(Shutdown::Both),
        }
    }
}

/// Byte stream to the daemon over a Unix-domain or TCP socket.
///
/// Readiness is probed by a bounded read; bytes taken by the probe are
/// held back and returned by the next [`Transport::read`].
pub struct SocketTransport {
    stream: Option<Stream>,
    peer: String,
    held: Vec<u8>,
}

impl SocketTransport {
    fn new(stream: Stream, peer: String) -> Self {
        Self {
            stream: Some(stream),
            peer,
            held: Vec::new(),
        }
    }

    fn stream(&mut self) -> Result<&mut Stream> {
        self.stream
            .as_mut()
            .ok_or_else(|| BridgeError::Closed(self.peer.clone()))
    }
}

impl std::fmt::Debug for SocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketTransport")
            .field("peer", &self.peer)
            .field("open", &self.stream.is_some())
            .finish()
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

impl Transport for SocketTransport {
    fn wait_readable(&mut self, timeout: Duration) -> Result<Readiness> {
        if !self.held.is_empty() {
            return Ok(Readiness::Ready);
        }

        let stream = self.stream()?;
        stream.set_read_timeout(timeout.max(MIN_WAIT))?;

        let mut probe = [0u8; PROBE_LEN];
        match stream.read(&mut probe) {
            Ok(0) => Ok(Readiness::Closed),
            Ok(n) => {
                self.held.extend_from_slice(&probe[..n]);
                Ok(Readiness::Ready)
            }
            Err(e) if is_timeout(&e) => Ok(Readiness::Idle),
            Err(e) => Err(e.into()),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.held.is_empty() {
            let n = buf.len().min(self.held.len());
            buf[..n].copy_from_slice(&self.held[..n]);
            self.held.drain(..n);
            return Ok(n);
        }

        let stream = self.stream()?;
        stream.set_read_timeout(MIN_WAIT)?;
        match stream.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if is_timeout(&e) => Err(BridgeError::Io(io::Error::new(
                io::ErrorKind::WouldBlock,
                "no data available",
            ))),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let stream = self.stream()?;
        stream.set_write_timeout(WRITE_TIMEOUT)?;
        match stream.write(buf) {
            Ok(n) => Ok(n),
            Err(e) if is_timeout(&e) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        self.held.clear();
        let Some(stream) = self.stream.take() else {
            return Err(BridgeError::Closed(self.peer.clone()));
        };
        match stream.shutdown() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn peer(&self) -> String {
        self.peer.clone()
    }
}

/// Desktop connector for Unix-domain and TCP daemon addresses.
#[derive(Debug, Clone, Default)]
pub struct SocketConnector {
    user: Option<String>,
}

impl SocketConnector {
    /// Create a connector whose default address uses the current user name.
    pub fn new() -> Self {
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("LOGNAME"))
            .ok()
            .filter(|u| !u.is_empty());
        Self { user }
    }

    /// Create a connector whose default address uses `user`.
    pub fn for_user(user: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
        }
    }
}

impl TransportConnector for SocketConnector {
    fn connect(&self, address: &DaemonAddress) -> Result<Box<dyn Transport>> {
        let peer = address.to_string();
        debug!(address = %peer, "Opening daemon socket");

        let stream = match address {
            #[cfg(unix)]
            DaemonAddress::Unix(path) => UnixStream::connect(path)
                .map(Stream::Unix)
                .map_err(|e| BridgeError::ConnectionFailed(format!("{}: {}", peer, e)))?,
            #[cfg(not(unix))]
            DaemonAddress::Unix(_) => {
                return Err(BridgeError::NotAvailable(
                    "Unix-domain sockets are not supported on this platform".to_string(),
                ))
            }
            DaemonAddress::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port))
                    .map_err(|e| BridgeError::ConnectionFailed(format!("{}: {}", peer, e)))?;
                if let Err(e) = stream.set_nodelay(true) {
                    warn!(error = %e, "Failed to disable Nagle on daemon socket");
                }
                Stream::Tcp(stream)
            }
        };

        info!(address = %peer, "Daemon socket connected");
        Ok(Box::new(SocketTransport::new(stream, peer)))
    }

    fn default_address(&self) -> Option<DaemonAddress> {
        let user = self.user.as_deref().unwrap_or("unknown");
        Some(DaemonAddress::unix(format!("/tmp/xmms-ipc-{}", user)))
    }
}
