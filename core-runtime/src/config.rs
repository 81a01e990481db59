//! # Client Configuration Module
//!
//! Provides configuration management for the daemon client.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a
//! `ClientConfig` holding the transport connector and every tunable of the
//! engine. Validation is fail-fast: an invalid or incomplete configuration
//! is rejected by [`ClientConfigBuilder::build`] with an actionable message.
//!
//! ## Required Dependencies
//!
//! - `TransportConnector` - Opens the byte streams to the daemon
//!
//! When the `desktop-shims` feature is enabled, the Unix/TCP socket connector
//! from `bridge-desktop` is injected automatically if none is provided.
//!
//! ## Daemon address resolution
//!
//! 1. An address given to the builder (`address()` or `server()`)
//! 2. The `XMMS_PATH` environment variable
//! 3. The connector's platform default (`unix:///tmp/xmms-ipc-$USER` on desktop)
//!
//! Empty values and the unexpanded placeholder `${env.XMMS_PATH}` are ignored.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::ClientConfig;
//! use std::time::Duration;
//!
//! let config = ClientConfig::builder()
//!     .client_name("my-player")
//!     .server("192.168.1.20", 9667)
//!     .sync_timeout(Duration::from_secs(5))
//!     .build()
//!     .expect("Failed to build config");
//! ```

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use bridge_traits::transport::{DaemonAddress, TransportConnector};
use core_protocol::{SourcePreference, DEFAULT_MAX_FRAME_SIZE};
use std::sync::Arc;
use std::time::Duration;

/// Environment variable naming the daemon address.
pub const XMMS_PATH_ENV: &str = "XMMS_PATH";

/// Default interval of one event-loop readiness poll.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default client name announced to the daemon.
pub const DEFAULT_CLIENT_NAME: &str = "xmms-client";

/// Configuration for a daemon client.
///
/// Use [`ClientConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct ClientConfig {
    /// Name announced in the handshake
    pub client_name: String,

    /// Explicit daemon address; `None` defers to the environment and the connector
    pub address: Option<DaemonAddress>,

    /// Upper bound of one readiness wait in the event loop
    pub poll_interval: Duration,

    /// Default timeout for blocking calls; `None` waits indefinitely
    pub sync_timeout: Option<Duration>,

    /// Source ranking applied when property dictionaries are flattened
    pub source_preference: SourcePreference,

    /// Source name used for media-library property edits
    pub edit_source: Option<String>,

    /// Buffer size of the event bus
    pub event_buffer_size: usize,

    /// Largest accepted frame payload in bytes
    pub max_frame_size: usize,

    /// Opens transports to the daemon
    pub connector: Arc<dyn TransportConnector>,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("client_name", &self.client_name)
            .field("address", &self.address)
            .field("poll_interval", &self.poll_interval)
            .field("sync_timeout", &self.sync_timeout)
            .field("source_preference", &self.source_preference)
            .field("edit_source", &self.edit_source)
            .field("event_buffer_size", &self.event_buffer_size)
            .field("max_frame_size", &self.max_frame_size)
            .field("connector", &"TransportConnector { ... }")
            .finish()
    }
}

impl ClientConfig {
    /// Creates a new builder for constructing a `ClientConfig`.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - The client name is not empty
    /// - The poll interval lies within 1ms..=1s
    /// - The sync timeout, when set, is not zero
    /// - Event buffer and frame size limits are not zero
    pub fn validate(&self) -> Result<()> {
        if self.client_name.trim().is_empty() {
            return Err(Error::Config("Client name cannot be empty".to_string()));
        }

        if self.poll_interval < MIN_POLL_INTERVAL || self.poll_interval > MAX_POLL_INTERVAL {
            return Err(Error::Config(format!(
                "Poll interval must be between {:?} and {:?}, got {:?}",
                MIN_POLL_INTERVAL, MAX_POLL_INTERVAL, self.poll_interval
            )));
        }

        if self.sync_timeout == Some(Duration::ZERO) {
            return Err(Error::Config(
                "Sync timeout must be greater than zero. Leave it unset to wait indefinitely."
                    .to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        if self.max_frame_size == 0 {
            return Err(Error::Config(
                "Maximum frame size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Resolves the daemon address from the builder, `XMMS_PATH`, or the connector.
    pub fn resolve_address(&self) -> Result<DaemonAddress> {
        self.resolve_address_with(std::env::var(XMMS_PATH_ENV).ok().as_deref())
    }

    /// Address resolution with an explicit `XMMS_PATH` value.
    pub fn resolve_address_with(&self, env_path: Option<&str>) -> Result<DaemonAddress> {
        if let Some(address) = &self.address {
            return Ok(address.clone());
        }

        if let Some(path) = env_path.filter(|p| is_usable_path(p)) {
            return path
                .parse()
                .map_err(|e| Error::Config(format!("Invalid {}: {}", XMMS_PATH_ENV, e)));
        }

        self.connector.default_address().ok_or_else(|| {
            Error::Config(format!(
                "No daemon address configured. Use .address()/.server() or set {}.",
                XMMS_PATH_ENV
            ))
        })
    }
}

fn is_usable_path(path: &str) -> bool {
    let path = path.trim();
    !path.is_empty() && path != "${env.XMMS_PATH}"
}

#[cfg(not(feature = "desktop-shims"))]
fn connector_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "TransportConnector".to_string(),
        message: "A TransportConnector is required to reach the daemon. \
                 Desktop: enable the 'desktop-shims' feature to use the default SocketConnector. \
                 Other hosts: inject a connector over the platform's socket API."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_connector() -> Result<Arc<dyn TransportConnector>> {
    use bridge_desktop::SocketConnector;

    let connector: Arc<dyn TransportConnector> = Arc::new(SocketConnector::new());
    Ok(connector)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_connector() -> Result<Arc<dyn TransportConnector>> {
    Err(connector_missing_error())
}

/// Builder for constructing [`ClientConfig`] instances.
#[derive(Default)]
pub struct ClientConfigBuilder {
    client_name: Option<String>,
    address: Option<DaemonAddress>,
    poll_interval: Option<Duration>,
    sync_timeout: Option<Duration>,
    source_preference: Option<SourcePreference>,
    edit_source: Option<String>,
    event_buffer_size: Option<usize>,
    max_frame_size: Option<usize>,
    connector: Option<Arc<dyn TransportConnector>>,
}

impl ClientConfigBuilder {
    /// Sets the name announced to the daemon.
    ///
    /// Default: `xmms-client`
    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }

    /// Sets the daemon address explicitly.
    ///
    /// # Examples
    ///
    /// ```
    /// use bridge_traits::transport::DaemonAddress;
    /// use core_runtime::config::ClientConfig;
    ///
    /// let builder = ClientConfig::builder()
    ///     .address(DaemonAddress::unix("/run/xmms/ipc"));
    /// ```
    pub fn address(mut self, address: DaemonAddress) -> Self {
        self.address = Some(address);
        self
    }

    /// Connects over TCP to `ip:port`.
    pub fn server(mut self, ip: impl Into<String>, port: u16) -> Self {
        self.address = Some(DaemonAddress::tcp(ip, port));
        self
    }

    /// Sets the event-loop poll interval.
    ///
    /// Default: 20ms. Must lie within 1ms..=1s.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Sets the default timeout for blocking calls.
    ///
    /// Default: none (wait until the reply arrives or the connection closes)
    pub fn sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = Some(timeout);
        self
    }

    /// Sets the source preference for property dictionaries.
    pub fn source_preference(mut self, preference: SourcePreference) -> Self {
        self.source_preference = Some(preference);
        self
    }

    /// Sets the source name used when editing media-library properties.
    pub fn edit_source(mut self, source: impl Into<String>) -> Self {
        self.edit_source = Some(source.into());
        self
    }

    /// Sets the event bus buffer size.
    ///
    /// Default: 100
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Sets the largest accepted frame payload.
    ///
    /// Default: 16 MiB
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = Some(size);
        self
    }

    /// Sets the transport connector.
    ///
    /// If not provided, the desktop socket connector is used when the
    /// `desktop-shims` feature is enabled.
    pub fn connector(mut self, connector: Arc<dyn TransportConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Builds the final `ClientConfig` instance.
    ///
    /// # Returns
    ///
    /// Returns `Ok(ClientConfig)` on success, or an error if:
    /// - No connector was given and no platform default exists
    /// - Configuration values are invalid
    pub fn build(self) -> Result<ClientConfig> {
        let connector = match self.connector {
            Some(connector) => connector,
            None => provide_default_connector()?,
        };

        let config = ClientConfig {
            client_name: self
                .client_name
                .unwrap_or_else(|| DEFAULT_CLIENT_NAME.to_string()),
            address: self.address,
            poll_interval: self.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL),
            sync_timeout: self.sync_timeout,
            source_preference: self.source_preference.unwrap_or_default(),
            edit_source: self.edit_source.filter(|s| !s.is_empty()),
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
            max_frame_size: self.max_frame_size.unwrap_or(DEFAULT_MAX_FRAME_SIZE),
            connector,
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::transport::Transport;
    use std::path::PathBuf;

    struct NullConnector {
        default: Option<DaemonAddress>,
    }

    impl TransportConnector for NullConnector {
        fn connect(&self, address: &DaemonAddress) -> BridgeResult<Box<dyn Transport>> {
            Err(BridgeError::ConnectionFailed(address.to_string()))
        }

        fn default_address(&self) -> Option<DaemonAddress> {
            self.default.clone()
        }
    }

    fn connector() -> Arc<dyn TransportConnector> {
        Arc::new(NullConnector {
            default: Some(DaemonAddress::unix("/tmp/xmms-ipc-test")),
        })
    }

    #[test]
    fn test_builder_defaults() {
        let config = ClientConfig::builder()
            .connector(connector())
            .build()
            .unwrap();

        assert_eq!(config.client_name, DEFAULT_CLIENT_NAME);
        assert_eq!(config.poll_interval, Duration::from_millis(20));
        assert_eq!(config.sync_timeout, None);
        assert_eq!(config.event_buffer_size, DEFAULT_EVENT_BUFFER_SIZE);
        assert_eq!(config.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
        assert_eq!(config.source_preference, SourcePreference::default());
        assert!(config.edit_source.is_none());
    }

    #[test]
    fn test_builder_with_all_options() {
        let config = ClientConfig::builder()
            .client_name("player")
            .server("10.0.0.5", 7777)
            .poll_interval(Duration::from_millis(5))
            .sync_timeout(Duration::from_secs(2))
            .source_preference(SourcePreference::new(["client/*"]))
            .edit_source("client/player")
            .event_buffer_size(8)
            .max_frame_size(1024)
            .connector(connector())
            .build()
            .unwrap();

        assert_eq!(config.client_name, "player");
        assert_eq!(config.address, Some(DaemonAddress::tcp("10.0.0.5", 7777)));
        assert_eq!(config.sync_timeout, Some(Duration::from_secs(2)));
        assert_eq!(config.edit_source.as_deref(), Some("client/player"));
        assert_eq!(config.max_frame_size, 1024);
    }

    #[test]
    fn test_empty_client_name_rejected() {
        let result = ClientConfig::builder()
            .client_name("  ")
            .connector(connector())
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_poll_interval_bounds() {
        for interval in [Duration::ZERO, Duration::from_secs(2)] {
            let result = ClientConfig::builder()
                .poll_interval(interval)
                .connector(connector())
                .build();
            assert!(matches!(result, Err(Error::Config(_))));
        }
    }

    #[test]
    fn test_zero_sync_timeout_rejected() {
        let result = ClientConfig::builder()
            .sync_timeout(Duration::ZERO)
            .connector(connector())
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_buffers_rejected() {
        let result = ClientConfig::builder()
            .event_buffer_size(0)
            .connector(connector())
            .build();
        assert!(result.is_err());

        let result = ClientConfig::builder()
            .max_frame_size(0)
            .connector(connector())
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_explicit_address_wins() {
        let config = ClientConfig::builder()
            .server("127.0.0.1", 9667)
            .connector(connector())
            .build()
            .unwrap();
        assert_eq!(
            config.resolve_address_with(Some("unix:///elsewhere")).unwrap(),
            DaemonAddress::tcp("127.0.0.1", 9667)
        );
    }

    #[test]
    fn test_env_path_used_before_connector_default() {
        let config = ClientConfig::builder()
            .connector(connector())
            .build()
            .unwrap();
        assert_eq!(
            config.resolve_address_with(Some("tcp://media:1234")).unwrap(),
            DaemonAddress::tcp("media", 1234)
        );
    }

    #[test]
    fn test_placeholder_env_path_ignored() {
        let config = ClientConfig::builder()
            .connector(connector())
            .build()
            .unwrap();
        for env in [None, Some(""), Some("${env.XMMS_PATH}")] {
            assert_eq!(
                config.resolve_address_with(env).unwrap(),
                DaemonAddress::Unix(PathBuf::from("/tmp/xmms-ipc-test"))
            );
        }
    }

    #[test]
    fn test_invalid_env_path() {
        let config = ClientConfig::builder()
            .connector(connector())
            .build()
            .unwrap();
        assert!(matches!(
            config.resolve_address_with(Some("http://nope")),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_no_address_available() {
        let config = ClientConfig::builder()
            .connector(Arc::new(NullConnector { default: None }))
            .build()
            .unwrap();
        assert!(matches!(
            config.resolve_address_with(None),
            Err(Error::Config(_))
        ));
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_missing_connector_without_desktop_shims() {
        let result = ClientConfig::builder().build();
        match result {
            Err(Error::CapabilityMissing { capability, .. }) => {
                assert_eq!(capability, "TransportConnector")
            }
            other => panic!("expected CapabilityMissing, got {:?}", other),
        }
    }

    #[cfg(feature = "desktop-shims")]
    #[test]
    fn test_desktop_connector_injected() {
        let config = ClientConfig::builder().build().unwrap();
        assert!(config.connector.default_address().is_some());
    }
}
