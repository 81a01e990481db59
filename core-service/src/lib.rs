//! Core service façade and bootstrap helpers.
//!
//! [`MusicClient`] is the host-facing handle: typed playback, playlist,
//! configuration and media-library commands on top of the
//! [`core_client::Dispatcher`]. Desktop apps typically enable the
//! `desktop-shims` feature, which wires in the socket connector from
//! `bridge-desktop` and exposes [`bootstrap`].
//!
//! ```ignore
//! use core_service::{bootstrap, ClientEvent};
//! use std::sync::Arc;
//!
//! let client = bootstrap("my-player")?;
//! client.add_observer(Arc::new(|event: &ClientEvent| -> anyhow::Result<()> {
//!     println!("{:?}", event);
//!     Ok(())
//! }));
//! client.enable_broadcasts()?;
//! client.playlist_list_async()?;
//! println!("{}", client.mlib_get_title_sync(client.current_id_sync()?)?);
//! ```

pub mod client;
pub mod error;

pub use client::{MusicClient, PluginType};
pub use error::{Result, ServiceError};

pub use core_client::{ClientError, ClientEvent, ConnectionState, Observer, ObserverId};
pub use core_protocol::{Dict, PlaybackStatus, RequestId, SignalId, Title};
pub use core_runtime::config::ClientConfig;

/// Builds a client with the default socket connector and connects it.
#[cfg(feature = "desktop-shims")]
pub fn bootstrap(client_name: &str) -> Result<MusicClient> {
    let config = ClientConfig::builder()
        .client_name(client_name)
        .build()
        .map_err(|err| ServiceError::InitializationFailed(err.to_string()))?;
    let client = MusicClient::new(config)?;
    client.connect()?;
    tracing::info!(client_name, "Music client ready");
    Ok(client)
}
