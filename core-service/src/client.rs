//! Typed command surface over a [`Dispatcher`].
//!
//! Commands and `*_async` queries go out on the async connection; their
//! replies reach observers as [`ClientEvent`]s. `*_sync` queries block on
//! the dedicated connection and return typed values.

use std::sync::Arc;
use tracing::debug;

use core_client::{routing, ClientEvent, ConnectionState, Dispatcher, Observer, ObserverId};
use core_protocol::{Dict, PlaybackStatus, RequestId, RequestKind, SignalId, Title, Value};
use core_runtime::config::ClientConfig;
use core_runtime::events::Receiver;

use crate::error::{Result, ServiceError};

/// Plugin category passed to the plugin listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum PluginType {
    #[default]
    All = 0,
    Output = 1,
    Playlist = 2,
    Effect = 3,
    Xform = 4,
}

/// Music daemon client.
#[derive(Debug)]
pub struct MusicClient {
    dispatcher: Dispatcher,
}

impl MusicClient {
    /// Creates a disconnected client.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Ok(Self {
            dispatcher: Dispatcher::new(config)?,
        })
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn connect(&self) -> Result<()> {
        Ok(self.dispatcher.connect()?)
    }

    pub fn disconnect(&self) {
        self.dispatcher.disconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.dispatcher.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.dispatcher.state()
    }

    pub fn enable_broadcasts(&self) -> Result<()> {
        Ok(self.dispatcher.enable_broadcasts()?)
    }

    pub fn disable_broadcasts(&self) {
        self.dispatcher.disable_broadcasts();
    }

    /// Opts into a broadcast or signal outside the default set, such as
    /// visualisation data.
    pub fn subscribe(&self, signal: SignalId) -> Result<()> {
        Ok(self.dispatcher.subscribe(signal)?)
    }

    pub fn add_observer(&self, observer: Arc<dyn Observer>) -> ObserverId {
        self.dispatcher.add_observer(observer)
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.dispatcher.remove_observer(id)
    }

    pub fn subscribe_events(&self) -> Receiver<ClientEvent> {
        self.dispatcher.subscribe_events()
    }

    fn issue(&self, kind: RequestKind, args: &[Value]) -> Result<RequestId> {
        Ok(self.dispatcher.issue(kind, args)?)
    }

    /// Issues `kind` and then a decoder tickle so the change takes effect
    /// immediately. Returns the id of the first request.
    fn issue_and_tickle(&self, kind: RequestKind, args: &[Value]) -> Result<RequestId> {
        let id = self.issue(kind, args)?;
        self.issue(RequestKind::PlaybackTickle, &[])?;
        Ok(id)
    }

    fn wait(&self, kind: RequestKind, args: &[Value]) -> Result<Value> {
        Ok(self.dispatcher.issue_and_wait(kind, args)?)
    }

    // ========================================================================
    // Playback
    // ========================================================================

    pub fn play(&self) -> Result<RequestId> {
        self.issue(RequestKind::PlaybackStart, &[])
    }

    pub fn stop(&self) -> Result<RequestId> {
        self.issue(RequestKind::PlaybackStop, &[])
    }

    pub fn pause(&self) -> Result<RequestId> {
        self.issue(RequestKind::PlaybackPause, &[])
    }

    pub fn next(&self) -> Result<RequestId> {
        self.jump_by(1)
    }

    pub fn prev(&self) -> Result<RequestId> {
        self.jump_by(-1)
    }

    /// Moves `offset` entries through the playlist and skips there.
    pub fn jump_by(&self, offset: i32) -> Result<RequestId> {
        self.issue_and_tickle(RequestKind::PlaylistSetNextRel, &[Value::Int(offset)])
    }

    /// Skips to the playlist entry at `position`.
    pub fn set_next(&self, position: u32) -> Result<RequestId> {
        self.issue_and_tickle(RequestKind::PlaylistSetNext, &[Value::UInt(position)])
    }

    pub fn seek(&self, ms: u32) -> Result<RequestId> {
        self.issue_and_tickle(RequestKind::PlaybackSeekMs, &[Value::UInt(ms)])
    }

    pub fn seek_rel(&self, ms: i32) -> Result<RequestId> {
        self.issue_and_tickle(RequestKind::PlaybackSeekMsRel, &[Value::Int(ms)])
    }

    pub fn seek_samples(&self, samples: u32) -> Result<RequestId> {
        self.issue_and_tickle(RequestKind::PlaybackSeekSamples, &[Value::UInt(samples)])
    }

    pub fn seek_samples_rel(&self, samples: i32) -> Result<RequestId> {
        self.issue_and_tickle(RequestKind::PlaybackSeekSamplesRel, &[Value::Int(samples)])
    }

    pub fn volume_set(&self, channel: &str, volume: u32) -> Result<RequestId> {
        self.issue(
            RequestKind::VolumeSet,
            &[Value::from(channel), Value::UInt(volume)],
        )
    }

    /// Asks the daemon to exit.
    pub fn quit_daemon(&self) -> Result<RequestId> {
        self.issue(RequestKind::Quit, &[])
    }

    // ========================================================================
    // Playlist
    // ========================================================================

    pub fn shuffle(&self) -> Result<RequestId> {
        self.issue(RequestKind::PlaylistShuffle, &[])
    }

    pub fn clear(&self) -> Result<RequestId> {
        self.issue(RequestKind::PlaylistClear, &[])
    }

    pub fn add_id(&self, id: u32) -> Result<RequestId> {
        self.issue(RequestKind::PlaylistAddId, &[Value::UInt(id)])
    }

    pub fn add_url(&self, url: &str) -> Result<RequestId> {
        self.issue(RequestKind::PlaylistAdd, &[Value::from(url)])
    }

    pub fn insert_id(&self, position: u32, id: u32) -> Result<RequestId> {
        self.issue(
            RequestKind::PlaylistInsertId,
            &[Value::UInt(position), Value::UInt(id)],
        )
    }

    pub fn insert_url(&self, position: u32, url: &str) -> Result<RequestId> {
        self.issue(
            RequestKind::PlaylistInsert,
            &[Value::UInt(position), Value::from(url)],
        )
    }

    pub fn remove_index(&self, position: u32) -> Result<RequestId> {
        self.issue(RequestKind::PlaylistRemove, &[Value::UInt(position)])
    }

    /// Sorts the playlist by a media-library property.
    pub fn sort(&self, property: &str) -> Result<RequestId> {
        self.issue(RequestKind::PlaylistSort, &[Value::from(property)])
    }

    pub fn move_entry(&self, from: u32, to: u32) -> Result<RequestId> {
        self.issue_and_tickle(
            RequestKind::PlaylistMove,
            &[Value::UInt(from), Value::UInt(to)],
        )
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    pub fn configval_set(&self, key: &str, value: &str) -> Result<RequestId> {
        self.issue(RequestKind::ConfigSet, &[Value::from(key), Value::from(value)])
    }

    /// Registers a client configuration value with its default.
    pub fn configval_register(&self, key: &str, default: &str) -> Result<RequestId> {
        self.issue(
            RequestKind::ConfigRegister,
            &[Value::from(key), Value::from(default)],
        )
    }

    // ========================================================================
    // Media library
    // ========================================================================

    pub fn mlib_add_url(&self, url: &str) -> Result<RequestId> {
        self.issue(RequestKind::MedialibAddEntry, &[Value::from(url)])
    }

    /// Appends every entry matched by `query` to the playlist.
    pub fn mlib_add_to_playlist(&self, query: &str) -> Result<RequestId> {
        self.issue(RequestKind::MedialibAddToPlaylist, &[Value::from(query)])
    }

    pub fn mlib_remove_id(&self, id: u32) -> Result<RequestId> {
        self.issue(RequestKind::MedialibRemoveEntry, &[Value::UInt(id)])
    }

    /// Sets a property of entry `id`, under the configured edit source if any.
    pub fn mlib_property_set(&self, id: u32, key: &str, value: &str) -> Result<RequestId> {
        let args = property_args(
            id,
            self.dispatcher.config().edit_source.as_deref(),
            &[key, value],
        );
        self.issue(RequestKind::MedialibPropertySet, &args)
    }

    /// Removes a property of entry `id`, under the configured edit source if any.
    pub fn mlib_property_remove(&self, id: u32, key: &str) -> Result<RequestId> {
        let args = property_args(
            id,
            self.dispatcher.config().edit_source.as_deref(),
            &[key],
        );
        self.issue(RequestKind::MedialibPropertyRemove, &args)
    }

    pub fn save_current_playlist(&self, name: &str) -> Result<RequestId> {
        self.issue(RequestKind::MedialibPlaylistSaveCurrent, &[Value::from(name)])
    }

    pub fn mlib_import_playlist(&self, name: &str, url: &str) -> Result<RequestId> {
        self.issue(
            RequestKind::MedialibPlaylistImport,
            &[Value::from(name), Value::from(url)],
        )
    }

    pub fn mlib_export_playlist(&self, name: &str, mime: &str) -> Result<RequestId> {
        self.issue(
            RequestKind::MedialibPlaylistExport,
            &[Value::from(name), Value::from(mime)],
        )
    }

    pub fn mlib_load_playlist(&self, name: &str) -> Result<RequestId> {
        self.issue(RequestKind::MedialibPlaylistLoad, &[Value::from(name)])
    }

    pub fn mlib_remove_playlist(&self, name: &str) -> Result<RequestId> {
        self.issue(RequestKind::MedialibPlaylistRemove, &[Value::from(name)])
    }

    /// Re-reads the metadata of entry `id`; `0` rehashes the whole library.
    pub fn mlib_rehash(&self, id: u32) -> Result<RequestId> {
        self.issue(RequestKind::MedialibRehash, &[Value::UInt(id)])
    }

    pub fn mlib_path_import(&self, path: &str) -> Result<RequestId> {
        self.issue(RequestKind::MedialibPathImport, &[Value::from(path)])
    }

    // ========================================================================
    // Binary data
    // ========================================================================

    /// Stores `data` on the daemon. The reply carries its hash.
    pub fn bindata_add(&self, data: &[u8]) -> Result<RequestId> {
        self.issue(RequestKind::BindataAdd, &[Value::Binary(data.to_vec())])
    }

    pub fn bindata_remove(&self, hash: &str) -> Result<RequestId> {
        self.issue(RequestKind::BindataRemove, &[Value::from(hash)])
    }

    /// Stores `data` and returns the hash it is filed under.
    pub fn bindata_add_sync(&self, data: &[u8]) -> Result<String> {
        let kind = RequestKind::BindataAdd;
        let value = self.wait(kind, &[Value::Binary(data.to_vec())])?;
        match value {
            Value::String(hash) => Ok(hash),
            other => Err(unexpected(kind, "string", &other)),
        }
    }

    pub fn bindata_retrieve_sync(&self, hash: &str) -> Result<Vec<u8>> {
        let kind = RequestKind::BindataRetrieve;
        let value = self.wait(kind, &[Value::from(hash)])?;
        match value {
            Value::Binary(data) => Ok(data),
            other => Err(unexpected(kind, "binary", &other)),
        }
    }

    // ========================================================================
    // Async queries
    // ========================================================================

    /// Every configuration value, delivered as `ConfigValueChanged`.
    pub fn configval_list_async(&self) -> Result<RequestId> {
        self.issue(RequestKind::ConfigList, &[])
    }

    pub fn configval_get_async(&self, key: &str) -> Result<RequestId> {
        self.issue(RequestKind::ConfigGet, &[Value::from(key)])
    }

    pub fn volume_get_async(&self) -> Result<RequestId> {
        self.issue(RequestKind::VolumeGet, &[])
    }

    /// The active playlist, delivered as `PlaylistChanged`.
    pub fn playlist_list_async(&self) -> Result<RequestId> {
        self.issue(RequestKind::PlaylistList, &[])
    }

    /// Metadata of entry `id`, delivered as `TitleChanged`.
    pub fn mlib_get_title_async(&self, id: u32) -> Result<RequestId> {
        self.issue(RequestKind::MedialibInfo, &[Value::UInt(id)])
    }

    pub fn playlist_current_index_async(&self) -> Result<RequestId> {
        self.issue(RequestKind::PlaylistCurrentPos, &[])
    }

    pub fn playback_status_async(&self) -> Result<RequestId> {
        self.issue(RequestKind::PlaybackStatus, &[])
    }

    pub fn playtime_async(&self) -> Result<RequestId> {
        self.issue(RequestKind::PlaybackPlaytime, &[])
    }

    pub fn mlib_select_async(&self, query: &str) -> Result<RequestId> {
        self.issue(RequestKind::MedialibSelect, &[Value::from(query)])
    }

    pub fn mlib_playlist_list_async(&self, name: &str) -> Result<RequestId> {
        self.issue(RequestKind::MedialibPlaylistList, &[Value::from(name)])
    }

    pub fn mlib_playlists_list_async(&self) -> Result<RequestId> {
        self.issue(RequestKind::MedialibPlaylistsList, &[])
    }

    pub fn mlib_get_id_async(&self, url: &str) -> Result<RequestId> {
        self.issue(RequestKind::MedialibGetId, &[Value::from(url)])
    }

    pub fn current_id_async(&self) -> Result<RequestId> {
        self.issue(RequestKind::PlaybackCurrentId, &[])
    }

    pub fn plugins_list_async(&self, plugin_type: PluginType) -> Result<RequestId> {
        self.issue(RequestKind::PluginList, &[Value::UInt(plugin_type as u32)])
    }

    // ========================================================================
    // Blocking queries
    // ========================================================================

    pub fn configval_list_sync(&self) -> Result<Dict> {
        let value = self.wait(RequestKind::ConfigList, &[])?;
        Ok(routing::dict(&value, &self.dispatcher.config().source_preference)?)
    }

    pub fn configval_get_sync(&self, key: &str) -> Result<String> {
        let kind = RequestKind::ConfigGet;
        let value = self.wait(kind, &[Value::from(key)])?;
        value
            .scalar_string()
            .ok_or_else(|| unexpected(kind, "string", &value))
    }

    pub fn volume_get_sync(&self) -> Result<Dict> {
        let value = self.wait(RequestKind::VolumeGet, &[])?;
        Ok(routing::dict(&value, &self.dispatcher.config().source_preference)?)
    }

    pub fn playlist_list_sync(&self) -> Result<Vec<u32>> {
        let value = self.wait(RequestKind::PlaylistList, &[])?;
        Ok(routing::ids(&value)?)
    }

    pub fn mlib_get_title_sync(&self, id: u32) -> Result<Title> {
        let value = self.wait(RequestKind::MedialibInfo, &[Value::UInt(id)])?;
        let title = routing::title(&value, &self.dispatcher.config().source_preference)?;
        debug!(id, title = %title, "Title fetched");
        Ok(title)
    }

    pub fn playlist_current_index_sync(&self) -> Result<u32> {
        let value = self.wait(RequestKind::PlaylistCurrentPos, &[])?;
        Ok(routing::uint(&value)?)
    }

    pub fn playback_status_sync(&self) -> Result<PlaybackStatus> {
        let value = self.wait(RequestKind::PlaybackStatus, &[])?;
        Ok(PlaybackStatus::from(routing::uint(&value)?))
    }

    /// Playback position in milliseconds.
    pub fn playtime_sync(&self) -> Result<u32> {
        let value = self.wait(RequestKind::PlaybackPlaytime, &[])?;
        Ok(routing::uint(&value)?)
    }

    pub fn mlib_select_sync(&self, query: &str) -> Result<Vec<Dict>> {
        let value = self.wait(RequestKind::MedialibSelect, &[Value::from(query)])?;
        Ok(routing::rows(&value, &self.dispatcher.config().source_preference)?)
    }

    pub fn mlib_playlist_list_sync(&self, name: &str) -> Result<Vec<u32>> {
        let value = self.wait(RequestKind::MedialibPlaylistList, &[Value::from(name)])?;
        Ok(routing::ids(&value)?)
    }

    pub fn mlib_playlists_list_sync(&self) -> Result<Vec<String>> {
        let value = self.wait(RequestKind::MedialibPlaylistsList, &[])?;
        Ok(routing::names(&value)?)
    }

    pub fn mlib_get_id_sync(&self, url: &str) -> Result<u32> {
        let value = self.wait(RequestKind::MedialibGetId, &[Value::from(url)])?;
        Ok(routing::uint(&value)?)
    }

    pub fn current_id_sync(&self) -> Result<u32> {
        let value = self.wait(RequestKind::PlaybackCurrentId, &[])?;
        Ok(routing::uint(&value)?)
    }

    /// Plugin short names mapped to their descriptions.
    pub fn plugins_list_sync(&self, plugin_type: PluginType) -> Result<Dict> {
        let value = self.wait(RequestKind::PluginList, &[Value::UInt(plugin_type as u32)])?;
        Ok(routing::plugins(&value)?)
    }
}

/// Arguments of a property edit: the entry id, the edit source when one is
/// configured, then `fields`.
fn property_args(id: u32, source: Option<&str>, fields: &[&str]) -> Vec<Value> {
    let mut args = vec![Value::UInt(id)];
    if let Some(source) = source.filter(|s| !s.is_empty()) {
        args.push(Value::from(source));
    }
    args.extend(fields.iter().map(|field| Value::from(*field)));
    args
}

fn unexpected(request: RequestKind, expected: &'static str, found: &Value) -> ServiceError {
    ServiceError::UnexpectedReply {
        request,
        expected,
        found: found.type_name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_args_without_source() {
        assert_eq!(
            property_args(7, None, &["artist", "Someone"]),
            vec![Value::UInt(7), Value::from("artist"), Value::from("Someone")]
        );
        assert_eq!(
            property_args(7, Some(""), &["artist"]),
            vec![Value::UInt(7), Value::from("artist")]
        );
    }

    #[test]
    fn test_property_args_with_source() {
        assert_eq!(
            property_args(7, Some("client/tagger"), &["artist", "Someone"]),
            vec![
                Value::UInt(7),
                Value::from("client/tagger"),
                Value::from("artist"),
                Value::from("Someone"),
            ]
        );
    }

    #[test]
    fn test_plugin_type_wire_values() {
        assert_eq!(PluginType::default() as u32, 0);
        assert_eq!(PluginType::Output as u32, 1);
        assert_eq!(PluginType::Xform as u32, 4);
    }

    #[test]
    fn test_unexpected_reply_message() {
        let err = unexpected(RequestKind::ConfigGet, "string", &Value::List(vec![]));
        assert_eq!(
            err.to_string(),
            "Unexpected reply to ConfigGet: expected string, got list"
        );
    }
}
