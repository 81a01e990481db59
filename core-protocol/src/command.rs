//! Request kinds, wire object/command ids, and subscribable signals.
//!
//! The daemon addresses every operation by an `(object, command)` pair.
//! [`RequestKind`] names the operations the client issues; [`SignalId`]
//! names the events a client can subscribe to.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol version announced in the `HELLO` handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// Wire object ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum Object {
    Main = 0,
    Playlist = 1,
    Config = 2,
    Output = 3,
    Medialib = 4,
    Signal = 5,
    Visualisation = 6,
    Bindata = 7,
}

/// Wire command ids. One global sequence shared by every object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum Command {
    Hello = 0,
    Quit = 1,
    Reply = 2,
    Error = 3,
    PluginList = 4,
    Shuffle = 5,
    SetPos = 6,
    SetPosRel = 7,
    Add = 8,
    AddId = 9,
    Remove = 10,
    Move = 11,
    List = 12,
    Clear = 13,
    Sort = 14,
    Save = 15,
    CurrentPos = 16,
    Insert = 17,
    GetValue = 18,
    SetValue = 19,
    RegValue = 20,
    ListValues = 21,
    Start = 22,
    Stop = 23,
    Pause = 24,
    DecoderKill = 25,
    CPlaytime = 26,
    SeekMs = 27,
    SeekSamples = 28,
    Status = 29,
    CurrentId = 30,
    Info = 31,
    Select = 32,
    PlaylistSaveCurrent = 33,
    PlaylistLoad = 34,
    AddToPlaylist = 35,
    PlaylistsList = 36,
    PlaylistList = 37,
    PlaylistImport = 38,
    PlaylistExport = 39,
    PlaylistRemove = 40,
    PathImport = 41,
    Rehash = 42,
    GetId = 43,
    Signal = 44,
    Broadcast = 45,
    SeekMsRel = 46,
    SeekSamplesRel = 47,
    VolumeSet = 48,
    VolumeGet = 49,
    InsertId = 50,
    PropertySet = 51,
    PropertyRemove = 52,
    BindataAdd = 53,
    BindataRetrieve = 54,
    BindataRemove = 55,
}

// ============================================================================
// Signals
// ============================================================================

/// How a subscription keeps delivering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriptionMode {
    /// Delivers every emission until cancelled
    Broadcast,
    /// Delivers one emission, then must be re-issued
    Signal,
}

/// Events a client can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SignalId {
    ObjectDestroyed,
    PlaylistChanged,
    ConfigValueChanged,
    PlaybackStatus,
    PlaybackVolumeChanged,
    PlaybackPlaytime,
    PlaybackCurrentId,
    OutputOpenFail,
    PlaylistCurrentPos,
    MedialibEntryChanged,
    MedialibPlaylistLoaded,
    TransportMimetype,
    DecoderThreadExit,
    VisualisationData,
    MedialibEntryAdded,
    MediainfoReaderStatus,
    MediainfoReaderUnindexed,
}

impl SignalId {
    pub const ALL: [SignalId; 17] = [
        SignalId::ObjectDestroyed,
        SignalId::PlaylistChanged,
        SignalId::ConfigValueChanged,
        SignalId::PlaybackStatus,
        SignalId::PlaybackVolumeChanged,
        SignalId::PlaybackPlaytime,
        SignalId::PlaybackCurrentId,
        SignalId::OutputOpenFail,
        SignalId::PlaylistCurrentPos,
        SignalId::MedialibEntryChanged,
        SignalId::MedialibPlaylistLoaded,
        SignalId::TransportMimetype,
        SignalId::DecoderThreadExit,
        SignalId::VisualisationData,
        SignalId::MedialibEntryAdded,
        SignalId::MediainfoReaderStatus,
        SignalId::MediainfoReaderUnindexed,
    ];

    /// Subscriptions established when broadcasts are enabled.
    pub const DEFAULT_SUBSCRIPTIONS: [SignalId; 12] = [
        SignalId::ConfigValueChanged,
        SignalId::PlaylistCurrentPos,
        SignalId::PlaybackCurrentId,
        SignalId::PlaybackVolumeChanged,
        SignalId::PlaybackStatus,
        SignalId::PlaylistChanged,
        SignalId::MedialibEntryChanged,
        SignalId::MedialibEntryAdded,
        SignalId::MedialibPlaylistLoaded,
        SignalId::MediainfoReaderStatus,
        SignalId::PlaybackPlaytime,
        SignalId::MediainfoReaderUnindexed,
    ];

    /// Wire id carried as the subscribe request's argument.
    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    pub fn mode(self) -> SubscriptionMode {
        match self {
            SignalId::PlaybackPlaytime
            | SignalId::VisualisationData
            | SignalId::MediainfoReaderUnindexed => SubscriptionMode::Signal,
            _ => SubscriptionMode::Broadcast,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SignalId::ObjectDestroyed => "object.destroyed",
            SignalId::PlaylistChanged => "playlist.changed",
            SignalId::ConfigValueChanged => "config.value_changed",
            SignalId::PlaybackStatus => "playback.status",
            SignalId::PlaybackVolumeChanged => "playback.volume_changed",
            SignalId::PlaybackPlaytime => "playback.playtime",
            SignalId::PlaybackCurrentId => "playback.current_id",
            SignalId::OutputOpenFail => "output.open_fail",
            SignalId::PlaylistCurrentPos => "playlist.current_pos",
            SignalId::MedialibEntryChanged => "medialib.entry_changed",
            SignalId::MedialibPlaylistLoaded => "medialib.playlist_loaded",
            SignalId::TransportMimetype => "transport.mimetype",
            SignalId::DecoderThreadExit => "decoder.thread_exit",
            SignalId::VisualisationData => "visualisation.data",
            SignalId::MedialibEntryAdded => "medialib.entry_added",
            SignalId::MediainfoReaderStatus => "mediainfo_reader.status",
            SignalId::MediainfoReaderUnindexed => "mediainfo_reader.unindexed",
        }
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Request kinds
// ============================================================================

/// Operation tag of an outgoing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    Hello,
    Quit,
    PluginList,

    PlaylistShuffle,
    PlaylistSetNext,
    PlaylistSetNextRel,
    PlaylistAdd,
    PlaylistAddId,
    PlaylistInsert,
    PlaylistInsertId,
    PlaylistRemove,
    PlaylistMove,
    PlaylistList,
    PlaylistClear,
    PlaylistSort,
    PlaylistCurrentPos,

    ConfigGet,
    ConfigSet,
    ConfigRegister,
    ConfigList,

    PlaybackStart,
    PlaybackStop,
    PlaybackPause,
    PlaybackTickle,
    PlaybackPlaytime,
    PlaybackSeekMs,
    PlaybackSeekMsRel,
    PlaybackSeekSamples,
    PlaybackSeekSamplesRel,
    PlaybackStatus,
    PlaybackCurrentId,
    VolumeSet,
    VolumeGet,

    MedialibInfo,
    MedialibSelect,
    MedialibAddEntry,
    MedialibRemoveEntry,
    MedialibAddToPlaylist,
    MedialibPlaylistSaveCurrent,
    MedialibPlaylistLoad,
    MedialibPlaylistsList,
    MedialibPlaylistList,
    MedialibPlaylistImport,
    MedialibPlaylistExport,
    MedialibPlaylistRemove,
    MedialibPathImport,
    MedialibRehash,
    MedialibGetId,
    MedialibPropertySet,
    MedialibPropertyRemove,

    /// Store a binary blob; the reply is its content hash
    BindataAdd,
    BindataRetrieve,
    BindataRemove,

    /// Subscribe to a broadcast or signal
    Subscribe(SignalId),

    /// Raw `(object, command)` pair for operations without a named kind
    Custom { object: u32, command: u32 },
}

impl RequestKind {
    /// Wire `(object, command)` pair.
    pub fn wire(self) -> (u32, u32) {
        use Command as C;
        use Object as O;

        let (object, command) = match self {
            RequestKind::Hello => (O::Main, C::Hello),
            RequestKind::Quit => (O::Main, C::Quit),
            RequestKind::PluginList => (O::Main, C::PluginList),

            RequestKind::PlaylistShuffle => (O::Playlist, C::Shuffle),
            RequestKind::PlaylistSetNext => (O::Playlist, C::SetPos),
            RequestKind::PlaylistSetNextRel => (O::Playlist, C::SetPosRel),
            RequestKind::PlaylistAdd => (O::Playlist, C::Add),
            RequestKind::PlaylistAddId => (O::Playlist, C::AddId),
            RequestKind::PlaylistInsert => (O::Playlist, C::Insert),
            RequestKind::PlaylistInsertId => (O::Playlist, C::InsertId),
            RequestKind::PlaylistRemove => (O::Playlist, C::Remove),
            RequestKind::PlaylistMove => (O::Playlist, C::Move),
            RequestKind::PlaylistList => (O::Playlist, C::List),
            RequestKind::PlaylistClear => (O::Playlist, C::Clear),
            RequestKind::PlaylistSort => (O::Playlist, C::Sort),
            RequestKind::PlaylistCurrentPos => (O::Playlist, C::CurrentPos),

            RequestKind::ConfigGet => (O::Config, C::GetValue),
            RequestKind::ConfigSet => (O::Config, C::SetValue),
            RequestKind::ConfigRegister => (O::Config, C::RegValue),
            RequestKind::ConfigList => (O::Config, C::ListValues),

            RequestKind::PlaybackStart => (O::Output, C::Start),
            RequestKind::PlaybackStop => (O::Output, C::Stop),
            RequestKind::PlaybackPause => (O::Output, C::Pause),
            RequestKind::PlaybackTickle => (O::Output, C::DecoderKill),
            RequestKind::PlaybackPlaytime => (O::Output, C::CPlaytime),
            RequestKind::PlaybackSeekMs => (O::Output, C::SeekMs),
            RequestKind::PlaybackSeekMsRel => (O::Output, C::SeekMsRel),
            RequestKind::PlaybackSeekSamples => (O::Output, C::SeekSamples),
            RequestKind::PlaybackSeekSamplesRel => (O::Output, C::SeekSamplesRel),
            RequestKind::PlaybackStatus => (O::Output, C::Status),
            RequestKind::PlaybackCurrentId => (O::Output, C::CurrentId),
            RequestKind::VolumeSet => (O::Output, C::VolumeSet),
            RequestKind::VolumeGet => (O::Output, C::VolumeGet),

            RequestKind::MedialibInfo => (O::Medialib, C::Info),
            RequestKind::MedialibSelect => (O::Medialib, C::Select),
            RequestKind::MedialibAddEntry => (O::Medialib, C::Add),
            RequestKind::MedialibRemoveEntry => (O::Medialib, C::Remove),
            RequestKind::MedialibAddToPlaylist => (O::Medialib, C::AddToPlaylist),
            RequestKind::MedialibPlaylistSaveCurrent => (O::Medialib, C::PlaylistSaveCurrent),
            RequestKind::MedialibPlaylistLoad => (O::Medialib, C::PlaylistLoad),
            RequestKind::MedialibPlaylistsList => (O::Medialib, C::PlaylistsList),
            RequestKind::MedialibPlaylistList => (O::Medialib, C::PlaylistList),
            RequestKind::MedialibPlaylistImport => (O::Medialib, C::PlaylistImport),
            RequestKind::MedialibPlaylistExport => (O::Medialib, C::PlaylistExport),
            RequestKind::MedialibPlaylistRemove => (O::Medialib, C::PlaylistRemove),
            RequestKind::MedialibPathImport => (O::Medialib, C::PathImport),
            RequestKind::MedialibRehash => (O::Medialib, C::Rehash),
            RequestKind::MedialibGetId => (O::Medialib, C::GetId),
            RequestKind::MedialibPropertySet => (O::Medialib, C::PropertySet),
            RequestKind::MedialibPropertyRemove => (O::Medialib, C::PropertyRemove),

            RequestKind::BindataAdd => (O::Bindata, C::BindataAdd),
            RequestKind::BindataRetrieve => (O::Bindata, C::BindataRetrieve),
            RequestKind::BindataRemove => (O::Bindata, C::BindataRemove),

            RequestKind::Subscribe(signal) => match signal.mode() {
                SubscriptionMode::Broadcast => (O::Signal, C::Broadcast),
                SubscriptionMode::Signal => (O::Signal, C::Signal),
            },

            RequestKind::Custom { object, command } => return (object, command),
        };

        (object as u32, command as u32)
    }

    pub fn object(self) -> u32 {
        self.wire().0
    }

    pub fn command(self) -> u32 {
        self.wire().1
    }
}

// ============================================================================
// Playback status
// ============================================================================

/// Output state reported by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackStatus {
    Stopped,
    Playing,
    Paused,
    Unknown(u32),
}

impl From<u32> for PlaybackStatus {
    fn from(v: u32) -> Self {
        match v {
            0 => PlaybackStatus::Stopped,
            1 => PlaybackStatus::Playing,
            2 => PlaybackStatus::Paused,
            other => PlaybackStatus::Unknown(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_ids() {
        assert_eq!(RequestKind::Hello.wire(), (0, 0));
        assert_eq!(RequestKind::PlaylistList.wire(), (1, 12));
        assert_eq!(RequestKind::ConfigList.wire(), (2, 21));
        assert_eq!(RequestKind::BindataAdd.wire(), (7, 53));
        assert_eq!(RequestKind::PlaybackStatus.wire(), (3, 29));
        assert_eq!(RequestKind::MedialibInfo.wire(), (4, 31));
        assert_eq!(
            RequestKind::Custom {
                object: 9,
                command: 99
            }
            .wire(),
            (9, 99)
        );
    }

    #[test]
    fn test_subscribe_command_follows_mode() {
        assert_eq!(
            RequestKind::Subscribe(SignalId::PlaybackStatus).wire(),
            (5, Command::Broadcast as u32)
        );
        assert_eq!(
            RequestKind::Subscribe(SignalId::PlaybackPlaytime).wire(),
            (5, Command::Signal as u32)
        );
    }

    #[test]
    fn test_signal_ids_round_trip() {
        for signal in SignalId::ALL {
            assert_eq!(SignalId::from_id(signal.id()), Some(signal));
        }
        assert_eq!(SignalId::VisualisationData.id(), 13);
        assert_eq!(SignalId::from_id(100), None);
    }

    #[test]
    fn test_signal_modes() {
        assert_eq!(SignalId::PlaybackPlaytime.mode(), SubscriptionMode::Signal);
        assert_eq!(
            SignalId::MediainfoReaderUnindexed.mode(),
            SubscriptionMode::Signal
        );
        assert_eq!(
            SignalId::PlaylistChanged.mode(),
            SubscriptionMode::Broadcast
        );
    }

    #[test]
    fn test_playback_status_from_wire() {
        assert_eq!(PlaybackStatus::from(0), PlaybackStatus::Stopped);
        assert_eq!(PlaybackStatus::from(1), PlaybackStatus::Playing);
        assert_eq!(PlaybackStatus::from(2), PlaybackStatus::Paused);
        assert_eq!(PlaybackStatus::from(7), PlaybackStatus::Unknown(7));
    }
}
