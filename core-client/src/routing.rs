//! # Event Routing
//!
//! Turns completed replies and subscription emissions into typed
//! [`ClientEvent`]s.
//!
//! ## Replies
//!
//! | Request | Event |
//! |---------|-------|
//! | `ConfigList` | `ConfigValueChanged` |
//! | `PlaybackStatus` | `PlaybackStatusChanged` |
//! | `PlaybackCurrentId`, `MedialibGetId` | `CurrentIdChanged` |
//! | `PlaybackPlaytime` | `PlaytimeChanged` |
//! | `VolumeGet` | `PlaybackVolumeChanged` |
//! | `PlaylistList`, `MedialibPlaylistList` | `PlaylistChanged` |
//! | `PlaylistCurrentPos` | `PlaylistPositionChanged` |
//! | `MedialibInfo` | `TitleChanged` |
//! | `MedialibSelect` | `MedialibSelect` |
//! | `MedialibPlaylistsList` | `PlaylistLoaded` |
//! | `PluginList` | `PluginList` |
//! | anything else | `Misc` |
//!
//! Emissions are mapped by signal the same way. Failures, including a
//! value of the wrong shape, become `ClientEvent::Error`.
//!
//! ## Playlist follow-ups
//!
//! A playlist-changed emission that does not carry the list asks for a
//! fresh `PlaylistList`; a non-empty playlist asks for the current
//! position. The dispatcher issues these as [`FollowUp`]s.

use core_protocol::{
    DecodeError, Dict, PlaybackStatus, RequestId, RequestKind, SignalId, SourcePreference,
    SubscriptionMode, Title, Value,
};
use core_runtime::events::{ClientEvent, EventOrigin};

use crate::error::{ClientError, Result};
use crate::result::Outcome;

/// Request issued as a consequence of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUp {
    ListPlaylist,
    CurrentPosition,
}

impl FollowUp {
    pub fn request(self) -> RequestKind {
        match self {
            FollowUp::ListPlaylist => RequestKind::PlaylistList,
            FollowUp::CurrentPosition => RequestKind::PlaylistCurrentPos,
        }
    }
}

/// Event produced by a reply or emission, plus any follow-up request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routed {
    pub event: Option<ClientEvent>,
    pub follow_up: Option<FollowUp>,
}

impl Routed {
    fn event(event: ClientEvent) -> Self {
        Self {
            event: Some(event),
            follow_up: None,
        }
    }
}

/// Routes the outcome of request `id`.
pub fn reply_event(
    id: RequestId,
    kind: RequestKind,
    outcome: &Outcome,
    pref: &SourcePreference,
) -> Routed {
    let origin = EventOrigin::Reply {
        request_id: id,
        request: kind,
    };
    let value = match outcome {
        Ok(value) => value,
        Err(e) => return Routed::event(error_event(origin, e)),
    };

    let routed = match kind {
        RequestKind::ConfigList => dict(value, pref)
            .map(|values| Routed::event(ClientEvent::ConfigValueChanged { origin, values })),
        RequestKind::PlaybackStatus => status(origin, value),
        RequestKind::PlaybackCurrentId | RequestKind::MedialibGetId => current_id(origin, value),
        RequestKind::PlaybackPlaytime => playtime(origin, value),
        RequestKind::VolumeGet => volume(origin, value, pref),
        RequestKind::PlaylistList | RequestKind::MedialibPlaylistList => {
            playlist(origin, value)
        }
        RequestKind::PlaylistCurrentPos => position(origin, value),
        RequestKind::MedialibInfo => title(value, pref)
            .map(|title| Routed::event(ClientEvent::TitleChanged { origin, title })),
        RequestKind::MedialibSelect => rows(value, pref)
            .map(|rows| Routed::event(ClientEvent::MedialibSelect { origin, rows })),
        RequestKind::MedialibPlaylistsList => playlists(origin, value),
        RequestKind::PluginList => plugins(value)
            .map(|plugins| Routed::event(ClientEvent::PluginList { origin, plugins })),
        _ => Ok(misc(origin, value)),
    };

    routed.unwrap_or_else(|e| Routed::event(error_event(origin, &e)))
}

/// Routes one emission of `signal`.
pub fn emission_event(signal: SignalId, outcome: &Outcome, pref: &SourcePreference) -> Routed {
    let origin = match signal.mode() {
        SubscriptionMode::Broadcast => EventOrigin::Broadcast { signal },
        SubscriptionMode::Signal => EventOrigin::Signal { signal },
    };
    let value = match outcome {
        Ok(value) => value,
        Err(e) => return Routed::event(error_event(origin, e)),
    };

    let routed = match signal {
        SignalId::ConfigValueChanged => dict(value, pref)
            .map(|values| Routed::event(ClientEvent::ConfigValueChanged { origin, values })),
        SignalId::PlaybackStatus => status(origin, value),
        SignalId::PlaybackVolumeChanged => volume(origin, value, pref),
        SignalId::PlaybackPlaytime => playtime(origin, value),
        SignalId::PlaybackCurrentId => current_id(origin, value),
        SignalId::PlaylistCurrentPos => position(origin, value),
        SignalId::PlaylistChanged => match value {
            Value::List(_) => playlist(origin, value),
            _ => Ok(Routed {
                event: None,
                follow_up: Some(FollowUp::ListPlaylist),
            }),
        },
        SignalId::MedialibEntryChanged | SignalId::MedialibEntryAdded => uint(value)
            .map(|id| Routed::event(ClientEvent::MedialibEntryChanged { origin, id })),
        SignalId::MedialibPlaylistLoaded => playlists(origin, value),
        SignalId::MediainfoReaderStatus => uint(value).map(|status| {
            Routed::event(ClientEvent::MediareaderStatusChanged { origin, status })
        }),
        _ => Ok(misc(origin, value)),
    };

    routed.unwrap_or_else(|e| Routed::event(error_event(origin, &e)))
}

/// Error event for a failed request or emission.
pub fn error_event(origin: EventOrigin, err: &ClientError) -> ClientEvent {
    ClientEvent::Error {
        origin,
        kind: err.kind(),
        message: err.to_string(),
    }
}

// ============================================================================
// Shapes
// ============================================================================

fn mismatch(expected: &'static str, found: &Value) -> ClientError {
    ClientError::Decode(DecodeError::UnexpectedType {
        expected,
        found: found.type_name(),
    })
}

/// Unsigned scalar reply.
pub fn uint(value: &Value) -> Result<u32> {
    value.as_uint().ok_or_else(|| mismatch("uint32", value))
}

/// Flat dictionary; property dictionaries are flattened by `pref`.
pub fn dict(value: &Value, pref: &SourcePreference) -> Result<Dict> {
    match value {
        Value::Dict(dict) => Ok(dict.clone()),
        Value::PropDict(props) => Ok(props.flatten(pref)),
        Value::None => Ok(Dict::new()),
        other => Err(mismatch("dict", other)),
    }
}

fn list(value: &Value) -> Result<&[Value]> {
    match value {
        Value::List(items) => Ok(items),
        Value::None => Ok(&[]),
        other => Err(mismatch("list", other)),
    }
}

fn status(origin: EventOrigin, value: &Value) -> Result<Routed> {
    let status = PlaybackStatus::from(uint(value)?);
    Ok(Routed::event(ClientEvent::PlaybackStatusChanged {
        origin,
        status,
    }))
}

fn current_id(origin: EventOrigin, value: &Value) -> Result<Routed> {
    let id = uint(value)?;
    Ok(Routed::event(ClientEvent::CurrentIdChanged { origin, id }))
}

fn playtime(origin: EventOrigin, value: &Value) -> Result<Routed> {
    let ms = uint(value)?;
    Ok(Routed::event(ClientEvent::PlaytimeChanged { origin, ms }))
}

fn position(origin: EventOrigin, value: &Value) -> Result<Routed> {
    let position = uint(value)?;
    Ok(Routed::event(ClientEvent::PlaylistPositionChanged {
        origin,
        position,
    }))
}

fn volume(origin: EventOrigin, value: &Value, pref: &SourcePreference) -> Result<Routed> {
    let volume = dict(value, pref)?;
    Ok(Routed::event(ClientEvent::PlaybackVolumeChanged {
        origin,
        volume,
    }))
}

fn playlist(origin: EventOrigin, value: &Value) -> Result<Routed> {
    let ids = ids(value)?;
    let follow_up = (!ids.is_empty()).then_some(FollowUp::CurrentPosition);
    Ok(Routed {
        event: Some(ClientEvent::PlaylistChanged { origin, ids }),
        follow_up,
    })
}

fn playlists(origin: EventOrigin, value: &Value) -> Result<Routed> {
    let names = names(value)?;
    Ok(Routed::event(ClientEvent::PlaylistLoaded { origin, names }))
}

/// Builds a title from a media-library entry.
pub fn title(value: &Value, pref: &SourcePreference) -> Result<Title> {
    match value {
        Value::PropDict(props) => Ok(Title::from_propdict(props, pref)),
        Value::Dict(dict) => Ok(Title::from_dict(dict)),
        other => Err(mismatch("propdict", other)),
    }
}

/// Rows of a media-library query.
pub fn rows(value: &Value, pref: &SourcePreference) -> Result<Vec<Dict>> {
    list(value)?.iter().map(|row| dict(row, pref)).collect()
}

/// Plugin short names mapped to descriptions.
pub fn plugins(value: &Value) -> Result<Dict> {
    let mut plugins = Dict::new();
    for item in list(value)? {
        let Value::Dict(entry) = item else {
            return Err(mismatch("dict", item));
        };
        if let Some(name) = entry.get("shortname") {
            plugins.insert(name, entry.get("description").unwrap_or_default());
        }
    }
    Ok(plugins)
}

/// Media-library ids of a playlist.
pub fn ids(value: &Value) -> Result<Vec<u32>> {
    list(value)?.iter().map(uint).collect()
}

/// Playlist names: a single name or a list of them.
pub fn names(value: &Value) -> Result<Vec<String>> {
    match value {
        Value::String(name) => Ok(vec![name.clone()]),
        other => list(other)?
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| mismatch("string", item))
            })
            .collect(),
    }
}

fn misc(origin: EventOrigin, value: &Value) -> Routed {
    Routed::event(ClientEvent::Misc {
        origin,
        value: value.clone(),
    })
}
