//! Sync Protocol Messages

use serde::{Deserialize, Serialize};

use crate::media::MediaKind;

use super::state::PlayerState;

/// Information about a track for sync purposes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    /// Library song ID, also the transfer correlation id
    pub song_id: String,
    /// Song title
    pub title: String,
    /// Artist name
    pub artist: String,
    /// Album name
    pub album: String,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl TrackInfo {
    /// Track with only an id (metadata left empty)
    pub fn new(song_id: impl Into<String>) -> Self {
        Self {
            song_id: song_id.into(),
            title: String::new(),
            artist: String::new(),
            album: String::new(),
            duration_ms: 0,
        }
    }
}

/// A track together with the peer that holds its bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedTrack {
    pub track: TrackInfo,
    /// Peer to pull audio and cover bytes from
    pub sender_peer_id: String,
}

/// Messages exchanged between peers for synchronization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncMessage {
    // === Queue (from broadcaster) ===
    /// The broadcaster's queue advanced to this track
    TrackAnnounce {
        track: TrackInfo,
        sender_peer_id: String,
    },

    /// A track was queued for later; prefetch only
    QueueAnnounce {
        track: TrackInfo,
        sender_peer_id: String,
    },

    /// Everything announced so far, in order (sent to new peers)
    QueueSnapshot { entries: Vec<QueuedTrack> },

    // === Playback relay ===
    /// Player state transition (broadcaster only)
    PlayerState { state: PlayerState },

    /// Seek to position (broadcaster only)
    Seek { time_ms: u64 },

    // === Readiness handshake ===
    /// Broadcaster asks watchers to confirm they can start
    ReadyRequest { requested: bool },

    /// Watcher has the active song's bytes
    Ready,

    // === Binary transfer (pull model) ===
    /// Ask a peer for a song's audio bytes
    SongRequest { song_id: String },

    /// Ask a peer for a song's cover bytes
    CoverRequest { song_id: String },

    /// Audio bytes answering a SongRequest
    SongData { song_id: String, bytes: Vec<u8> },

    /// Cover bytes answering a CoverRequest
    CoverData { song_id: String, bytes: Vec<u8> },

    /// The responder does not hold the requested bytes
    Unavailable { kind: MediaKind, song_id: String },
}

impl SyncMessage {
    /// Check if this is a command only the broadcaster may originate
    pub fn requires_host(&self) -> bool {
        matches!(
            self,
            SyncMessage::TrackAnnounce { .. }
                | SyncMessage::QueueAnnounce { .. }
                | SyncMessage::QueueSnapshot { .. }
                | SyncMessage::PlayerState { .. }
                | SyncMessage::Seek { .. }
                | SyncMessage::ReadyRequest { .. }
        )
    }

    /// Short name for logging (payloads can be megabytes)
    pub fn name(&self) -> &'static str {
        match self {
            SyncMessage::TrackAnnounce { .. } => "TrackAnnounce",
            SyncMessage::QueueAnnounce { .. } => "QueueAnnounce",
            SyncMessage::QueueSnapshot { .. } => "QueueSnapshot",
            SyncMessage::PlayerState { .. } => "PlayerState",
            SyncMessage::Seek { .. } => "Seek",
            SyncMessage::ReadyRequest { .. } => "ReadyRequest",
            SyncMessage::Ready => "Ready",
            SyncMessage::SongRequest { .. } => "SongRequest",
            SyncMessage::CoverRequest { .. } => "CoverRequest",
            SyncMessage::SongData { .. } => "SongData",
            SyncMessage::CoverData { .. } => "CoverData",
            SyncMessage::Unavailable { .. } => "Unavailable",
        }
    }
}
