//! Room and Peer State

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::network::RoomCode;

/// Role of this peer in the current session
///
/// Set once when a room is created or joined and never changed until the
/// session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PeerRole {
    /// Not in a session
    #[default]
    Undefined,
    /// Owns the queue and transport state
    Broadcaster,
    /// Mirrors the broadcaster
    Watcher,
}

impl PeerRole {
    pub fn is_broadcaster(&self) -> bool {
        matches!(self, PeerRole::Broadcaster)
    }

    pub fn is_watcher(&self) -> bool {
        matches!(self, PeerRole::Watcher)
    }
}

/// Player state owned by the local playback engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerState {
    Playing,
    Paused,
    Stopped,
    Loading,
}

/// A song a watcher pulls from another peer
///
/// `path` is filled in locally once the bytes are cached and is never sent
/// over the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongRef {
    pub id: String,
    /// Peer holding the bytes
    pub sender_peer_id: String,
    /// Local cache path, once fetched
    pub path: Option<PathBuf>,
}

impl SongRef {
    pub fn new(id: impl Into<String>, sender_peer_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sender_peer_id: sender_peer_id.into(),
            path: None,
        }
    }

    /// Check if the bytes are known to be cached locally
    pub fn is_cached(&self) -> bool {
        self.path.is_some()
    }
}

/// Readiness state for synchronized start
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadyState {
    /// Broadcaster wants confirmation before issuing play
    pub requested: bool,
    /// Song the watcher is currently fetching
    pub current_fetch_target_id: Option<String>,
}

/// State of the room we are in
#[derive(Debug, Clone)]
pub struct RoomState {
    /// Room code for sharing
    pub room_code: RoomCode,
    /// Our peer ID
    pub local_peer_id: String,
    /// Broadcaster's peer ID
    pub host_peer_id: String,
    /// Our role, fixed for the lifetime of the room
    pub role: PeerRole,
    /// Peers we currently have a connection to
    pub connected_peers: HashSet<String>,
}

impl RoomState {
    /// Create room state for the peer that created the room
    pub fn new_as_host(room_code: RoomCode, local_peer_id: String) -> Self {
        Self {
            room_code,
            host_peer_id: local_peer_id.clone(),
            local_peer_id,
            role: PeerRole::Broadcaster,
            connected_peers: HashSet::new(),
        }
    }

    /// Create room state for a peer that joined someone else's room
    pub fn new_as_watcher(room_code: RoomCode, local_peer_id: String, host_peer_id: String) -> Self {
        let mut connected_peers = HashSet::new();
        connected_peers.insert(host_peer_id.clone());
        Self {
            room_code,
            local_peer_id,
            host_peer_id,
            role: PeerRole::Watcher,
            connected_peers,
        }
    }

    /// Check if we are the host
    pub fn is_host(&self) -> bool {
        self.local_peer_id == self.host_peer_id
    }

    /// Check if a peer is the host
    pub fn is_from_host(&self, peer_id: &str) -> bool {
        self.host_peer_id == peer_id
    }

    /// Connected peers, sorted for stable display
    pub fn peer_list(&self) -> Vec<String> {
        let mut peers: Vec<String> = self.connected_peers.iter().cloned().collect();
        peers.sort();
        peers
    }

    /// Record a peer connection. Returns true if it was new.
    pub fn add_peer(&mut self, peer_id: &str) -> bool {
        if peer_id == self.local_peer_id {
            return false;
        }
        self.connected_peers.insert(peer_id.to_string())
    }

    /// Forget a peer connection. Returns true if it was known.
    pub fn remove_peer(&mut self, peer_id: &str) -> bool {
        self.connected_peers.remove(peer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code() -> RoomCode {
        RoomCode::parse("ABCD-EFGH").unwrap()
    }

    #[test]
    fn test_host_room_state() {
        let state = RoomState::new_as_host(code(), "B".to_string());
        assert!(state.is_host());
        assert!(state.role.is_broadcaster());
        assert!(state.connected_peers.is_empty());
    }

    #[test]
    fn test_watcher_room_state() {
        let state = RoomState::new_as_watcher(code(), "W".to_string(), "B".to_string());
        assert!(!state.is_host());
        assert!(state.role.is_watcher());
        assert!(state.is_from_host("B"));
        assert!(!state.is_from_host("W2"));
        assert_eq!(state.peer_list(), vec!["B".to_string()]);
    }

    #[test]
    fn test_peer_tracking_ignores_self() {
        let mut state = RoomState::new_as_host(code(), "B".to_string());
        assert!(!state.add_peer("B"));
        assert!(state.add_peer("W2"));
        assert!(state.add_peer("W1"));
        assert!(!state.add_peer("W1"));
        assert_eq!(state.peer_list(), vec!["W1".to_string(), "W2".to_string()]);

        assert!(state.remove_peer("W1"));
        assert!(!state.remove_peer("W1"));
    }
}
