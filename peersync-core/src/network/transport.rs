//! Transport Adapter contract
//!
//! The session never talks to sockets directly. A transport delivers
//! [`SyncMessage`]s point-to-point, reliably and in order per peer pair, and
//! reports connection changes on an inbound event channel handed to the
//! session at startup.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sync::SyncMessage;

use super::RoomCode;

/// Connectivity of a single peer pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Failed,
}

/// Events delivered by the transport to the session
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Received a sync message from a peer
    Message { from: String, message: SyncMessage },
    /// A peer's connection changed
    ConnectionState {
        peer_id: String,
        state: ConnectionState,
    },
    /// Transport-level failure not tied to a single send
    Error(String),
}

/// Transport failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Room creation rejected: {0}")]
    RoomRejected(String),

    #[error("Failed to send to {peer_id}: {reason}")]
    Send { peer_id: String, reason: String },

    #[error("Transport closed")]
    Closed,

    #[error("Transport failure: {0}")]
    Failure(String),
}

/// Why joining a room failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Join rejected: {0}")]
    Rejected(String),

    #[error("Invalid room code: {0}")]
    InvalidRoomCode(String),
}

/// Point-to-point delivery between peers in a room
pub trait Transport: Send + Sync {
    /// Our peer ID on this transport
    fn local_peer_id(&self) -> &str;

    /// Create a room owned by this peer
    fn create_room<'a>(&'a self, room_code: &'a RoomCode) -> BoxFuture<'a, Result<(), TransportError>>;

    /// Join an existing room. Resolves to the host's peer ID.
    fn join_room<'a>(&'a self, room_code: &'a RoomCode) -> BoxFuture<'a, Result<String, JoinError>>;

    /// Leave the current room (ends it if we own it)
    fn leave_room(&self);

    /// Queue a message for one peer
    fn send(&self, peer_id: &str, message: SyncMessage) -> Result<(), TransportError>;

    /// Queue a message for every other peer in the room
    fn broadcast(&self, message: SyncMessage) -> Result<(), TransportError>;
}
