//! In-memory transport
//!
//! A shared [`MemoryNetwork`] broker routes messages between
//! [`MemoryTransport`] instances over unbounded channels, which gives the
//! reliable, ordered, point-to-point delivery the session expects. Used by
//! tests and local demos.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;

use crate::sync::SyncMessage;

use super::transport::{ConnectionState, JoinError, Transport, TransportError, TransportEvent};
use super::RoomCode;

struct MemoryRoom {
    host: String,
    /// Members in join order, host first
    members: Vec<String>,
}

#[derive(Default)]
struct NetworkInner {
    peers: HashMap<String, mpsc::UnboundedSender<TransportEvent>>,
    rooms: HashMap<String, MemoryRoom>,
    /// Which room each peer is in
    membership: HashMap<String, String>,
}

fn deliver(
    peers: &HashMap<String, mpsc::UnboundedSender<TransportEvent>>,
    to: &str,
    event: TransportEvent,
) -> bool {
    match peers.get(to) {
        Some(tx) => tx.send(event).is_ok(),
        None => false,
    }
}

fn notify_connection(
    peers: &HashMap<String, mpsc::UnboundedSender<TransportEvent>>,
    to: &str,
    peer_id: &str,
    state: ConnectionState,
) {
    deliver(
        peers,
        to,
        TransportEvent::ConnectionState {
            peer_id: peer_id.to_string(),
            state,
        },
    );
}

impl NetworkInner {
    fn remove_member(&mut self, peer_id: &str, state: ConnectionState) {
        let Some(code) = self.membership.remove(peer_id) else {
            return;
        };
        let Some(room) = self.rooms.get_mut(&code) else {
            return;
        };

        room.members.retain(|m| m != peer_id);
        let remaining = room.members.clone();

        // The owner leaving ends the room for everyone
        if room.host == peer_id {
            debug!("Memory network: room {} closed by owner", code);
            self.rooms.remove(&code);
            for member in &remaining {
                self.membership.remove(member);
            }
        }

        for member in &remaining {
            notify_connection(&self.peers, member, peer_id, state);
        }
    }
}

/// Shared broker connecting [`MemoryTransport`]s
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<RwLock<NetworkInner>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer and get its transport plus inbound event stream
    pub fn connect(
        &self,
        peer_id: impl Into<String>,
    ) -> (MemoryTransport, mpsc::UnboundedReceiver<TransportEvent>) {
        let peer_id = peer_id.into();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        self.inner.write().peers.insert(peer_id.clone(), event_tx);

        let transport = MemoryTransport {
            peer_id,
            network: self.clone(),
        };
        (transport, event_rx)
    }

    /// Drop a peer abruptly; the rest of its room sees `Failed`
    pub fn fail_peer(&self, peer_id: &str) {
        let mut inner = self.inner.write();
        inner.remove_member(peer_id, ConnectionState::Failed);
        inner.peers.remove(peer_id);
    }

    /// Members of a room in join order (host first)
    pub fn room_members(&self, room_code: &RoomCode) -> Vec<String> {
        self.inner
            .read()
            .rooms
            .get(room_code.as_str())
            .map(|room| room.members.clone())
            .unwrap_or_default()
    }
}

/// One peer's view of a [`MemoryNetwork`]
#[derive(Clone)]
pub struct MemoryTransport {
    peer_id: String,
    network: MemoryNetwork,
}

impl MemoryTransport {
    fn create(&self, room_code: &RoomCode) -> Result<(), TransportError> {
        let mut inner = self.network.inner.write();
        if inner.rooms.contains_key(room_code.as_str()) {
            return Err(TransportError::RoomRejected(format!("room {} already exists", room_code)));
        }
        if inner.membership.contains_key(&self.peer_id) {
            return Err(TransportError::RoomRejected("already in a room".to_string()));
        }

        inner.rooms.insert(
            room_code.as_str().to_string(),
            MemoryRoom {
                host: self.peer_id.clone(),
                members: vec![self.peer_id.clone()],
            },
        );
        inner
            .membership
            .insert(self.peer_id.clone(), room_code.as_str().to_string());
        Ok(())
    }

    fn join(&self, room_code: &RoomCode) -> Result<String, JoinError> {
        let mut guard = self.network.inner.write();
        let inner = &mut *guard;

        if let Some(current) = inner.membership.get(&self.peer_id) {
            if current != room_code.as_str() {
                return Err(JoinError::Rejected("already in another room".to_string()));
            }
        }

        let room = inner
            .rooms
            .get_mut(room_code.as_str())
            .ok_or_else(|| JoinError::RoomNotFound(room_code.to_string()))?;

        if !room.members.contains(&self.peer_id) {
            for member in &room.members {
                notify_connection(&inner.peers, member, &self.peer_id, ConnectionState::Connected);
                notify_connection(&inner.peers, &self.peer_id, member, ConnectionState::Connected);
            }
            room.members.push(self.peer_id.clone());
            inner
                .membership
                .insert(self.peer_id.clone(), room_code.as_str().to_string());
        }

        Ok(room.host.clone())
    }
}

impl Transport for MemoryTransport {
    fn local_peer_id(&self) -> &str {
        &self.peer_id
    }

    fn create_room<'a>(&'a self, room_code: &'a RoomCode) -> BoxFuture<'a, Result<(), TransportError>> {
        future::ready(self.create(room_code)).boxed()
    }

    fn join_room<'a>(&'a self, room_code: &'a RoomCode) -> BoxFuture<'a, Result<String, JoinError>> {
        future::ready(self.join(room_code)).boxed()
    }

    fn leave_room(&self) {
        self.network
            .inner
            .write()
            .remove_member(&self.peer_id, ConnectionState::Disconnected);
    }

    fn send(&self, peer_id: &str, message: SyncMessage) -> Result<(), TransportError> {
        let event = TransportEvent::Message {
            from: self.peer_id.clone(),
            message,
        };
        if deliver(&self.network.inner.read().peers, peer_id, event) {
            Ok(())
        } else {
            Err(TransportError::Send {
                peer_id: peer_id.to_string(),
                reason: "peer not reachable".to_string(),
            })
        }
    }

    fn broadcast(&self, message: SyncMessage) -> Result<(), TransportError> {
        let inner = self.network.inner.read();
        let room = inner
            .membership
            .get(&self.peer_id)
            .and_then(|code| inner.rooms.get(code))
            .ok_or(TransportError::Closed)?;

        for member in room.members.iter().filter(|m| **m != self.peer_id) {
            let event = TransportEvent::Message {
                from: self.peer_id.clone(),
                message: message.clone(),
            };
            if !deliver(&inner.peers, member, event) {
                debug!("Memory network: dropped broadcast to {}", member);
            }
        }
        Ok(())
    }
}
