//! Protocol state of one peer
//!
//! [`SyncEngine`] owns the role, room membership, prefetch ledger, transfer
//! slot, readiness state and echo latch. It is driven by exactly one task
//! (the session actor), so none of it needs locking; every await point is a
//! cache I/O or a transport round trip.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::media::{LocalLibrary, MediaCache, MediaKind};
use crate::network::{JoinError, RoomCode, Transport, TransportError};
use crate::prefetch::{InFlight, PrefetchQueue, TransferCoordinator, TransferTimeout};
use crate::readiness::ReadinessCoordinator;
use crate::relay::{PlaybackEngine, PlaybackRelay};
use crate::sync::{PeerRole, PlayerState, QueuedTrack, ReadyState, RoomState, SyncMessage, TrackInfo};

use super::types::{EventSink, SessionError, SessionEvent, SessionSnapshot, SyncError};

/// The collaborators a session calls into
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub cache: Arc<dyn MediaCache>,
    pub playback: Arc<dyn PlaybackEngine>,
}

pub(crate) struct SyncEngine {
    pub(super) transport: Arc<dyn Transport>,
    pub(super) cache: Arc<dyn MediaCache>,
    pub(super) playback: Arc<dyn PlaybackEngine>,
    pub(super) events: Arc<EventSink>,

    pub(super) room: Option<RoomState>,
    /// Most recent track announcement
    pub(super) active: Option<QueuedTrack>,
    /// Broadcaster: every song announced or queued, in order
    pub(super) announced: Vec<QueuedTrack>,
    /// Song the playback source was last set for
    pub(super) source_set_for: Option<String>,

    pub(super) prefetch: PrefetchQueue,
    pub(super) transfers: TransferCoordinator,
    pub(super) readiness: ReadinessCoordinator,
    pub(super) ready: ReadyState,
    pub(super) relay: PlaybackRelay,
    pub(super) library: LocalLibrary,
}

impl SyncEngine {
    pub fn new(
        config: &SyncConfig,
        collaborators: Collaborators,
        events: Arc<EventSink>,
    ) -> (Self, mpsc::UnboundedReceiver<TransferTimeout>) {
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let engine = Self {
            transport: collaborators.transport,
            cache: collaborators.cache,
            playback: collaborators.playback,
            events,
            room: None,
            active: None,
            announced: Vec::new(),
            source_set_for: None,
            prefetch: PrefetchQueue::new(),
            transfers: TransferCoordinator::new(
                config.transfer_timeout(),
                config.max_transfer_attempts,
                timer_tx,
            ),
            readiness: ReadinessCoordinator::new(config.readiness_policy.clone()),
            ready: ReadyState::default(),
            relay: PlaybackRelay::new(),
            library: LocalLibrary::new(),
        };
        (engine, timer_rx)
    }

    pub fn role(&self) -> PeerRole {
        self.room.as_ref().map(|r| r.role).unwrap_or_default()
    }

    pub(super) fn is_watcher(&self) -> bool {
        self.role().is_watcher()
    }

    pub(super) fn is_broadcaster(&self) -> bool {
        self.role().is_broadcaster()
    }

    fn require_broadcaster(&self) -> Result<&RoomState, SessionError> {
        let room = self.room.as_ref().ok_or(SessionError::NotInRoom)?;
        if !room.role.is_broadcaster() {
            return Err(SessionError::NotBroadcaster);
        }
        Ok(room)
    }

    // === Room lifecycle ===

    /// Create a room and become its broadcaster
    pub async fn create_room(&mut self) -> Result<String, SessionError> {
        if self.room.is_some() {
            return Err(SessionError::AlreadyInRoom);
        }

        let code = RoomCode::random();
        self.transport.create_room(&code).await?;

        let local_peer_id = self.transport.local_peer_id().to_string();
        self.room = Some(RoomState::new_as_host(code.clone(), local_peer_id.clone()));

        info!("Created room {}", code);
        self.events.emit(SessionEvent::RoomJoined {
            room_code: code.to_string(),
            role: PeerRole::Broadcaster,
            host_peer_id: local_peer_id,
        });
        Ok(code.to_string())
    }

    /// Join someone else's room as a watcher
    pub async fn join_room(&mut self, room_code: &str) -> Result<(), SessionError> {
        if self.room.is_some() {
            return Err(SessionError::AlreadyInRoom);
        }

        let code: RoomCode = room_code
            .parse()
            .map_err(|e| JoinError::InvalidRoomCode(format!("{}: {}", room_code, e)))?;
        let host_peer_id = self.transport.join_room(&code).await.map_err(|e| {
            warn!("Failed to join room {}: {}", code, e);
            e
        })?;

        let local_peer_id = self.transport.local_peer_id().to_string();
        self.room = Some(RoomState::new_as_watcher(code.clone(), local_peer_id, host_peer_id.clone()));

        info!("Joined room {} hosted by {}", code, host_peer_id);
        self.events.emit(SessionEvent::RoomJoined {
            room_code: code.to_string(),
            role: PeerRole::Watcher,
            host_peer_id,
        });
        Ok(())
    }

    /// End the session and return to `Undefined`
    pub fn leave_room(&mut self) -> Result<(), SessionError> {
        let room = self.room.take().ok_or(SessionError::NotInRoom)?;
        self.transport.leave_room();

        self.active = None;
        self.announced.clear();
        self.source_set_for = None;
        self.prefetch.clear();
        self.transfers.reset();
        self.readiness.reset(&mut self.ready);
        self.relay.reset();

        info!("Left room {}", room.room_code);
        self.events.emit(SessionEvent::RoomLeft);
        Ok(())
    }

    // === Broadcaster operations ===

    /// The local queue advanced to `track`
    ///
    /// The player goes to `Loading` before anything is sent, so the local
    /// state is authoritative before peers catch up.
    pub fn announce_track(&mut self, track: TrackInfo, sender_peer_id: Option<String>) -> Result<(), SessionError> {
        let room = self.require_broadcaster()?;
        let sender_peer_id = sender_peer_id.unwrap_or_else(|| room.local_peer_id.clone());
        let queued = QueuedTrack { track, sender_peer_id };

        self.playback.apply_state(PlayerState::Loading);
        self.active = Some(queued.clone());
        self.remember_announced(&queued);

        debug!("Announcing track {}", queued.track.song_id);
        self.transport.broadcast(SyncMessage::TrackAnnounce {
            track: queued.track.clone(),
            sender_peer_id: queued.sender_peer_id.clone(),
        })?;

        self.events.emit(SessionEvent::TrackAnnounced {
            track: queued.track,
            sender_peer_id: queued.sender_peer_id,
        });
        Ok(())
    }

    /// Let watchers prefetch a song queued for later
    pub fn queue_track(&mut self, track: TrackInfo, sender_peer_id: Option<String>) -> Result<(), SessionError> {
        let room = self.require_broadcaster()?;
        let sender_peer_id = sender_peer_id.unwrap_or_else(|| room.local_peer_id.clone());
        let queued = QueuedTrack { track, sender_peer_id };

        self.remember_announced(&queued);

        debug!("Queueing track {}", queued.track.song_id);
        self.transport.broadcast(SyncMessage::QueueAnnounce {
            track: queued.track,
            sender_peer_id: queued.sender_peer_id,
        })?;
        Ok(())
    }

    fn remember_announced(&mut self, queued: &QueuedTrack) {
        if !self.announced.iter().any(|q| q.track.song_id == queued.track.song_id) {
            self.announced.push(queued.clone());
        }
    }

    pub fn emit_seek(&mut self, time_ms: u64) -> Result<(), SessionError> {
        self.require_broadcaster()?;
        debug!("Relaying seek to {}ms", time_ms);
        self.transport.broadcast(SyncMessage::Seek { time_ms })?;
        Ok(())
    }

    /// Ask watchers to confirm they hold the active song
    pub fn request_ready(&mut self) -> Result<(), SessionError> {
        let connected = self.require_broadcaster()?.peer_list();

        let satisfied = self.readiness.begin_request(&mut self.ready, &connected);
        self.transport.broadcast(SyncMessage::ReadyRequest { requested: true })?;
        self.events.emit(SessionEvent::ReadyRequested { requested: true });

        if satisfied {
            self.finish_ready_round();
        }
        Ok(())
    }

    /// The readiness policy is satisfied
    pub(super) fn finish_ready_round(&mut self) {
        info!("All peers ready");
        self.events.emit(SessionEvent::ReadyRequested { requested: false });
        self.events.emit(SessionEvent::AllReady);
        if let Err(e) = self.transport.broadcast(SyncMessage::ReadyRequest { requested: false }) {
            self.report_transport_error(e);
        }
    }

    // === Any role ===

    /// The local player changed state; relay it unless a peer caused it
    pub fn player_state_changed(&mut self, state: PlayerState) {
        let Some(message) = self.relay.on_local_state(self.room.is_some(), state) else {
            return;
        };
        debug!("Relaying player state {:?}", state);
        if let Err(e) = self.transport.broadcast(message) {
            self.report_transport_error(e);
        }
    }

    /// Serve a local file to peers that pull this song
    pub fn publish_local_media(&mut self, kind: MediaKind, song_id: String, path: std::path::PathBuf) {
        debug!("Publishing {} for {} at {}", kind, song_id, path.display());
        self.library.publish(kind, song_id, path);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let room = self.room.as_ref();
        SessionSnapshot {
            local_peer_id: self.transport.local_peer_id().to_string(),
            role: self.role(),
            room_code: room.map(|r| r.room_code.to_string()),
            host_peer_id: room.map(|r| r.host_peer_id.clone()),
            connected_peers: room.map(|r| r.peer_list()).unwrap_or_default(),
            active_song: self.active.as_ref().map(|a| a.track.song_id.clone()),
            prefetch: self.prefetch.entries().to_vec(),
            stalled: self
                .prefetch
                .entries()
                .iter()
                .filter(|e| self.prefetch.is_stalled(&e.id))
                .map(|e| e.id.clone())
                .collect(),
            ready: self.ready.clone(),
            in_flight: self.transfers.in_flight().map(|f| f.song_id.clone()),
            player_state: self.relay.last_state(),
        }
    }

    // === Watcher fetch loop ===

    /// Pull the first uncached entry, unless a pull is already outstanding
    pub(super) async fn drain_once(&mut self) {
        if !self.is_watcher() || !self.transfers.is_idle() {
            return;
        }

        loop {
            let Some(next) = self.prefetch.pending().next().cloned() else {
                if self.ready.current_fetch_target_id.take().is_some() {
                    debug!("Prefetch queue drained");
                }
                return;
            };

            // Populated out of band since it was queued
            if let Some(path) = self.cache.exists(MediaKind::Audio, &next.id).await {
                debug!("{} already cached at {}", next.id, path.display());
                self.prefetch.mark_cached(&next.id, path.clone());
                self.emit_prefetch_changed();
                self.route_if_active(&next.id, &path);
                continue;
            }

            self.ready.current_fetch_target_id = Some(next.id.clone());
            match self
                .transfers
                .request_song(self.transport.as_ref(), &next.sender_peer_id, &next.id, 1)
            {
                Ok(()) => return,
                Err(e) => {
                    warn!("Could not request {} from {}: {}", next.id, next.sender_peer_id, e);
                    self.report_transport_error(e);
                    self.stall_song(&next.id, 1);
                }
            }
        }
    }

    /// A pull failed: ask the same sender again or give up on the entry
    pub(super) async fn retry_or_stall(&mut self, failed: InFlight) {
        if failed.attempt < self.transfers.max_attempts() {
            let attempt = failed.attempt + 1;
            info!("Retrying {} from {} (attempt {})", failed.song_id, failed.peer_id, attempt);
            match self
                .transfers
                .request_song(self.transport.as_ref(), &failed.peer_id, &failed.song_id, attempt)
            {
                Ok(()) => return,
                Err(e) => {
                    self.report_transport_error(e);
                    self.stall_song(&failed.song_id, attempt);
                }
            }
        } else {
            self.stall_song(&failed.song_id, failed.attempt);
        }

        self.drain_once().await;
    }

    pub(super) fn stall_song(&mut self, song_id: &str, attempts: u32) {
        warn!("Giving up on {} after {} attempt(s)", song_id, attempts);
        self.prefetch.mark_stalled(song_id);
        if self.ready.current_fetch_target_id.as_deref() == Some(song_id) {
            self.ready.current_fetch_target_id = None;
        }
        self.events.emit(SessionEvent::Error(SyncError::TransferStall {
            kind: MediaKind::Audio,
            song_id: song_id.to_string(),
            attempts,
        }));
    }

    /// Hand a cached song to the player if it is still the active one
    pub(super) fn route_if_active(&mut self, song_id: &str, path: &Path) {
        let is_active = self.active.as_ref().is_some_and(|a| a.track.song_id == song_id);
        if !is_active {
            debug!("{} cached, not the active song", song_id);
            return;
        }

        if self.source_set_for.as_deref() != Some(song_id) {
            info!("Source ready for {}", song_id);
            self.playback.set_source(path);
            self.source_set_for = Some(song_id.to_string());
            self.events.emit(SessionEvent::SourceReady {
                song_id: song_id.to_string(),
                path: path.to_path_buf(),
            });
        }

        self.maybe_emit_ready(song_id);
    }

    fn maybe_emit_ready(&mut self, cached_song_id: &str) {
        let Some(room) = self.room.as_ref() else {
            return;
        };
        if !room.role.is_watcher() {
            return;
        }

        let active = self.active.as_ref().map(|a| a.track.song_id.as_str());
        if !self.readiness.should_signal(&self.ready, active, cached_song_id) {
            return;
        }

        info!("Ready for {}", cached_song_id);
        let host = room.host_peer_id.clone();
        if let Err(e) = self.transport.send(&host, SyncMessage::Ready) {
            self.report_transport_error(e);
        }
    }

    pub(super) fn emit_prefetch_changed(&self) {
        self.events.emit(SessionEvent::PrefetchChanged {
            entries: self.prefetch.entries().to_vec(),
        });
    }

    pub(super) fn report_transport_error(&self, error: TransportError) {
        warn!("Transport error: {}", error);
        self.events.emit(SessionEvent::Error(SyncError::Transport(error)));
    }
}
