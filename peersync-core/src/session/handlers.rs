//! Transport event and sync message handlers

use tracing::{debug, info, warn};

use crate::media::MediaKind;
use crate::network::{ConnectionState, TransportError, TransportEvent};
use crate::prefetch::TransferTimeout;
use crate::readiness::ReadyProgress;
use crate::sync::{PlayerState, QueuedTrack, SongRef, SyncMessage, TrackInfo};

use super::engine::SyncEngine;
use super::types::{SessionEvent, SyncError};

impl SyncEngine {
    /// Handle an event from the transport
    pub async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message { from, message } => {
                self.handle_sync_message(from, message).await;
            }

            TransportEvent::ConnectionState { peer_id, state } => {
                self.handle_connection_change(peer_id, state);
            }

            TransportEvent::Error(e) => {
                self.report_transport_error(TransportError::Failure(e));
            }
        }
    }

    fn handle_connection_change(&mut self, peer_id: String, state: ConnectionState) {
        let Some(room) = self.room.as_mut() else {
            debug!("Ignoring connection change for {}: not in a room", peer_id);
            return;
        };
        let is_broadcaster = room.role.is_broadcaster();

        match state {
            ConnectionState::Connected => {
                info!("Peer connected: {}", peer_id);
                if room.add_peer(&peer_id) && is_broadcaster {
                    self.send_catch_up(&peer_id);
                }
            }
            ConnectionState::Disconnected | ConnectionState::Failed => {
                info!("Peer {:?}: {}", state, peer_id);
                room.remove_peer(&peer_id);
                if is_broadcaster && self.readiness.peer_disconnected(&mut self.ready, &peer_id) {
                    self.finish_ready_round();
                }
            }
        }

        self.events.emit(SessionEvent::PeerConnectionChanged { peer_id, state });
    }

    /// Bring a newly connected peer up to date with what was announced
    fn send_catch_up(&self, peer_id: &str) {
        if !self.announced.is_empty() {
            let snapshot = SyncMessage::QueueSnapshot {
                entries: self.announced.clone(),
            };
            if let Err(e) = self.transport.send(peer_id, snapshot) {
                self.report_transport_error(e);
                return;
            }
        }

        if let Some(active) = &self.active {
            let announce = SyncMessage::TrackAnnounce {
                track: active.track.clone(),
                sender_peer_id: active.sender_peer_id.clone(),
            };
            if let Err(e) = self.transport.send(peer_id, announce) {
                self.report_transport_error(e);
            }
        }
    }

    async fn handle_sync_message(&mut self, from: String, message: SyncMessage) {
        let Some(room) = self.room.as_ref() else {
            debug!("Ignoring {} from {}: not in a room", message.name(), from);
            return;
        };

        if message.requires_host() && !room.is_from_host(&from) {
            warn!("Ignoring {} from non-host peer {}", message.name(), from);
            return;
        }

        debug!("Received {} from {}", message.name(), from);

        match message {
            SyncMessage::TrackAnnounce { track, sender_peer_id } => {
                self.on_track_announce(track, sender_peer_id).await;
            }

            SyncMessage::QueueAnnounce { track, sender_peer_id } => {
                self.on_queue_entries(vec![QueuedTrack { track, sender_peer_id }]).await;
            }

            SyncMessage::QueueSnapshot { entries } => {
                self.on_queue_entries(entries).await;
            }

            SyncMessage::PlayerState { state } => {
                self.relay.apply_remote_state(self.playback.as_ref(), state);
            }

            SyncMessage::Seek { time_ms } => {
                self.relay.apply_remote_seek(self.playback.as_ref(), time_ms);
                self.events.emit(SessionEvent::RemoteSeek { time_ms });
            }

            SyncMessage::ReadyRequest { requested } => {
                self.on_ready_request(requested).await;
            }

            SyncMessage::Ready => {
                self.on_ready(&from);
            }

            SyncMessage::SongRequest { song_id } => {
                self.serve(&from, MediaKind::Audio, song_id).await;
            }

            SyncMessage::CoverRequest { song_id } => {
                self.serve(&from, MediaKind::Cover, song_id).await;
            }

            SyncMessage::SongData { song_id, bytes } => {
                self.on_song_data(&from, song_id, bytes).await;
            }

            SyncMessage::CoverData { song_id, bytes } => {
                self.on_cover_data(&from, song_id, bytes).await;
            }

            SyncMessage::Unavailable { kind, song_id } => {
                self.on_unavailable(&from, kind, song_id).await;
            }
        }
    }

    // === Watcher side ===

    async fn on_track_announce(&mut self, track: TrackInfo, sender_peer_id: String) {
        if !self.is_watcher() {
            return;
        }

        let song_id = track.song_id.clone();
        self.relay.apply_remote_state(self.playback.as_ref(), PlayerState::Loading);
        self.active = Some(QueuedTrack {
            track: track.clone(),
            sender_peer_id: sender_peer_id.clone(),
        });
        self.source_set_for = None;
        self.events.emit(SessionEvent::TrackAnnounced {
            track,
            sender_peer_id: sender_peer_id.clone(),
        });

        match self.cache.exists(MediaKind::Audio, &song_id).await {
            Some(path) => {
                self.prefetch.mark_cached(&song_id, path.clone());
                self.route_if_active(&song_id, &path);
            }
            None => {
                if self.prefetch.push(SongRef::new(&song_id, &sender_peer_id)) {
                    self.emit_prefetch_changed();
                }
                self.drain_once().await;
            }
        }

        // Covers never block readiness
        self.fetch_cover(&song_id, &sender_peer_id).await;
    }

    /// Songs announced for later; prefetch only
    async fn on_queue_entries(&mut self, entries: Vec<QueuedTrack>) {
        if !self.is_watcher() {
            return;
        }

        let mut changed = false;
        for entry in entries {
            changed |= self
                .prefetch
                .push(SongRef::new(entry.track.song_id, entry.sender_peer_id));
        }
        if changed {
            self.emit_prefetch_changed();
        }
        self.drain_once().await;
    }

    async fn fetch_cover(&mut self, song_id: &str, sender_peer_id: &str) {
        if let Some(path) = self.cache.exists(MediaKind::Cover, song_id).await {
            self.events.emit(SessionEvent::CoverReady {
                song_id: song_id.to_string(),
                path,
            });
            return;
        }

        if let Err(e) = self
            .transfers
            .request_cover(self.transport.as_ref(), sender_peer_id, song_id)
        {
            self.report_transport_error(e);
        }
    }

    async fn on_ready_request(&mut self, requested: bool) {
        if !self.is_watcher() {
            return;
        }

        self.readiness.set_requested(&mut self.ready, requested);
        self.events.emit(SessionEvent::ReadyRequested { requested });

        if !requested {
            return;
        }
        let Some(song_id) = self.active.as_ref().map(|a| a.track.song_id.clone()) else {
            return;
        };
        if let Some(path) = self.cache.exists(MediaKind::Audio, &song_id).await {
            self.route_if_active(&song_id, &path);
        }
    }

    async fn on_song_data(&mut self, from: &str, song_id: String, bytes: Vec<u8>) {
        if !self.is_watcher() {
            return;
        }

        let answers_pull = self
            .transfers
            .in_flight()
            .is_some_and(|f| f.song_id == song_id && f.peer_id == from);
        let queued_from_sender = self
            .prefetch
            .get(&song_id)
            .is_some_and(|e| e.sender_peer_id == from);
        if !answers_pull && !queued_from_sender {
            warn!("Dropping unsolicited audio for {} from {}", song_id, from);
            return;
        }

        debug!("Received {} bytes of audio for {}", bytes.len(), song_id);
        match self.cache.write(MediaKind::Audio, &song_id, bytes).await {
            Ok(path) => {
                if !answers_pull {
                    debug!("Late response for {}, caching only", song_id);
                }
                self.transfers.complete_song(&song_id);
                self.prefetch.mark_cached(&song_id, path.clone());
                self.emit_prefetch_changed();
                self.route_if_active(&song_id, &path);
                self.drain_once().await;
            }
            Err(e) => {
                warn!("{}", e);
                self.events.emit(SessionEvent::Error(SyncError::CacheWrite {
                    kind: MediaKind::Audio,
                    song_id: song_id.clone(),
                    reason: e.to_string(),
                }));
                if !answers_pull {
                    return;
                }
                if let Some(failed) = self.transfers.complete_song(&song_id) {
                    self.retry_or_stall(failed).await;
                }
            }
        }
    }

    async fn on_cover_data(&mut self, from: &str, song_id: String, bytes: Vec<u8>) {
        if !self.is_watcher() {
            return;
        }

        let was_pending = self.transfers.complete_cover(&song_id);
        let known_sender = self
            .active
            .as_ref()
            .is_some_and(|a| a.track.song_id == song_id && a.sender_peer_id == from);
        if !was_pending && !known_sender {
            warn!("Dropping unsolicited cover for {} from {}", song_id, from);
            return;
        }

        match self.cache.write(MediaKind::Cover, &song_id, bytes).await {
            Ok(path) => {
                self.events.emit(SessionEvent::CoverReady { song_id, path });
            }
            Err(e) => {
                warn!("{}", e);
                self.events.emit(SessionEvent::Error(SyncError::CacheWrite {
                    kind: MediaKind::Cover,
                    song_id,
                    reason: e.to_string(),
                }));
            }
        }
    }

    async fn on_unavailable(&mut self, from: &str, kind: MediaKind, song_id: String) {
        match kind {
            MediaKind::Audio => {
                let answers_pull = self
                    .transfers
                    .in_flight()
                    .is_some_and(|f| f.song_id == song_id && f.peer_id == from);
                if !answers_pull {
                    return;
                }
                if let Some(failed) = self.transfers.complete_song(&song_id) {
                    warn!("{} does not have audio for {}", from, song_id);
                    self.stall_song(&song_id, failed.attempt);
                    self.drain_once().await;
                }
            }
            MediaKind::Cover => {
                if self.transfers.complete_cover(&song_id) {
                    debug!("{} has no cover for {}", from, song_id);
                }
            }
        }
    }

    // === Broadcaster side ===

    fn on_ready(&mut self, from: &str) {
        if !self.is_broadcaster() {
            return;
        }

        match self.readiness.record_ready(&mut self.ready, from) {
            ReadyProgress::Ignored => {
                debug!("Ready from {} with no request outstanding", from);
            }
            ReadyProgress::Recorded => {
                self.events.emit(SessionEvent::PeerReady {
                    peer_id: from.to_string(),
                });
            }
            ReadyProgress::Complete => {
                self.events.emit(SessionEvent::PeerReady {
                    peer_id: from.to_string(),
                });
                self.finish_ready_round();
            }
        }
    }

    // === Responder (any role) ===

    async fn serve(&self, to: &str, kind: MediaKind, song_id: String) {
        let reply = match self.library.load(self.cache.as_ref(), kind, &song_id).await {
            Ok(Some(bytes)) => {
                debug!("Serving {} for {} to {} ({} bytes)", kind, song_id, to, bytes.len());
                match kind {
                    MediaKind::Audio => SyncMessage::SongData { song_id, bytes },
                    MediaKind::Cover => SyncMessage::CoverData { song_id, bytes },
                }
            }
            Ok(None) => {
                debug!("No {} for {}", kind, song_id);
                SyncMessage::Unavailable { kind, song_id }
            }
            Err(e) => {
                warn!("{}", e);
                SyncMessage::Unavailable { kind, song_id }
            }
        };

        if let Err(e) = self.transport.send(to, reply) {
            self.report_transport_error(e);
        }
    }

    // === Timers ===

    /// A pull's timer expired
    pub async fn handle_transfer_timeout(&mut self, timeout: TransferTimeout) {
        match timeout.kind {
            MediaKind::Audio => {
                let Some(failed) = self.transfers.expire_song(&timeout) else {
                    return;
                };
                warn!("Timed out waiting for {} from {} (attempt {})", failed.song_id, failed.peer_id, failed.attempt);
                self.retry_or_stall(failed).await;
            }
            MediaKind::Cover => {
                if self.transfers.complete_cover(&timeout.song_id) {
                    warn!("Timed out waiting for cover of {}", timeout.song_id);
                    self.events.emit(SessionEvent::Error(SyncError::TransferStall {
                        kind: MediaKind::Cover,
                        song_id: timeout.song_id,
                        attempts: 1,
                    }));
                }
            }
        }
    }
}
