//! Types exposed to the application

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::media::MediaKind;
use crate::network::{ConnectionState, JoinError, TransportError};
use crate::sync::{PeerRole, PlayerState, ReadyState, SongRef, TrackInfo};

/// Errors returned by the session API
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Join(#[from] JoinError),

    #[error("Already in a room")]
    AlreadyInRoom,

    #[error("Not in a room")]
    NotInRoom,

    #[error("Only the broadcaster can do that")]
    NotBroadcaster,

    #[error("Session has shut down")]
    SessionClosed,
}

/// Protocol failures reported through the event channel
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("Transfer of {kind} for {song_id} stalled after {attempts} attempt(s)")]
    TransferStall {
        kind: MediaKind,
        song_id: String,
        attempts: u32,
    },

    #[error("Failed to cache {kind} for {song_id}: {reason}")]
    CacheWrite {
        kind: MediaKind,
        song_id: String,
        reason: String,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Everything the session reports to the application
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    RoomJoined {
        room_code: String,
        role: PeerRole,
        host_peer_id: String,
    },
    RoomLeft,
    PeerConnectionChanged {
        peer_id: String,
        state: ConnectionState,
    },
    /// The broadcaster moved to a new track
    TrackAnnounced {
        track: TrackInfo,
        sender_peer_id: String,
    },
    /// The prefetch ledger changed
    PrefetchChanged { entries: Vec<SongRef> },
    /// The active song's audio was handed to the playback engine
    SourceReady { song_id: String, path: PathBuf },
    CoverReady { song_id: String, path: PathBuf },
    ReadyRequested { requested: bool },
    /// Broadcaster: a watcher signalled ready
    PeerReady { peer_id: String },
    /// Broadcaster: the readiness policy is satisfied, play can be issued
    AllReady,
    RemoteSeek { time_ms: u64 },
    Error(SyncError),
}

/// Callback interface for session events
///
/// Every method defaults to a no-op so implementors only handle what they
/// display.
pub trait SessionCallback: Send + Sync {
    fn on_room_joined(&self, _room_code: String, _role: PeerRole, _host_peer_id: String) {}
    fn on_room_left(&self) {}
    fn on_peer_connection_changed(&self, _peer_id: String, _state: ConnectionState) {}
    fn on_track_announced(&self, _track: TrackInfo, _sender_peer_id: String) {}
    fn on_prefetch_changed(&self, _entries: Vec<SongRef>) {}
    fn on_source_ready(&self, _song_id: String, _path: PathBuf) {}
    fn on_cover_ready(&self, _song_id: String, _path: PathBuf) {}
    fn on_ready_requested(&self, _requested: bool) {}
    fn on_peer_ready(&self, _peer_id: String) {}
    fn on_all_ready(&self) {}
    fn on_remote_seek(&self, _time_ms: u64) {}
    fn on_error(&self, _error: SyncError) {}
}

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub local_peer_id: String,
    pub role: PeerRole,
    /// Display form (`XXXX-XXXX`)
    pub room_code: Option<String>,
    pub host_peer_id: Option<String>,
    /// Sorted
    pub connected_peers: Vec<String>,
    /// Most recently announced song
    pub active_song: Option<String>,
    pub prefetch: Vec<SongRef>,
    /// Prefetch entries whose transfer gave up
    pub stalled: Vec<String>,
    pub ready: ReadyState,
    /// Song of the outstanding audio pull
    pub in_flight: Option<String>,
    pub player_state: Option<PlayerState>,
}

/// Fans events out to the callback slot and every subscriber, in order
#[derive(Default)]
pub(crate) struct EventSink {
    callback: RwLock<Option<Arc<dyn SessionCallback>>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<SessionEvent>>>,
}

impl EventSink {
    /// Replace the callback (last writer wins)
    pub fn set_callback(&self, callback: Box<dyn SessionCallback>) {
        *self.callback.write() = Some(Arc::from(callback));
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn emit(&self, event: SessionEvent) {
        // Clone the Arc so the callback runs without holding the lock
        let callback = self.callback.read().clone();
        if let Some(cb) = callback {
            dispatch(cb.as_ref(), event.clone());
        }

        // Dropped receivers are pruned as we go
        self.subscribers.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }
}

fn dispatch(cb: &dyn SessionCallback, event: SessionEvent) {
    match event {
        SessionEvent::RoomJoined {
            room_code,
            role,
            host_peer_id,
        } => cb.on_room_joined(room_code, role, host_peer_id),
        SessionEvent::RoomLeft => cb.on_room_left(),
        SessionEvent::PeerConnectionChanged { peer_id, state } => cb.on_peer_connection_changed(peer_id, state),
        SessionEvent::TrackAnnounced { track, sender_peer_id } => cb.on_track_announced(track, sender_peer_id),
        SessionEvent::PrefetchChanged { entries } => cb.on_prefetch_changed(entries),
        SessionEvent::SourceReady { song_id, path } => cb.on_source_ready(song_id, path),
        SessionEvent::CoverReady { song_id, path } => cb.on_cover_ready(song_id, path),
        SessionEvent::ReadyRequested { requested } => cb.on_ready_requested(requested),
        SessionEvent::PeerReady { peer_id } => cb.on_peer_ready(peer_id),
        SessionEvent::AllReady => cb.on_all_ready(),
        SessionEvent::RemoteSeek { time_ms } => cb.on_remote_seek(time_ms),
        SessionEvent::Error(error) => cb.on_error(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct SeekCounter {
        seeks: Mutex<Vec<u64>>,
    }

    impl SessionCallback for Arc<SeekCounter> {
        fn on_remote_seek(&self, time_ms: u64) {
            self.seeks.lock().push(time_ms);
        }
    }

    #[test]
    fn test_subscribers_see_every_event_in_order() {
        let sink = EventSink::default();
        let mut first = sink.subscribe();
        let mut second = sink.subscribe();

        sink.emit(SessionEvent::AllReady);
        sink.emit(SessionEvent::RemoteSeek { time_ms: 42 });

        for rx in [&mut first, &mut second] {
            assert_eq!(rx.try_recv().unwrap(), SessionEvent::AllReady);
            assert_eq!(rx.try_recv().unwrap(), SessionEvent::RemoteSeek { time_ms: 42 });
        }
    }

    #[test]
    fn test_closed_subscribers_are_pruned() {
        let sink = EventSink::default();
        let rx = sink.subscribe();
        drop(rx);
        sink.emit(SessionEvent::RoomLeft);
        assert!(sink.subscribers.lock().is_empty());
    }

    #[test]
    fn test_callback_slot_last_writer_wins() {
        let sink = EventSink::default();
        let old = Arc::new(SeekCounter::default());
        let new = Arc::new(SeekCounter::default());

        sink.set_callback(Box::new(old.clone()));
        sink.set_callback(Box::new(new.clone()));
        sink.emit(SessionEvent::RemoteSeek { time_ms: 7 });

        assert!(old.seeks.lock().is_empty());
        assert_eq!(*new.seeks.lock(), vec![7]);
    }
}
