//! Session handle and its event loop
//!
//! [`SyncSession`] is a cheap handle; all protocol state lives in a
//! [`SyncEngine`] owned by one spawned task. That task is the session's only
//! event loop: it serializes API commands, transport events and timer
//! expirations, so handlers never run concurrently.

use std::path::PathBuf;
use std::sync::{Arc, Once};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::config::SyncConfig;
use crate::media::MediaKind;
use crate::network::TransportEvent;
use crate::prefetch::TransferTimeout;
use crate::sync::{PlayerState, TrackInfo};

use super::engine::{Collaborators, SyncEngine};
use super::types::{EventSink, SessionCallback, SessionError, SessionEvent, SessionSnapshot};

static TRACING_INIT: Once = Once::new();

/// Install a stderr subscriber unless the host application already has one
fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("peersync_core=debug"));
        let _ = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_target(false)
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

enum SessionCommand {
    CreateRoom {
        reply: Reply<String>,
    },
    JoinRoom {
        room_code: String,
        reply: Reply<()>,
    },
    LeaveRoom {
        reply: Reply<()>,
    },
    AnnounceTrack {
        track: TrackInfo,
        sender_peer_id: Option<String>,
        reply: Reply<()>,
    },
    QueueTrack {
        track: TrackInfo,
        sender_peer_id: Option<String>,
        reply: Reply<()>,
    },
    EmitSeek {
        time_ms: u64,
        reply: Reply<()>,
    },
    RequestReady {
        reply: Reply<()>,
    },
    PlayerStateChanged {
        state: PlayerState,
    },
    PublishLocalMedia {
        kind: MediaKind,
        song_id: String,
        path: PathBuf,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Shutdown,
}

/// Peer sync session
///
/// The only type the application talks to. Must be started inside a tokio
/// runtime.
#[derive(Clone)]
pub struct SyncSession {
    commands: mpsc::UnboundedSender<SessionCommand>,
    events: Arc<EventSink>,
    local_peer_id: String,
}

impl SyncSession {
    /// Spawn the session's event loop
    ///
    /// `transport_events` is the inbound stream of the same transport passed
    /// in `collaborators`.
    pub fn start(
        config: SyncConfig,
        collaborators: Collaborators,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        init_tracing();

        let local_peer_id = collaborators.transport.local_peer_id().to_string();
        info!("Starting sync session for {}", local_peer_id);

        let events = Arc::new(EventSink::default());
        let (engine, timers) = SyncEngine::new(&config, collaborators, Arc::clone(&events));
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let actor = SessionActor {
            engine,
            commands: command_rx,
            transport_events,
            timers,
        };
        tokio::spawn(actor.run());

        Self {
            commands: command_tx,
            events,
            local_peer_id,
        }
    }

    pub fn local_peer_id(&self) -> &str {
        &self.local_peer_id
    }

    /// Set the event callback (replaces any previous one)
    pub fn set_callback(&self, callback: Box<dyn SessionCallback>) {
        self.events.set_callback(callback);
    }

    /// Receive every event from now on, in emission order
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Create a room and become its broadcaster. Returns the room code.
    pub async fn create_room(&self) -> Result<String, SessionError> {
        self.request(|reply| SessionCommand::CreateRoom { reply }).await
    }

    /// Join a room as a watcher
    pub async fn join_room(&self, room_code: &str) -> Result<(), SessionError> {
        let room_code = room_code.to_string();
        self.request(|reply| SessionCommand::JoinRoom { room_code, reply })
            .await
    }

    pub async fn leave_room(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::LeaveRoom { reply }).await
    }

    /// Broadcaster: the local queue advanced to `track`
    ///
    /// `sender_peer_id` is who watchers pull bytes from; defaults to us.
    pub async fn announce_track(&self, track: TrackInfo, sender_peer_id: Option<String>) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::AnnounceTrack {
            track,
            sender_peer_id,
            reply,
        })
        .await
    }

    /// Broadcaster: let watchers prefetch a track queued for later
    pub async fn queue_track(&self, track: TrackInfo, sender_peer_id: Option<String>) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::QueueTrack {
            track,
            sender_peer_id,
            reply,
        })
        .await
    }

    /// Broadcaster: relay a seek
    pub async fn emit_seek(&self, time_ms: u64) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::EmitSeek { time_ms, reply }).await
    }

    /// Broadcaster: ask watchers to confirm readiness. Wait for
    /// [`SessionEvent::AllReady`] before issuing play.
    pub async fn request_ready(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::RequestReady { reply }).await
    }

    /// Report a local player state transition
    pub fn player_state_changed(&self, state: PlayerState) -> Result<(), SessionError> {
        self.send(SessionCommand::PlayerStateChanged { state })
    }

    /// Serve a local file to peers pulling this song
    pub fn publish_local_media(
        &self,
        kind: MediaKind,
        song_id: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Result<(), SessionError> {
        self.send(SessionCommand::PublishLocalMedia {
            kind,
            song_id: song_id.into(),
            path: path.into(),
        })
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Snapshot { reply: tx })?;
        rx.await.map_err(|_| SessionError::SessionClosed)
    }

    /// Stop the event loop, leaving the room if in one
    pub fn shutdown(&self) {
        let _ = self.commands.send(SessionCommand::Shutdown);
    }

    fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.commands.send(command).map_err(|_| SessionError::SessionClosed)
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> SessionCommand) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx))?;
        rx.await.map_err(|_| SessionError::SessionClosed)?
    }
}

struct SessionActor {
    engine: SyncEngine,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    timers: mpsc::UnboundedReceiver<TransferTimeout>,
}

impl SessionActor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(SessionCommand::Shutdown) | None => break,
                        Some(command) => self.handle_command(command).await,
                    }
                }

                Some(event) = self.transport_events.recv() => {
                    self.engine.handle_transport_event(event).await;
                }

                Some(timeout) = self.timers.recv() => {
                    self.engine.handle_transfer_timeout(timeout).await;
                }
            }
        }

        if self.engine.leave_room().is_ok() {
            debug!("Left room on shutdown");
        }
        info!("Sync session stopped");
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::CreateRoom { reply } => {
                let _ = reply.send(self.engine.create_room().await);
            }
            SessionCommand::JoinRoom { room_code, reply } => {
                let _ = reply.send(self.engine.join_room(&room_code).await);
            }
            SessionCommand::LeaveRoom { reply } => {
                let _ = reply.send(self.engine.leave_room());
            }
            SessionCommand::AnnounceTrack {
                track,
                sender_peer_id,
                reply,
            } => {
                let _ = reply.send(self.engine.announce_track(track, sender_peer_id));
            }
            SessionCommand::QueueTrack {
                track,
                sender_peer_id,
                reply,
            } => {
                let _ = reply.send(self.engine.queue_track(track, sender_peer_id));
            }
            SessionCommand::EmitSeek { time_ms, reply } => {
                let _ = reply.send(self.engine.emit_seek(time_ms));
            }
            SessionCommand::RequestReady { reply } => {
                let _ = reply.send(self.engine.request_ready());
            }
            SessionCommand::PlayerStateChanged { state } => {
                self.engine.player_state_changed(state);
            }
            SessionCommand::PublishLocalMedia { kind, song_id, path } => {
                self.engine.publish_local_media(kind, song_id, path);
            }
            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(self.engine.snapshot());
            }
            // Handled by the loop
            SessionCommand::Shutdown => {}
        }
    }
}
