//! Transfer Coordinator
//!
//! Issues pull requests for audio and cover bytes and correlates the
//! responses by song id. Audio pulls are single-flight: at most one is
//! outstanding at any time. Every pull carries a cancellable timer that
//! reports back on the session's timer channel when it expires.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::media::MediaKind;
use crate::network::{Transport, TransportError};
use crate::sync::SyncMessage;

/// A pull whose timer ran out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTimeout {
    pub kind: MediaKind,
    pub song_id: String,
    pub attempt: u32,
}

/// The single outstanding audio pull
#[derive(Debug)]
pub struct InFlight {
    pub song_id: String,
    pub peer_id: String,
    /// 1-based attempt number
    pub attempt: u32,
    /// Dropping this cancels the timer
    _cancel: oneshot::Sender<()>,
}

pub struct TransferCoordinator {
    timeout: Duration,
    max_attempts: u32,
    in_flight: Option<InFlight>,
    /// Outstanding cover pulls by song id
    covers: HashMap<String, oneshot::Sender<()>>,
    timer_tx: mpsc::UnboundedSender<TransferTimeout>,
}

impl TransferCoordinator {
    pub fn new(timeout: Duration, max_attempts: u32, timer_tx: mpsc::UnboundedSender<TransferTimeout>) -> Self {
        Self {
            timeout,
            max_attempts: max_attempts.max(1),
            in_flight: None,
            covers: HashMap::new(),
            timer_tx,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn in_flight(&self) -> Option<&InFlight> {
        self.in_flight.as_ref()
    }

    /// No audio pull outstanding
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none()
    }

    pub fn is_cover_pending(&self, song_id: &str) -> bool {
        self.covers.contains_key(song_id)
    }

    /// Pull a song's audio. The slot must be free.
    pub fn request_song(
        &mut self,
        transport: &dyn Transport,
        peer_id: &str,
        song_id: &str,
        attempt: u32,
    ) -> Result<(), TransportError> {
        debug_assert!(self.in_flight.is_none(), "audio pulls are single-flight");

        transport.send(
            peer_id,
            SyncMessage::SongRequest {
                song_id: song_id.to_string(),
            },
        )?;
        debug!("Requested song {} from {} (attempt {})", song_id, peer_id, attempt);

        let cancel = self.start_timer(MediaKind::Audio, song_id, attempt);
        self.in_flight = Some(InFlight {
            song_id: song_id.to_string(),
            peer_id: peer_id.to_string(),
            attempt,
            _cancel: cancel,
        });
        Ok(())
    }

    /// Pull a song's cover. Returns false if one is already outstanding.
    pub fn request_cover(
        &mut self,
        transport: &dyn Transport,
        peer_id: &str,
        song_id: &str,
    ) -> Result<bool, TransportError> {
        if self.covers.contains_key(song_id) {
            return Ok(false);
        }

        transport.send(
            peer_id,
            SyncMessage::CoverRequest {
                song_id: song_id.to_string(),
            },
        )?;
        debug!("Requested cover {} from {}", song_id, peer_id);

        let cancel = self.start_timer(MediaKind::Cover, song_id, 1);
        self.covers.insert(song_id.to_string(), cancel);
        Ok(true)
    }

    /// Free the slot if `song_id` is the outstanding pull
    pub fn complete_song(&mut self, song_id: &str) -> Option<InFlight> {
        if self.in_flight.as_ref().is_some_and(|f| f.song_id == song_id) {
            self.in_flight.take()
        } else {
            None
        }
    }

    /// Forget an outstanding cover pull. Returns true if there was one.
    pub fn complete_cover(&mut self, song_id: &str) -> bool {
        self.covers.remove(song_id).is_some()
    }

    /// Handle a timer expiry; stale timers (already answered, or an older
    /// attempt) are ignored. Returns the expired audio pull, if any.
    pub fn expire_song(&mut self, timeout: &TransferTimeout) -> Option<InFlight> {
        let current = self
            .in_flight
            .as_ref()
            .is_some_and(|f| f.song_id == timeout.song_id && f.attempt == timeout.attempt);
        if current {
            self.in_flight.take()
        } else {
            None
        }
    }

    /// Drop everything outstanding, cancelling all timers
    pub fn reset(&mut self) {
        self.in_flight = None;
        self.covers.clear();
    }

    fn start_timer(&self, kind: MediaKind, song_id: &str, attempt: u32) -> oneshot::Sender<()> {
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let timer_tx = self.timer_tx.clone();
        let timeout = self.timeout;
        let expired = TransferTimeout {
            kind,
            song_id: song_id.to_string(),
            attempt,
        };

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    let _ = timer_tx.send(expired);
                }
                // Fires on explicit cancel and when the sender is dropped
                _ = cancel_rx => {}
            }
        });

        cancel_tx
    }
}
