//! Playback relay
//!
//! Relays player-state transitions and seeks between peers. A state applied
//! because a peer told us to must not be relayed back to it, otherwise two
//! peers ping-pong the same transition forever. [`EchoLatch`] marks the next
//! local transition as remote-caused.

use std::path::Path;

use tracing::debug;

use crate::sync::{PlayerState, SyncMessage};

/// Playback Engine contract
pub trait PlaybackEngine: Send + Sync {
    /// Point the player at a local file
    fn set_source(&self, path: &Path);

    fn seek(&self, time_ms: u64);

    /// Drive the player into a state decided by the sync session
    fn apply_state(&self, state: PlayerState);
}

/// Set right before a remote change is applied, consumed by the next local
/// emission attempt
#[derive(Debug, Default)]
pub struct EchoLatch {
    armed: bool,
}

impl EchoLatch {
    pub fn arm(&mut self) {
        self.armed = true;
    }

    /// Clear the latch, returning whether it was set
    pub fn consume(&mut self) -> bool {
        std::mem::take(&mut self.armed)
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }
}

#[derive(Debug, Default)]
pub struct PlaybackRelay {
    state_latch: EchoLatch,
    last_state: Option<PlayerState>,
}

impl PlaybackRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last state seen, local or remote
    pub fn last_state(&self) -> Option<PlayerState> {
        self.last_state
    }

    /// Apply a state that originated on another peer
    pub fn apply_remote_state(&mut self, playback: &dyn PlaybackEngine, state: PlayerState) {
        self.state_latch.arm();
        self.last_state = Some(state);
        playback.apply_state(state);
    }

    /// A local state transition happened. Returns the message to relay, if any.
    pub fn on_local_state(&mut self, session_active: bool, state: PlayerState) -> Option<SyncMessage> {
        self.last_state = Some(state);

        if self.state_latch.consume() {
            debug!("Not relaying {:?}: it came from a peer", state);
            return None;
        }
        if !session_active {
            return None;
        }
        Some(SyncMessage::PlayerState { state })
    }

    /// Apply a seek from the broadcaster. Watchers never originate seeks, so
    /// there is nothing to latch.
    pub fn apply_remote_seek(&self, playback: &dyn PlaybackEngine, time_ms: u64) {
        playback.seek(time_ms);
    }

    pub fn reset(&mut self) {
        self.state_latch = EchoLatch::default();
        self.last_state = None;
    }
}
