//! PeerSync Core Library
//!
//! Keeps several peers listening to the same stream in lockstep: one
//! broadcaster drives the queue and transport state, watchers prefetch the
//! audio they need and mirror track, state and seek changes.

pub mod config;
pub mod media;
pub mod network;
pub mod prefetch;
pub mod readiness;
pub mod relay;
pub mod session;
pub mod sync;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use config::SyncConfig;
pub use media::{FsMediaCache, MediaCache, MediaKind};
pub use network::{MemoryNetwork, RoomCode, Transport};
pub use readiness::ReadinessPolicy;
pub use relay::PlaybackEngine;
pub use session::{Collaborators, SessionCallback, SessionError, SessionEvent, SyncSession};
pub use sync::{PeerRole, PlayerState, SyncMessage, TrackInfo};
