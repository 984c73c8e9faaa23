//! Sync session facade
//!
//! Composes the prefetch queue, transfer coordinator, readiness handshake
//! and playback relay behind one handle.

mod actor;
mod engine;
mod handlers;
mod types;

pub use actor::SyncSession;
pub use engine::Collaborators;
pub use types::{SessionCallback, SessionError, SessionEvent, SessionSnapshot, SyncError};
