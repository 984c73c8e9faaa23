//! Sync Protocol
//!
//! Wire messages exchanged between peers and the room/peer state they act on.

mod protocol;
mod state;

pub use protocol::*;
pub use state::*;
