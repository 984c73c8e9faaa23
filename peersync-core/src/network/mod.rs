//! Peer transport
//!
//! The session reaches other peers only through the [`Transport`] trait.
//! An in-memory implementation is provided for tests and local demos.

mod memory;
mod room_code;
mod transport;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use room_code::{RoomCode, RoomCodeError};
pub use transport::{ConnectionState, JoinError, Transport, TransportError, TransportEvent};
