//! Prefetching
//!
//! The ordered list of songs a watcher still needs and the single-flight
//! transfer discipline that drains it.

mod queue;
mod transfer;

pub use queue::PrefetchQueue;
pub use transfer::{InFlight, TransferCoordinator, TransferTimeout};
