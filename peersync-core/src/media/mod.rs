//! Media storage
//!
//! The cache a watcher fills and the library a responder serves from.

mod cache;
mod library;

pub use cache::{CacheError, FsMediaCache, MediaCache, MediaKind};
pub use library::LocalLibrary;
