//! Test doubles for the session's collaborators

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;

use crate::media::{CacheError, MediaCache, MediaKind};
use crate::network::{JoinError, RoomCode, Transport, TransportError};
use crate::relay::PlaybackEngine;
use crate::sync::{PlayerState, SyncMessage};

/// Transport that records everything sent through it
pub(crate) struct RecordingTransport {
    peer_id: String,
    sent: Mutex<Vec<(String, SyncMessage)>>,
    broadcasts: Mutex<Vec<SyncMessage>>,
    fail_sends: AtomicBool,
    unreachable: Mutex<HashSet<String>>,
    reject_create: AtomicBool,
    join_result: Mutex<Result<String, JoinError>>,
    left: AtomicBool,
}

impl RecordingTransport {
    /// Joins always land in a room hosted by "B" unless told otherwise
    pub fn new(peer_id: &str) -> Self {
        Self {
            peer_id: peer_id.to_string(),
            sent: Mutex::new(Vec::new()),
            broadcasts: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
            unreachable: Mutex::new(HashSet::new()),
            reject_create: AtomicBool::new(false),
            join_result: Mutex::new(Ok("B".to_string())),
            left: AtomicBool::new(false),
        }
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Sends to this peer fail; other peers are unaffected
    pub fn set_unreachable(&self, peer_id: &str) {
        self.unreachable.lock().insert(peer_id.to_string());
    }

    pub fn reject_create(&self, reject: bool) {
        self.reject_create.store(reject, Ordering::SeqCst);
    }

    pub fn set_join_result(&self, result: Result<String, JoinError>) {
        *self.join_result.lock() = result;
    }

    pub fn sent(&self) -> Vec<(String, SyncMessage)> {
        self.sent.lock().clone()
    }

    pub fn broadcasts(&self) -> Vec<SyncMessage> {
        self.broadcasts.lock().clone()
    }

    /// (peer, song id) of every SongRequest sent
    pub fn song_requests(&self) -> Vec<(String, String)> {
        self.sent
            .lock()
            .iter()
            .filter_map(|(peer, msg)| match msg {
                SyncMessage::SongRequest { song_id } => Some((peer.clone(), song_id.clone())),
                _ => None,
            })
            .collect()
    }

    /// (peer, song id) of every CoverRequest sent
    pub fn cover_requests(&self) -> Vec<(String, String)> {
        self.sent
            .lock()
            .iter()
            .filter_map(|(peer, msg)| match msg {
                SyncMessage::CoverRequest { song_id } => Some((peer.clone(), song_id.clone())),
                _ => None,
            })
            .collect()
    }

    /// Number of Ready signals sent
    pub fn ready_count(&self) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|(_, msg)| matches!(msg, SyncMessage::Ready))
            .count()
    }

    pub fn has_left(&self) -> bool {
        self.left.load(Ordering::SeqCst)
    }
}

impl Transport for RecordingTransport {
    fn local_peer_id(&self) -> &str {
        &self.peer_id
    }

    fn create_room<'a>(&'a self, _room_code: &'a RoomCode) -> BoxFuture<'a, Result<(), TransportError>> {
        let result = if self.reject_create.load(Ordering::SeqCst) {
            Err(TransportError::RoomRejected("rejected by test".to_string()))
        } else {
            Ok(())
        };
        future::ready(result).boxed()
    }

    fn join_room<'a>(&'a self, _room_code: &'a RoomCode) -> BoxFuture<'a, Result<String, JoinError>> {
        future::ready(self.join_result.lock().clone()).boxed()
    }

    fn leave_room(&self) {
        self.left.store(true, Ordering::SeqCst);
    }

    fn send(&self, peer_id: &str, message: SyncMessage) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) || self.unreachable.lock().contains(peer_id) {
            return Err(TransportError::Send {
                peer_id: peer_id.to_string(),
                reason: "failing by test".to_string(),
            });
        }
        self.sent.lock().push((peer_id.to_string(), message));
        Ok(())
    }

    fn broadcast(&self, message: SyncMessage) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.broadcasts.lock().push(message);
        Ok(())
    }
}

/// Cache backed by a map; paths are synthetic
#[derive(Default)]
pub(crate) struct MemoryCache {
    files: Mutex<HashMap<(MediaKind, String), Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(kind: MediaKind, song_id: &str) -> PathBuf {
        PathBuf::from(format!("/cache/{}/{}", kind, song_id))
    }

    pub fn insert(&self, kind: MediaKind, song_id: &str, bytes: Vec<u8>) {
        self.files.lock().insert((kind, song_id.to_string()), bytes);
    }

    pub fn get(&self, kind: MediaKind, song_id: &str) -> Option<Vec<u8>> {
        self.files.lock().get(&(kind, song_id.to_string())).cloned()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl MediaCache for MemoryCache {
    fn exists<'a>(&'a self, kind: MediaKind, song_id: &'a str) -> BoxFuture<'a, Option<PathBuf>> {
        let found = self
            .files
            .lock()
            .contains_key(&(kind, song_id.to_string()))
            .then(|| Self::path(kind, song_id));
        future::ready(found).boxed()
    }

    fn read<'a>(
        &'a self,
        kind: MediaKind,
        song_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Vec<u8>>, CacheError>> {
        future::ready(Ok(self.get(kind, song_id))).boxed()
    }

    fn write<'a>(
        &'a self,
        kind: MediaKind,
        song_id: &'a str,
        bytes: Vec<u8>,
    ) -> BoxFuture<'a, Result<PathBuf, CacheError>> {
        let result = if self.fail_writes.load(Ordering::SeqCst) {
            Err(CacheError::Write {
                kind,
                song_id: song_id.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            })
        } else {
            self.insert(kind, song_id, bytes);
            Ok(Self::path(kind, song_id))
        };
        future::ready(result).boxed()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PlaybackCall {
    Source(PathBuf),
    Seek(u64),
    State(PlayerState),
}

/// Playback engine that records every call
#[derive(Default)]
pub(crate) struct RecordingPlayback {
    calls: Mutex<Vec<PlaybackCall>>,
}

impl RecordingPlayback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<PlaybackCall> {
        self.calls.lock().clone()
    }

    pub fn sources(&self) -> Vec<PathBuf> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                PlaybackCall::Source(path) => Some(path.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn states(&self) -> Vec<PlayerState> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                PlaybackCall::State(state) => Some(*state),
                _ => None,
            })
            .collect()
    }
}

impl PlaybackEngine for RecordingPlayback {
    fn set_source(&self, path: &Path) {
        self.calls.lock().push(PlaybackCall::Source(path.to_path_buf()));
    }

    fn seek(&self, time_ms: u64) {
        self.calls.lock().push(PlaybackCall::Seek(time_ms));
    }

    fn apply_state(&self, state: PlayerState) {
        self.calls.lock().push(PlaybackCall::State(state));
    }
}
