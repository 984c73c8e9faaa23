//! Prefetch Queue
//!
//! Songs a watcher must pull, in the broadcaster's playback order. Entries
//! are never removed: a cached entry is skipped by the fetch loop, so the
//! queue doubles as a ledger of what has been prefetched.

use std::collections::HashSet;
use std::path::PathBuf;

use crate::sync::SongRef;

#[derive(Debug, Default)]
pub struct PrefetchQueue {
    entries: Vec<SongRef>,
    /// Entries whose transfer gave up; skipped until announced again
    stalled: HashSet<String>,
}

impl PrefetchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a song unless one with the same id is already queued.
    ///
    /// Re-announcing a stalled song re-arms it. Returns true if the fetch
    /// loop has something new to look at.
    pub fn push(&mut self, song: SongRef) -> bool {
        if self.entries.iter().any(|e| e.id == song.id) {
            return self.stalled.remove(&song.id);
        }
        self.entries.push(song);
        true
    }

    pub fn entries(&self) -> &[SongRef] {
        &self.entries
    }

    pub fn get(&self, song_id: &str) -> Option<&SongRef> {
        self.entries.iter().find(|e| e.id == song_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries the fetch loop still has to satisfy, in order
    pub fn pending(&self) -> impl Iterator<Item = &SongRef> {
        self.entries
            .iter()
            .filter(|e| !e.is_cached() && !self.stalled.contains(&e.id))
    }

    /// Record where a song's bytes were cached. Returns false if not queued.
    pub fn mark_cached(&mut self, song_id: &str, path: PathBuf) -> bool {
        match self.entries.iter_mut().find(|e| e.id == song_id) {
            Some(entry) => {
                entry.path = Some(path);
                self.stalled.remove(song_id);
                true
            }
            None => false,
        }
    }

    pub fn mark_stalled(&mut self, song_id: &str) {
        if self.get(song_id).is_some() {
            self.stalled.insert(song_id.to_string());
        }
    }

    pub fn is_stalled(&self, song_id: &str) -> bool {
        self.stalled.contains(song_id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.stalled.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(queue: &PrefetchQueue) -> Vec<&str> {
        queue.entries().iter().map(|e| e.id.as_str()).collect()
    }

    #[test]
    fn test_duplicate_announcements_collapse() {
        let mut queue = PrefetchQueue::new();
        assert!(queue.push(SongRef::new("A", "B")));
        assert!(!queue.push(SongRef::new("A", "B")));
        assert!(queue.push(SongRef::new("B", "B")));

        assert_eq!(ids(&queue), vec!["A", "B"]);
    }

    #[test]
    fn test_pending_skips_cached_in_order() {
        let mut queue = PrefetchQueue::new();
        for id in ["s1", "s2", "s3"] {
            queue.push(SongRef::new(id, "B"));
        }

        // Out-of-band population of a later song does not reorder anything
        assert!(queue.mark_cached("s2", PathBuf::from("/cache/s2")));
        let pending: Vec<&str> = queue.pending().map(|e| e.id.as_str()).collect();
        assert_eq!(pending, vec!["s1", "s3"]);

        // Cached entries stay in the ledger
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.get("s2").unwrap().path, Some(PathBuf::from("/cache/s2")));
        assert!(!queue.mark_cached("unknown", PathBuf::from("/x")));
    }

    #[test]
    fn test_stalled_entries_rearm_on_announce() {
        let mut queue = PrefetchQueue::new();
        queue.push(SongRef::new("s1", "B"));
        queue.push(SongRef::new("s2", "B"));

        queue.mark_stalled("s1");
        assert!(queue.is_stalled("s1"));
        assert_eq!(queue.pending().next().unwrap().id, "s2");

        assert!(queue.push(SongRef::new("s1", "B")));
        assert!(!queue.is_stalled("s1"));
        assert_eq!(queue.pending().next().unwrap().id, "s1");
    }

    #[test]
    fn test_stall_unknown_song_is_ignored() {
        let mut queue = PrefetchQueue::new();
        queue.mark_stalled("ghost");
        assert!(!queue.is_stalled("ghost"));
    }
}
