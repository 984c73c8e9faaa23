//! Readiness handshake
//!
//! Gates a synchronized start. The broadcaster raises
//! `ReadyState::requested`; each watcher answers with a single `Ready` once
//! the active song is cached locally. Which watchers the broadcaster waits
//! for is an explicit [`ReadinessPolicy`].

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::sync::ReadyState;

/// Which watchers must signal before the broadcaster is told to play
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ReadinessPolicy {
    /// Every listed peer
    RequireAll { peer_ids: Vec<String> },
    /// The first watcher to signal
    RequireAny,
    /// Every peer connected when the request went out; peers that drop
    /// mid-request are no longer waited for
    #[default]
    RequireAllConnected,
}

/// What a `Ready` signal did on the broadcaster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyProgress {
    /// No request outstanding
    Ignored,
    /// Counted, still waiting for others
    Recorded,
    /// Policy satisfied; the request is now cleared
    Complete,
}

#[derive(Debug, Default)]
pub struct ReadinessCoordinator {
    policy: ReadinessPolicy,
    /// Broadcaster: peers the current request waits for
    expected: HashSet<String>,
    /// Broadcaster: peers that signalled for the current request
    signalled: HashSet<String>,
    /// Watcher: song we already signalled for in the current request
    ready_sent_for: Option<String>,
}

impl ReadinessCoordinator {
    pub fn new(policy: ReadinessPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn policy(&self) -> &ReadinessPolicy {
        &self.policy
    }

    // === Broadcaster side ===

    /// Start a new request. Returns true if the policy is already satisfied
    /// (nobody to wait for), in which case the request is cleared again.
    pub fn begin_request<'a>(
        &mut self,
        ready: &mut ReadyState,
        connected: impl IntoIterator<Item = &'a String>,
    ) -> bool {
        ready.requested = true;
        self.signalled.clear();
        self.expected = match &self.policy {
            ReadinessPolicy::RequireAll { peer_ids } => peer_ids.iter().cloned().collect(),
            ReadinessPolicy::RequireAny => HashSet::new(),
            ReadinessPolicy::RequireAllConnected => connected.into_iter().cloned().collect(),
        };
        debug!("Ready requested, waiting for {:?} ({:?})", self.expected, self.policy);
        self.finish_if_satisfied(ready)
    }

    /// Count a watcher's `Ready`
    pub fn record_ready(&mut self, ready: &mut ReadyState, peer_id: &str) -> ReadyProgress {
        if !ready.requested {
            return ReadyProgress::Ignored;
        }
        self.signalled.insert(peer_id.to_string());
        if self.finish_if_satisfied(ready) {
            ReadyProgress::Complete
        } else {
            ReadyProgress::Recorded
        }
    }

    /// A peer went away. Returns true if that completed the request.
    pub fn peer_disconnected(&mut self, ready: &mut ReadyState, peer_id: &str) -> bool {
        if !ready.requested || !matches!(self.policy, ReadinessPolicy::RequireAllConnected) {
            return false;
        }
        if !self.expected.remove(peer_id) {
            return false;
        }
        self.finish_if_satisfied(ready)
    }

    /// Peers still being waited for, sorted
    pub fn outstanding(&self) -> Vec<String> {
        let mut peers: Vec<String> = self.expected.difference(&self.signalled).cloned().collect();
        peers.sort();
        peers
    }

    fn is_satisfied(&self) -> bool {
        match self.policy {
            ReadinessPolicy::RequireAny => !self.signalled.is_empty(),
            _ => self.expected.is_subset(&self.signalled),
        }
    }

    fn finish_if_satisfied(&mut self, ready: &mut ReadyState) -> bool {
        if !self.is_satisfied() {
            return false;
        }
        ready.requested = false;
        self.expected.clear();
        self.signalled.clear();
        true
    }

    // === Watcher side ===

    /// The broadcaster raised or cleared its request
    pub fn set_requested(&mut self, ready: &mut ReadyState, requested: bool) {
        ready.requested = requested;
        self.ready_sent_for = None;
    }

    /// Decide whether to signal ready now that `cached_song_id` is available.
    ///
    /// True at most once per (request, active song).
    pub fn should_signal(&mut self, ready: &ReadyState, active_song_id: Option<&str>, cached_song_id: &str) -> bool {
        if !ready.requested || active_song_id != Some(cached_song_id) {
            return false;
        }
        if self.ready_sent_for.as_deref() == Some(cached_song_id) {
            return false;
        }
        self.ready_sent_for = Some(cached_song_id.to_string());
        true
    }

    pub fn reset(&mut self, ready: &mut ReadyState) {
        *ready = ReadyState::default();
        self.expected.clear();
        self.signalled.clear();
        self.ready_sent_for = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peers(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_require_all_connected() {
        let mut ready = ReadyState::default();
        let mut readiness = ReadinessCoordinator::new(ReadinessPolicy::RequireAllConnected);

        assert!(!readiness.begin_request(&mut ready, &peers(&["W1", "W2"])));
        assert!(ready.requested);

        assert_eq!(readiness.record_ready(&mut ready, "W1"), ReadyProgress::Recorded);
        assert_eq!(readiness.outstanding(), peers(&["W2"]));
        assert_eq!(readiness.record_ready(&mut ready, "W2"), ReadyProgress::Complete);
        assert!(!ready.requested);

        // Late duplicates are ignored once the request is done
        assert_eq!(readiness.record_ready(&mut ready, "W2"), ReadyProgress::Ignored);
    }

    #[test]
    fn test_disconnect_shrinks_quorum() {
        let mut ready = ReadyState::default();
        let mut readiness = ReadinessCoordinator::new(ReadinessPolicy::RequireAllConnected);

        readiness.begin_request(&mut ready, &peers(&["W1", "W2"]));
        readiness.record_ready(&mut ready, "W1");
        assert!(readiness.peer_disconnected(&mut ready, "W2"));
        assert!(!ready.requested);
    }

    #[test]
    fn test_no_watchers_completes_immediately() {
        let mut ready = ReadyState::default();
        let mut readiness = ReadinessCoordinator::new(ReadinessPolicy::RequireAllConnected);
        assert!(readiness.begin_request(&mut ready, &Vec::new()));
        assert!(!ready.requested);
    }

    #[test]
    fn test_require_any() {
        let mut ready = ReadyState::default();
        let mut readiness = ReadinessCoordinator::new(ReadinessPolicy::RequireAny);

        // Waits even with nobody connected
        assert!(!readiness.begin_request(&mut ready, &Vec::new()));
        assert_eq!(readiness.record_ready(&mut ready, "W3"), ReadyProgress::Complete);
    }

    #[test]
    fn test_require_all_listed() {
        let mut ready = ReadyState::default();
        let mut readiness = ReadinessCoordinator::new(ReadinessPolicy::RequireAll {
            peer_ids: peers(&["W1"]),
        });

        readiness.begin_request(&mut ready, &peers(&["W1", "W2"]));
        // W2 is connected but not required
        assert_eq!(readiness.record_ready(&mut ready, "W2"), ReadyProgress::Recorded);
        // Disconnects do not change an explicit list
        assert!(!readiness.peer_disconnected(&mut ready, "W1"));
        assert_eq!(readiness.record_ready(&mut ready, "W1"), ReadyProgress::Complete);
    }

    #[test]
    fn test_watcher_signals_once_per_song() {
        let mut ready = ReadyState::default();
        let mut readiness = ReadinessCoordinator::default();

        // Not requested yet
        assert!(!readiness.should_signal(&ready, Some("s1"), "s1"));

        readiness.set_requested(&mut ready, true);
        // Unrelated completion
        assert!(!readiness.should_signal(&ready, Some("s1"), "s2"));
        assert!(readiness.should_signal(&ready, Some("s1"), "s1"));
        assert!(!readiness.should_signal(&ready, Some("s1"), "s1"));

        // A fresh request allows a fresh signal
        readiness.set_requested(&mut ready, true);
        assert!(readiness.should_signal(&ready, Some("s1"), "s1"));
    }

    #[test]
    fn test_policy_from_json() {
        let policy: ReadinessPolicy =
            serde_json::from_str(r#"{"policy":"require_all","peer_ids":["W1","W2"]}"#).unwrap();
        assert_eq!(policy, ReadinessPolicy::RequireAll { peer_ids: peers(&["W1", "W2"]) });

        let policy: ReadinessPolicy = serde_json::from_str(r#"{"policy":"require_any"}"#).unwrap();
        assert_eq!(policy, ReadinessPolicy::RequireAny);
    }
}
