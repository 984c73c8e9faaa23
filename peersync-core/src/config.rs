//! Session configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::readiness::ReadinessPolicy;

/// Tunables for a sync session
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```json
/// { "transfer_timeout_ms": 8000, "readiness_policy": { "policy": "require_any" } }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// How long a pull may stay unanswered before the attempt fails
    pub transfer_timeout_ms: u64,
    /// Attempts per song before its queue entry is marked stalled
    pub max_transfer_attempts: u32,
    /// Which watchers the broadcaster waits for before play
    pub readiness_policy: ReadinessPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            transfer_timeout_ms: 5000,
            max_transfer_attempts: 3,
            readiness_policy: ReadinessPolicy::default(),
        }
    }
}

impl SyncConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }
}
