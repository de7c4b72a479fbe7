use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Uninitialized,
    Bootstrapping,
    /// The calculator was rebuilt from cached state.
    Restored,
    /// No usable cached state; the calculator starts with no history.
    Cold,
    Idle,
    /// A refresh timer is pending.
    Scheduled,
    Fetching,
    Merging,
    Persisting,
    Invalidating,
    /// The historical pin was reached or the session was shut down.
    Stopped,
    /// A fatal error halted the session.
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Uninitialized => "uninitialized",
            Phase::Bootstrapping => "bootstrapping",
            Phase::Restored => "restored",
            Phase::Cold => "cold",
            Phase::Idle => "idle",
            Phase::Scheduled => "scheduled",
            Phase::Fetching => "fetching",
            Phase::Merging => "merging",
            Phase::Persisting => "persisting",
            Phase::Invalidating => "invalidating",
            Phase::Stopped => "stopped",
            Phase::Failed => "failed",
        }
    }

    /// True once the session will make no further progress on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Stopped | Phase::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the session does after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// Request the next page right away.
    FetchNow,
    /// Request the next page after the delay.
    Schedule(Duration),
    /// Make no further requests.
    Stop,
}

/// Counters accumulated over the life of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub pages_requested: u64,
    pub pages_merged: u64,
    pub empty_pages: u64,
    pub snapshots_merged: u64,
    pub fetch_failures: u64,
    pub persist_failures: u64,
    pub store_failures: u64,
    pub restores: u64,
    pub corrupt_entries_discarded: u64,
    pub invalidations: u64,
    pub stale_results: u64,
}
