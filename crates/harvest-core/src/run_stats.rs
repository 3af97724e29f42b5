use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SourceError;

/// Terminal state of one adapter's sub-run within a collection run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubRunStatus {
    #[default]
    Completed,
    /// The adapter reported at least one [`SourceError`].
    Failed,
    /// The sub-run hit its deadline; what was stored before expiry stays.
    TimedOut,
    /// The run was cancelled while this sub-run was in flight.
    Cancelled,
    /// The run was cancelled before this adapter was dispatched.
    Skipped,
}

impl std::fmt::Display for SubRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SubRunStatus::Completed => "completed",
            SubRunStatus::Failed => "failed",
            SubRunStatus::TimedOut => "timed_out",
            SubRunStatus::Cancelled => "cancelled",
            SubRunStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Counters for one platform in one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformStats {
    pub status: SubRunStatus,
    pub fetched: u64,
    pub normalized: u64,
    pub normalization_failed: u64,
    pub filtered_out: u64,
    pub duplicate: u64,
    pub enriched: u64,
    pub stored: u64,
    pub store_failed: u64,
}

impl PlatformStats {
    fn absorb(&mut self, other: &PlatformStats) {
        self.fetched += other.fetched;
        self.normalized += other.normalized;
        self.normalization_failed += other.normalization_failed;
        self.filtered_out += other.filtered_out;
        self.duplicate += other.duplicate;
        self.enriched += other.enriched;
        self.stored += other.stored;
        self.store_failed += other.store_failed;
    }
}

/// How a run ended as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every dispatched adapter ran to the end of its stream, successfully or
    /// not. Per-adapter failures are listed in [`RunStats::errors`].
    Completed,
    /// A stop signal interrupted the run; results stored so far are valid.
    Cancelled,
    /// The run was ended early, e.g. by a sustained store outage.
    Aborted { reason: String },
}

impl RunOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Completed => "completed",
            RunOutcome::Cancelled => "cancelled",
            RunOutcome::Aborted { .. } => "aborted",
        }
    }
}

/// Report produced by one orchestrator run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub outcome: RunOutcome,
    pub keywords: Vec<String>,
    pub platforms: BTreeMap<String, PlatformStats>,
    pub errors: Vec<SourceError>,
}

impl RunStats {
    /// Sum of the per-platform counters. `status` is left at its default.
    #[must_use]
    pub fn totals(&self) -> PlatformStats {
        let mut totals = PlatformStats::default();
        for stats in self.platforms.values() {
            totals.absorb(stats);
        }
        totals
    }

    #[must_use]
    pub fn platform(&self, name: &str) -> Option<&PlatformStats> {
        self.platforms.get(name)
    }

    /// `true` only for runs that were not cancelled or aborted. Adapter
    /// failures inside a completed run do not count against it.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }

    /// Platforms whose sub-run did not complete cleanly.
    pub fn failed_platforms(&self) -> impl Iterator<Item = (&str, SubRunStatus)> {
        self.platforms
            .iter()
            .filter(|(_, s)| s.status != SubRunStatus::Completed)
            .map(|(name, s)| (name.as_str(), s.status))
    }
}
