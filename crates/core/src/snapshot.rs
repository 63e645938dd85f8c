//! Sync job progress snapshot.
//!
//! A snapshot is a full, self-contained description of a job's progress.
//! Each successful fetch replaces the previous snapshot rather than
//! patching it. Field names follow the camelCase JSON used by the sync
//! API.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// JobState
// ---------------------------------------------------------------------------

/// Server-reported lifecycle state of a sync job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    /// `Completed`, `Failed` and `Cancelled` admit no further job-driven
    /// transition.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Wire name, e.g. `"RUNNING"`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// SyncJobSnapshot
// ---------------------------------------------------------------------------

/// Latest full progress report for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncJobSnapshot {
    pub state: JobState,
    /// Completion percentage, clamped to `0..=100` when decoded.
    #[serde(default, deserialize_with = "deserialize_percent")]
    pub percent: u8,
    #[serde(default)]
    pub emails_fetched: u64,
    #[serde(default)]
    pub emails_classified: u64,
    #[serde(default)]
    pub applications_created_or_updated: u64,
    #[serde(default)]
    pub skipped: u64,
    /// Unknown until the server has estimated it.
    #[serde(default)]
    pub total_emails_estimated: Option<u64>,
    /// Per-category counts. Keys may differ between snapshots.
    #[serde(default)]
    pub category_counts: BTreeMap<String, u64>,
    /// Only meaningful while `Running`.
    #[serde(default)]
    pub eta_seconds: Option<u64>,
    /// Only present when `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// A counter that went backwards between two `Running` snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterRegression {
    pub field: &'static str,
    pub held: u64,
    pub incoming: u64,
}

impl SyncJobSnapshot {
    /// A snapshot in `state` with every counter at zero.
    pub fn new(state: JobState) -> Self {
        Self {
            state,
            percent: 0,
            emails_fetched: 0,
            emails_classified: 0,
            applications_created_or_updated: 0,
            skipped: 0,
            total_emails_estimated: None,
            category_counts: BTreeMap::new(),
            eta_seconds: None,
            error_message: None,
        }
    }

    /// Drop fields that have no meaning in the current state: the ETA
    /// outside `Running` and the error message outside `Failed`.
    pub fn normalized(mut self) -> Self {
        if self.state != JobState::Running {
            self.eta_seconds = None;
        }
        if self.state != JobState::Failed {
            self.error_message = None;
        }
        self
    }

    /// First counter in `self` that is lower than in `held`, if any.
    ///
    /// `total_emails_estimated` is only compared when both sides carry an
    /// estimate. Category counts are not compared because their keys are
    /// not stable across snapshots.
    pub fn first_regression(&self, held: &Self) -> Option<CounterRegression> {
        let counters = [
            ("percent", u64::from(held.percent), u64::from(self.percent)),
            ("emailsFetched", held.emails_fetched, self.emails_fetched),
            ("emailsClassified", held.emails_classified, self.emails_classified),
            (
                "applicationsCreatedOrUpdated",
                held.applications_created_or_updated,
                self.applications_created_or_updated,
            ),
            ("skipped", held.skipped, self.skipped),
        ];

        let estimate = match (held.total_emails_estimated, self.total_emails_estimated) {
            (Some(h), Some(i)) => Some(("totalEmailsEstimated", h, i)),
            _ => None,
        };

        counters
            .into_iter()
            .chain(estimate)
            .find(|&(_, held, incoming)| incoming < held)
            .map(|(field, held, incoming)| CounterRegression {
                field,
                held,
                incoming,
            })
    }
}

/// Clamp a raw integer percentage into `0..=100`.
pub fn clamp_percent(raw: i64) -> u8 {
    raw.clamp(0, 100) as u8
}

/// Serde adapter decoding any integer and clamping it with
/// [`clamp_percent`].
pub fn deserialize_percent<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    i64::deserialize(deserializer).map(clamp_percent)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
