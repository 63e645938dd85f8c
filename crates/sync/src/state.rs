//! Client-side view of one tracked job.

use std::fmt;

use jobtrail_core::types::{JobId, Seq};
use jobtrail_core::{LogEntry, SyncJobSnapshot};

use crate::logs::LogCursorReconciler;
use crate::merger::ProgressSnapshotMerger;

/// Supervisor lifecycle, independent from the job's own state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Lifecycle {
    Idle = 0,
    Active = 1,
    Stopped = 2,
}

impl Lifecycle {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Idle,
            1 => Self::Active,
            _ => Self::Stopped,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Active => "ACTIVE",
            Self::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest snapshot, accumulated logs and log cursor for one job.
///
/// Only the supervisor mutates this; subscribers and
/// [`ProgressSupervisor::state`](crate::ProgressSupervisor::state) see it
/// read-only.
#[derive(Debug, Clone)]
pub struct ClientState {
    pub(crate) job_id: Option<JobId>,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) snapshots: ProgressSnapshotMerger,
    pub(crate) logs: LogCursorReconciler,
}

impl ClientState {
    pub(crate) fn new(snapshots: ProgressSnapshotMerger) -> Self {
        Self {
            job_id: None,
            lifecycle: Lifecycle::Idle,
            snapshots,
            logs: LogCursorReconciler::new(),
        }
    }

    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn latest_snapshot(&self) -> Option<&SyncJobSnapshot> {
        self.snapshots.current()
    }

    /// Log entries, strictly ascending by `seq`.
    pub fn logs(&self) -> &[LogEntry] {
        self.logs.entries()
    }

    /// Cursor for the next log fetch.
    pub fn last_seen_seq(&self) -> Seq {
        self.logs.cursor()
    }

    /// `true` once the job reached `Completed`, `Failed` or `Cancelled`.
    pub fn is_terminal(&self) -> bool {
        self.snapshots.is_terminal()
    }
}
