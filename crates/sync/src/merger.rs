//! Snapshot merge with state-machine and monotonic-counter validation.
//!
//! Snapshots reach the client over two paths (stream and poll) with no
//! ordering guarantee between them. A delayed poll response must never
//! overwrite a fresher stream-delivered snapshot, and nothing may move a
//! job out of a terminal state. [`ProgressSnapshotMerger::apply`] enforces
//! both and reports, rather than raises, every rejection.

use std::fmt;
use std::sync::Arc;

use jobtrail_core::state_machine::{self, TransitionOrigin};
use jobtrail_core::{CoreError, CounterRegression, JobState, SyncJobSnapshot};

/// Callback invoked for every rejected snapshot.
pub type RejectionHook = Arc<dyn Fn(&SnapshotRejection) + Send + Sync>;

/// Why a snapshot was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotRejection {
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition { from: JobState, to: JobState },

    #[error("stale snapshot: {field} went from {held} to {incoming}")]
    Regression {
        field: &'static str,
        held: u64,
        incoming: u64,
    },
}

impl From<CoreError> for SnapshotRejection {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::InvalidTransition { from, to } => Self::IllegalTransition { from, to },
        }
    }
}

impl From<CounterRegression> for SnapshotRejection {
    fn from(r: CounterRegression) -> Self {
        Self::Regression {
            field: r.field,
            held: r.held,
            incoming: r.incoming,
        }
    }
}

/// Result of [`ProgressSnapshotMerger::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The snapshot replaced the held one.
    Replaced,
    /// The snapshot was acceptable but identical to the held one.
    Unchanged,
    /// The snapshot was dropped; the held one is untouched.
    Rejected(SnapshotRejection),
}

impl ApplyOutcome {
    pub fn is_changed(&self) -> bool {
        matches!(self, Self::Replaced)
    }
}

/// Holds the latest accepted snapshot for one job.
#[derive(Clone, Default)]
pub struct ProgressSnapshotMerger {
    current: Option<SyncJobSnapshot>,
    on_rejected: Option<RejectionHook>,
}

impl fmt::Debug for ProgressSnapshotMerger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressSnapshotMerger")
            .field("current", &self.current)
            .field("has_rejection_hook", &self.on_rejected.is_some())
            .finish()
    }
}

impl ProgressSnapshotMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report rejections to `hook` in addition to the log.
    pub fn with_rejection_hook(mut self, hook: RejectionHook) -> Self {
        self.on_rejected = Some(hook);
        self
    }

    pub fn current(&self) -> Option<&SyncJobSnapshot> {
        self.current.as_ref()
    }

    pub fn state(&self) -> Option<JobState> {
        self.current.as_ref().map(|s| s.state)
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_some_and(JobState::is_terminal)
    }

    /// Offer a server-reported snapshot.
    ///
    /// Accepted when nothing is held yet, when the state edge is legal,
    /// or when the state is unchanged. `Running -> Running` additionally
    /// requires every counter to be at least its held value. A terminal
    /// state only accepts a refresh in the same state.
    pub fn apply(&mut self, snapshot: SyncJobSnapshot) -> ApplyOutcome {
        let Some(held) = &self.current else {
            self.current = Some(snapshot);
            return ApplyOutcome::Replaced;
        };

        let verdict = if held.state == snapshot.state {
            if held.state == JobState::Running {
                snapshot.first_regression(held).map(SnapshotRejection::from)
            } else {
                None
            }
        } else {
            state_machine::validate_transition(held.state, snapshot.state, TransitionOrigin::Server)
                .err()
                .map(SnapshotRejection::from)
        };

        if let Some(rejection) = verdict {
            self.reject(rejection.clone());
            return ApplyOutcome::Rejected(rejection);
        }

        if *held == snapshot {
            return ApplyOutcome::Unchanged;
        }
        self.current = Some(snapshot);
        ApplyOutcome::Replaced
    }

    /// Apply the user-initiated cancel edge.
    ///
    /// Moves any non-terminal (or absent) snapshot to `Cancelled`, keeping
    /// its counters. Returns `false` when the job was already terminal.
    pub fn cancel(&mut self) -> bool {
        let from = self.state();
        if let Some(from) = from {
            if !state_machine::is_allowed(from, JobState::Cancelled, TransitionOrigin::UserCancel) {
                return false;
            }
        }

        let mut cancelled = self
            .current
            .take()
            .unwrap_or_else(|| SyncJobSnapshot::new(JobState::Cancelled));
        cancelled.state = JobState::Cancelled;
        self.current = Some(cancelled.normalized());
        true
    }

    fn reject(&self, rejection: SnapshotRejection) {
        tracing::warn!(rejection = %rejection, "Rejected out-of-order snapshot");
        if let Some(hook) = &self.on_rejected {
            hook(&rejection);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assert_matches::assert_matches;

    use super::*;

    fn snapshot(state: JobState, percent: u8) -> SyncJobSnapshot {
        SyncJobSnapshot {
            percent,
            ..SyncJobSnapshot::new(state)
        }
    }

    #[test]
    fn first_snapshot_is_always_accepted() {
        let mut merger = ProgressSnapshotMerger::new();
        assert_eq!(merger.apply(snapshot(JobState::Completed, 100)), ApplyOutcome::Replaced);
        assert_eq!(merger.state(), Some(JobState::Completed));
    }

    #[test]
    fn legal_progression_is_accepted() {
        let mut merger = ProgressSnapshotMerger::new();
        merger.apply(snapshot(JobState::Queued, 0));

        assert!(merger.apply(snapshot(JobState::Running, 10)).is_changed());
        assert!(merger.apply(snapshot(JobState::Running, 60)).is_changed());
        assert!(merger.apply(snapshot(JobState::Completed, 100)).is_changed());
        assert!(merger.is_terminal());
    }

    #[test]
    fn lower_percent_while_running_is_rejected() {
        let mut merger = ProgressSnapshotMerger::new();
        merger.apply(snapshot(JobState::Running, 50));

        let outcome = merger.apply(snapshot(JobState::Running, 30));
        assert_matches!(
            outcome,
            ApplyOutcome::Rejected(SnapshotRejection::Regression { field: "percent", held: 50, incoming: 30 })
        );
        assert_eq!(merger.current().unwrap().percent, 50);
    }

    #[test]
    fn stream_then_stale_poll_keeps_fresher_snapshot() {
        let mut merger = ProgressSnapshotMerger::new();
        merger.apply(snapshot(JobState::Running, 10));
        merger.apply(snapshot(JobState::Running, 5));

        assert_eq!(merger.current().unwrap().percent, 10);
    }

    #[test]
    fn terminal_state_is_sticky() {
        let mut merger = ProgressSnapshotMerger::new();
        merger.apply(snapshot(JobState::Running, 90));
        merger.apply(snapshot(JobState::Completed, 100));

        for state in [JobState::Queued, JobState::Running, JobState::Failed, JobState::Cancelled] {
            assert_matches!(
                merger.apply(snapshot(state, 100)),
                ApplyOutcome::Rejected(SnapshotRejection::IllegalTransition { from: JobState::Completed, .. })
            );
        }
        assert_eq!(merger.state(), Some(JobState::Completed));
    }

    #[test]
    fn terminal_refresh_in_same_state_is_accepted() {
        let mut merger = ProgressSnapshotMerger::new();
        merger.apply(snapshot(JobState::Running, 90));
        merger.apply(snapshot(JobState::Completed, 100));

        let mut refreshed = snapshot(JobState::Completed, 100);
        refreshed.applications_created_or_updated = 4;
        assert_eq!(merger.apply(refreshed), ApplyOutcome::Replaced);
        assert_eq!(merger.state(), Some(JobState::Completed));
    }

    #[test]
    fn identical_snapshot_is_unchanged() {
        let mut merger = ProgressSnapshotMerger::new();
        merger.apply(snapshot(JobState::Running, 20));

        let outcome = merger.apply(snapshot(JobState::Running, 20));
        assert_eq!(outcome, ApplyOutcome::Unchanged);
    }

    #[test]
    fn server_cannot_skip_running() {
        let mut merger = ProgressSnapshotMerger::new();
        merger.apply(snapshot(JobState::Queued, 0));

        assert_matches!(
            merger.apply(snapshot(JobState::Completed, 100)),
            ApplyOutcome::Rejected(SnapshotRejection::IllegalTransition { .. })
        );
        assert_eq!(merger.state(), Some(JobState::Queued));
    }

    #[test]
    fn failure_from_running_accepted_with_lower_counters() {
        let mut merger = ProgressSnapshotMerger::new();
        merger.apply(snapshot(JobState::Running, 70));

        let mut failed = snapshot(JobState::Failed, 0);
        failed.error_message = Some("mailbox locked".into());
        assert!(merger.apply(failed).is_changed());
        assert_eq!(
            merger.current().unwrap().error_message.as_deref(),
            Some("mailbox locked")
        );
    }

    #[test]
    fn rejection_hook_is_called() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut merger = ProgressSnapshotMerger::new().with_rejection_hook(Arc::new(
            move |r: &SnapshotRejection| sink.lock().unwrap().push(r.clone()),
        ));

        merger.apply(snapshot(JobState::Running, 40));
        merger.apply(snapshot(JobState::Running, 39));
        merger.apply(snapshot(JobState::Queued, 0));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_matches!(seen[1], SnapshotRejection::IllegalTransition { from: JobState::Running, to: JobState::Queued });
    }

    #[test]
    fn cancel_moves_running_to_cancelled() {
        let mut merger = ProgressSnapshotMerger::new();
        let mut running = snapshot(JobState::Running, 30);
        running.eta_seconds = Some(120);
        merger.apply(running);

        assert!(merger.cancel());
        let held = merger.current().unwrap();
        assert_eq!(held.state, JobState::Cancelled);
        assert_eq!(held.percent, 30);
        assert!(held.eta_seconds.is_none());
    }

    #[test]
    fn cancel_without_snapshot_creates_one() {
        let mut merger = ProgressSnapshotMerger::new();
        assert!(merger.cancel());
        assert_eq!(merger.state(), Some(JobState::Cancelled));
    }

    #[test]
    fn cancel_after_terminal_is_noop() {
        let mut merger = ProgressSnapshotMerger::new();
        merger.apply(snapshot(JobState::Running, 99));
        merger.apply(snapshot(JobState::Completed, 100));

        assert!(!merger.cancel());
        assert_eq!(merger.state(), Some(JobState::Completed));
    }

    #[test]
    fn cancelled_job_rejects_later_running_snapshot() {
        let mut merger = ProgressSnapshotMerger::new();
        merger.apply(snapshot(JobState::Queued, 0));
        merger.cancel();

        assert_matches!(
            merger.apply(snapshot(JobState::Running, 5)),
            ApplyOutcome::Rejected(_)
        );
        assert_eq!(merger.state(), Some(JobState::Cancelled));
    }
}
