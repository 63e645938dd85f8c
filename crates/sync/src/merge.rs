//! The single writer for [`ClientState`].
//!
//! Both channel tasks hand their results to one [`MergePoint`]. Every
//! mutation happens under its state lock, after checking the lifecycle,
//! so a response that resolves after `stop()` is discarded instead of
//! merged. Subscribers are notified under the same lock, which keeps
//! notifications in mutation order across the two channels.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

use jobtrail_core::types::{JobId, Seq};
use jobtrail_core::SyncJobSnapshot;

use crate::events::{Channel, Subscriber, SupervisorEvent};
use crate::logs::FetchedLogs;
use crate::merger::ProgressSnapshotMerger;
use crate::messages::SnapshotPatch;
use crate::state::{ClientState, Lifecycle};
use crate::transport::LogBatch;

/// What a merge did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct MergeReport {
    /// State was mutated and subscribers were notified.
    pub changed: bool,
    /// The held snapshot is terminal after the merge.
    pub terminal: bool,
    /// The supervisor is stopped; nothing was merged.
    pub stopped: bool,
}

impl MergeReport {
    fn stopped() -> Self {
        Self {
            stopped: true,
            ..Self::default()
        }
    }
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: Vec<(u64, Subscriber)>,
}

pub(crate) struct MergePoint {
    lifecycle: AtomicU8,
    /// Set once by `begin`; readable without the state lock.
    job_id: OnceLock<JobId>,
    state: Mutex<ClientState>,
    subscribers: Mutex<Registry>,
}

impl MergePoint {
    pub fn new(snapshots: ProgressSnapshotMerger) -> Self {
        Self {
            lifecycle: AtomicU8::new(Lifecycle::Idle as u8),
            job_id: OnceLock::new(),
            state: Mutex::new(ClientState::new(snapshots)),
            subscribers: Mutex::new(Registry::default()),
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_u8(self.lifecycle.load(Ordering::Acquire))
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle() == Lifecycle::Active
    }

    /// Move `Idle -> Active` for `job_id`. Returns the lifecycle that
    /// prevented it otherwise.
    pub fn begin(&self, job_id: JobId) -> Result<(), Lifecycle> {
        self.lifecycle
            .compare_exchange(
                Lifecycle::Idle as u8,
                Lifecycle::Active as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(Lifecycle::from_u8)?;

        let _ = self.job_id.set(job_id.clone());
        let mut state = self.lock_state();
        state.job_id = Some(job_id);
        state.lifecycle = Lifecycle::Active;
        Ok(())
    }

    /// Mark the supervisor stopped. Lock-free, so it is safe to call from
    /// a subscriber callback. Returns `false` if it was already stopped.
    pub fn stop(&self) -> bool {
        let previous = self.lifecycle.swap(Lifecycle::Stopped as u8, Ordering::AcqRel);
        previous != Lifecycle::Stopped as u8
    }

    /// Lock-free, so callbacks and `stop()` may call it.
    pub fn job_id(&self) -> Option<JobId> {
        self.job_id.get().cloned()
    }

    pub fn log_cursor(&self) -> Seq {
        self.lock_state().logs.cursor()
    }

    pub fn is_terminal(&self) -> bool {
        self.lock_state().is_terminal()
    }

    /// A copy of the current state.
    pub fn read(&self) -> ClientState {
        let mut state = self.lock_state().clone();
        state.lifecycle = self.lifecycle();
        state
    }

    // ---- merges ----

    pub fn apply_snapshot(&self, snapshot: SyncJobSnapshot) -> MergeReport {
        self.mutate(|state| state.snapshots.apply(snapshot).is_changed())
    }

    /// Overlay a stream patch on the held snapshot and apply the result.
    /// Returns `None` when the patch has no state and nothing is held yet.
    pub fn apply_patch(&self, patch: SnapshotPatch) -> Option<MergeReport> {
        let mut dropped = false;
        let report = self.mutate(|state| match patch.apply_to(state.snapshots.current()) {
            Some(snapshot) => state.snapshots.apply(snapshot).is_changed(),
            None => {
                dropped = true;
                false
            }
        });
        (!dropped).then_some(report)
    }

    pub fn merge_fetched(&self, fetched: FetchedLogs) -> MergeReport {
        self.mutate(|state| {
            let before = state.logs.cursor();
            let appended = state.logs.merge_fetched(fetched);
            !appended.is_empty() || state.logs.cursor() != before
        })
    }

    /// Merge log entries that arrived on the event stream.
    pub fn merge_log_batch(&self, batch: LogBatch) -> MergeReport {
        self.mutate(|state| !state.logs.merge(batch.logs).is_empty())
    }

    /// Apply the user-initiated cancel edge. Returns `None` when stopped,
    /// otherwise whether the edge was applied.
    pub fn cancel(&self) -> Option<bool> {
        let report = self.mutate(|state| state.snapshots.cancel());
        (!report.stopped).then_some(report.changed)
    }

    // ---- subscribers ----

    pub fn subscribe(&self, subscriber: Subscriber) -> u64 {
        let mut registry = self.lock_subscribers();
        registry.next_id += 1;
        let id = registry.next_id;
        registry.entries.push((id, subscriber));
        id
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut registry = self.lock_subscribers();
        let before = registry.entries.len();
        registry.entries.retain(|(entry_id, _)| *entry_id != id);
        registry.entries.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock_subscribers().entries.len()
    }

    /// Tell subscribers that `channel` stopped on a credential rejection.
    pub fn auth_required(&self, channel: Channel, status: u16) {
        if !self.is_active() {
            return;
        }
        tracing::error!(channel = %channel, status, "Sync API rejected credentials");
        self.notify(&SupervisorEvent::AuthRequired { channel, status });
    }

    // ---- private helpers ----

    /// Run `merge` under the state lock unless stopped, and notify
    /// subscribers when it reports a change.
    fn mutate(&self, merge: impl FnOnce(&mut ClientState) -> bool) -> MergeReport {
        let mut state = self.lock_state();
        if !self.is_active() {
            return MergeReport::stopped();
        }

        let changed = merge(&mut state);
        let report = MergeReport {
            changed,
            terminal: state.is_terminal(),
            stopped: false,
        };

        if changed {
            state.lifecycle = self.lifecycle();
            self.notify(&SupervisorEvent::StateChanged(&*state));
        }
        report
    }

    fn notify(&self, event: &SupervisorEvent<'_>) {
        let subscribers: Vec<Subscriber> = self
            .lock_subscribers()
            .entries
            .iter()
            .map(|(_, s)| Arc::clone(s))
            .collect();

        for subscriber in subscribers {
            subscriber(event);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_subscribers(&self) -> MutexGuard<'_, Registry> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle returned by [`ProgressSupervisor::subscribe`](crate::ProgressSupervisor::subscribe).
///
/// Dropping the handle keeps the subscription alive; call
/// [`unsubscribe`](Self::unsubscribe) to end it.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    merge: Weak<MergePoint>,
}

impl Subscription {
    pub(crate) fn new(id: u64, merge: Weak<MergePoint>) -> Self {
        Self { id, merge }
    }

    /// Stop future notifications to this subscriber. Network activity is
    /// unaffected.
    pub fn unsubscribe(self) {
        if let Some(merge) = self.merge.upgrade() {
            merge.unsubscribe(self.id);
        }
    }
}

impl fmt::Debug for MergePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergePoint")
            .field("lifecycle", &self.lifecycle())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
