//! Public entry point: tracks one sync job from start to `stop()`.
//!
//! [`ProgressSupervisor`] owns the two channel tasks (progress and logs),
//! their cancellation tokens, and the [`MergePoint`] both feed. All
//! timers and tasks are created in [`start`](ProgressSupervisor::start)
//! and torn down in [`stop`](ProgressSupervisor::stop); nothing is
//! process-global.

use std::sync::{Arc, Mutex, PoisonError};

use jobtrail_core::types::JobId;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::SupervisorConfig;
use crate::events::{SupervisorEvent, SupervisorHooks};
use crate::merge::{MergePoint, Subscription};
use crate::merger::ProgressSnapshotMerger;
use crate::poller::{run_log_channel, run_progress_channel, ChannelContext};
use crate::state::{ClientState, Lifecycle};
use crate::transport::{with_timeout, Transport, TransportError};

/// Errors returned by supervisor commands.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Supervisor is already tracking a job")]
    AlreadyStarted,

    #[error("Supervisor has not been started")]
    NotStarted,

    #[error("Supervisor has been stopped")]
    Stopped,

    #[error("Failed to start sync job: {0}")]
    StartJob(#[source] TransportError),
}

impl SupervisorError {
    fn from_lifecycle(lifecycle: Lifecycle) -> Self {
        match lifecycle {
            Lifecycle::Idle => Self::NotStarted,
            Lifecycle::Active => Self::AlreadyStarted,
            Lifecycle::Stopped => Self::Stopped,
        }
    }
}

/// Tracks one sync job and reconciles its stream, snapshots and logs into
/// a single [`ClientState`].
///
/// A supervisor is single-use: `Idle -> Active -> Stopped`. Create a new
/// one per job.
pub struct ProgressSupervisor {
    transport: Arc<dyn Transport>,
    config: SupervisorConfig,
    hooks: SupervisorHooks,
    shared: Arc<MergePoint>,
    /// Cancelled by `stop()`; parent of both channel tokens.
    cancel: CancellationToken,
    /// Cancelled by `stop()` or `cancel()`.
    progress_cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ProgressSupervisor {
    pub fn new(transport: Arc<dyn Transport>, config: SupervisorConfig) -> Self {
        Self::with_hooks(transport, config, SupervisorHooks::default())
    }

    /// Create a supervisor that reports dropped frames and rejected
    /// snapshots to `hooks`.
    pub fn with_hooks(
        transport: Arc<dyn Transport>,
        config: SupervisorConfig,
        hooks: SupervisorHooks,
    ) -> Self {
        let merger = match &hooks.on_rejected_snapshot {
            Some(hook) => ProgressSnapshotMerger::new().with_rejection_hook(hook.clone()),
            None => ProgressSnapshotMerger::new(),
        };
        let cancel = CancellationToken::new();
        let progress_cancel = cancel.child_token();

        Self {
            transport,
            config,
            hooks,
            shared: Arc::new(MergePoint::new(merger)),
            cancel,
            progress_cancel,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Begin tracking `job_id`: spawns the progress channel and the log
    /// channel on the current Tokio runtime.
    pub fn start(&self, job_id: impl Into<JobId>) -> Result<(), SupervisorError> {
        let job_id = job_id.into();
        self.shared
            .begin(job_id.clone())
            .map_err(SupervisorError::from_lifecycle)?;

        tracing::info!(
            job_id = %job_id,
            streaming = self.config.prefer_stream && self.transport.supports_streaming(),
            progress_interval_ms = self.config.progress_interval.as_millis() as u64,
            log_interval_ms = self.config.log_interval.as_millis() as u64,
            "Sync supervisor started",
        );

        let context = |cancel: CancellationToken| ChannelContext {
            job_id: job_id.clone(),
            transport: Arc::clone(&self.transport),
            shared: Arc::clone(&self.shared),
            config: self.config.clone(),
            hooks: self.hooks.clone(),
            cancel,
        };

        let progress = tokio::spawn(run_progress_channel(context(self.progress_cancel.clone())));
        let logs = tokio::spawn(run_log_channel(context(self.cancel.child_token())));

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.push(progress);
        tasks.push(logs);
        Ok(())
    }

    /// Issue the start-sync command, then [`start`](Self::start) tracking
    /// the returned job.
    pub async fn start_job(&self) -> Result<JobId, SupervisorError> {
        match self.shared.lifecycle() {
            Lifecycle::Idle => {}
            other => return Err(SupervisorError::from_lifecycle(other)),
        }

        let job_id = with_timeout(self.config.request_timeout, self.transport.start_job())
            .await
            .map_err(SupervisorError::StartJob)?;

        self.start(job_id.clone())?;
        Ok(job_id)
    }

    /// Register `callback` for every accepted mutation and for auth
    /// failures.
    ///
    /// Callbacks run on a channel task while the state lock is held, so
    /// they must be quick and must not call [`state`](Self::state).
    /// [`stop`](Self::stop), [`job_id`](Self::job_id),
    /// [`lifecycle`](Self::lifecycle) and unsubscribing never take that
    /// lock and are fine from inside a callback.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SupervisorEvent<'_>) + Send + Sync + 'static,
    {
        let id = self.shared.subscribe(Arc::new(callback));
        Subscription::new(id, Arc::downgrade(&self.shared))
    }

    /// Stop both channels. In-flight requests are cancelled and any
    /// response that still resolves is discarded. Idempotent.
    pub fn stop(&self) {
        let was_running = self.shared.stop();
        self.cancel.cancel();

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for task in tasks.drain(..) {
            task.abort();
        }

        if was_running {
            tracing::info!(job_id = ?self.shared.job_id(), "Sync supervisor stopped");
        }
    }

    /// Cancel the job on behalf of the user.
    ///
    /// Applies the `-> Cancelled` edge locally (subscribers are notified
    /// immediately), stops progress acquisition and asks the server to
    /// cancel. The server call is best effort. Log polling continues
    /// until [`stop`](Self::stop). Returns `false` if the job was
    /// already terminal.
    pub async fn cancel(&self) -> Result<bool, SupervisorError> {
        let lifecycle = self.shared.lifecycle();
        if lifecycle != Lifecycle::Active {
            return Err(SupervisorError::from_lifecycle(lifecycle));
        }

        let applied = self.shared.cancel().ok_or(SupervisorError::Stopped)?;
        if !applied {
            return Ok(false);
        }
        self.progress_cancel.cancel();

        let Some(job_id) = self.shared.job_id() else {
            return Ok(true);
        };
        tracing::info!(job_id = %job_id, "Sync job cancelled by user");

        let call = with_timeout(self.config.request_timeout, self.transport.cancel_job(&job_id));
        let result = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(true),
            r = call => r,
        };
        match result {
            Ok(()) => {}
            Err(TransportError::CancelUnsupported) => {
                tracing::debug!(job_id = %job_id, "Transport cannot cancel server-side");
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Server-side cancel failed");
            }
        }
        Ok(true)
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.shared.lifecycle()
    }

    pub fn job_id(&self) -> Option<JobId> {
        self.shared.job_id()
    }

    /// A copy of the current [`ClientState`].
    pub fn state(&self) -> ClientState {
        self.shared.read()
    }
}

impl Drop for ProgressSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ProgressSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSupervisor")
            .field("lifecycle", &self.shared.lifecycle())
            .field("config", &self.config)
            .field("hooks", &self.hooks)
            .finish()
    }
}
