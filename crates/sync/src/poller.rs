//! Per-channel acquisition loops.
//!
//! Each channel is one task running a sequential loop: issue one call,
//! merge the result, sleep. A call is always awaited (or cancelled)
//! before the next one starts, so a channel never has two requests in
//! flight. Every call site checks the lifecycle first and every await
//! races the channel's cancellation token.

use std::sync::Arc;
use std::time::Duration;

use jobtrail_core::types::JobId;
use tokio_util::sync::CancellationToken;

use crate::config::SupervisorConfig;
use crate::events::{Channel, SupervisorHooks};
use crate::logs;
use crate::merge::MergePoint;
use crate::processor::{consume_stream, StreamEnd};
use crate::reconnect::{next_delay, ChannelBackoff};
use crate::transport::{with_timeout, Transport, TransportError};

/// Everything a channel task needs, owned by the task.
#[derive(Clone)]
pub(crate) struct ChannelContext {
    pub job_id: JobId,
    pub transport: Arc<dyn Transport>,
    pub shared: Arc<MergePoint>,
    pub config: SupervisorConfig,
    pub hooks: SupervisorHooks,
    pub cancel: CancellationToken,
}

impl ChannelContext {
    /// `false` once the supervisor stopped or the channel was cancelled.
    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled() && self.shared.is_active()
    }

    /// Sleep for `delay` unless cancelled first. Returns `false` on cancel.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

/// Outcome of one channel tick.
enum Tick {
    Continue,
    Done,
}

// ---------------------------------------------------------------------------
// Log channel
// ---------------------------------------------------------------------------

/// Poll logs until the supervisor stops. Keeps running after the job is
/// terminal so trailing summary lines are still captured.
pub(crate) async fn run_log_channel(ctx: ChannelContext) {
    let mut backoff = ChannelBackoff::new(ctx.config.log_interval, ctx.config.backoff.clone());
    tracing::debug!(
        job_id = %ctx.job_id,
        interval_ms = ctx.config.log_interval.as_millis() as u64,
        "Log channel started",
    );

    while ctx.is_live() {
        let cursor = ctx.shared.log_cursor();
        let result = tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            r = with_timeout(
                ctx.config.request_timeout,
                logs::fetch(ctx.transport.as_ref(), &ctx.job_id, cursor),
            ) => r,
        };

        let tick = match result {
            Ok(fetched) => {
                backoff.record_success();
                let report = ctx.shared.merge_fetched(fetched);
                if report.stopped {
                    Tick::Done
                } else {
                    Tick::Continue
                }
            }
            Err(e) => on_failure(&ctx, Channel::Logs, &mut backoff, e),
        };

        if matches!(tick, Tick::Done) || !ctx.pause(backoff.next_wait()).await {
            break;
        }
    }

    tracing::debug!(job_id = %ctx.job_id, "Log channel stopped");
}

// ---------------------------------------------------------------------------
// Progress channel
// ---------------------------------------------------------------------------

/// Acquire snapshots until the job is terminal or the supervisor stops.
///
/// Streams when the transport supports it and the config prefers it;
/// falls back to polling for the rest of the job once the stream is
/// unsupported or has used up its connect attempts.
pub(crate) async fn run_progress_channel(ctx: ChannelContext) {
    if ctx.config.prefer_stream && ctx.transport.supports_streaming() {
        match stream_progress(&ctx).await {
            Tick::Done => {
                tracing::debug!(job_id = %ctx.job_id, "Progress channel stopped");
                return;
            }
            Tick::Continue => {
                tracing::info!(job_id = %ctx.job_id, "Falling back to progress polling");
            }
        }
    }

    poll_progress(&ctx).await;
    tracing::debug!(job_id = %ctx.job_id, "Progress channel stopped");
}

/// `Continue` means fall back to polling; `Done` means progress
/// acquisition is over.
async fn stream_progress(ctx: &ChannelContext) -> Tick {
    let max_attempts = ctx.config.max_stream_attempts;
    let mut delay = ctx.config.progress_interval;

    for attempt in 1..=max_attempts {
        if !ctx.is_live() || ctx.shared.is_terminal() {
            return Tick::Done;
        }

        let opened = tokio::select! {
            _ = ctx.cancel.cancelled() => return Tick::Done,
            r = with_timeout(ctx.config.request_timeout, ctx.transport.open_stream(&ctx.job_id)) => r,
        };

        match opened {
            Ok(stream) => {
                tracing::info!(job_id = %ctx.job_id, attempt, "Progress stream opened");
                match consume_stream(ctx, stream).await {
                    StreamEnd::Terminal | StreamEnd::Stopped => return Tick::Done,
                    StreamEnd::Closed => {
                        tracing::warn!(job_id = %ctx.job_id, attempt, "Progress stream closed by server");
                    }
                    StreamEnd::Idle => {
                        tracing::warn!(
                            job_id = %ctx.job_id,
                            attempt,
                            idle_ms = ctx.config.stream_idle_timeout.as_millis() as u64,
                            "Progress stream went silent",
                        );
                    }
                    StreamEnd::Failed(e) if e.is_auth() => {
                        report_auth(ctx, Channel::Progress, &e);
                        return Tick::Done;
                    }
                    StreamEnd::Failed(e) => {
                        tracing::warn!(job_id = %ctx.job_id, attempt, error = %e, "Progress stream failed");
                    }
                }
            }
            Err(TransportError::StreamUnsupported) => return Tick::Continue,
            Err(e) if e.is_auth() => {
                report_auth(ctx, Channel::Progress, &e);
                return Tick::Done;
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %ctx.job_id,
                    attempt,
                    error = %e,
                    "Progress stream connect failed",
                );
            }
        }

        if attempt < max_attempts {
            if !ctx.pause(delay).await {
                return Tick::Done;
            }
            delay = next_delay(delay, &ctx.config.backoff);
        }
    }

    if ctx.is_live() && !ctx.shared.is_terminal() {
        Tick::Continue
    } else {
        Tick::Done
    }
}

async fn poll_progress(ctx: &ChannelContext) {
    let mut backoff = ChannelBackoff::new(ctx.config.progress_interval, ctx.config.backoff.clone());

    while ctx.is_live() && !ctx.shared.is_terminal() {
        let result = tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            r = with_timeout(ctx.config.request_timeout, ctx.transport.get_snapshot(&ctx.job_id)) => r,
        };

        let tick = match result {
            Ok(snapshot) => {
                backoff.record_success();
                let report = ctx.shared.apply_snapshot(snapshot);
                if report.changed {
                    tracing::debug!(job_id = %ctx.job_id, "Polled snapshot merged");
                }
                if report.terminal {
                    tracing::info!(job_id = %ctx.job_id, "Job reached a terminal state");
                }
                if report.stopped || report.terminal {
                    Tick::Done
                } else {
                    Tick::Continue
                }
            }
            Err(e) => on_failure(ctx, Channel::Progress, &mut backoff, e),
        };

        if matches!(tick, Tick::Done) || !ctx.pause(backoff.next_wait()).await {
            break;
        }
    }
}

// ---- private helpers ----

fn on_failure(
    ctx: &ChannelContext,
    channel: Channel,
    backoff: &mut ChannelBackoff,
    error: TransportError,
) -> Tick {
    if error.is_auth() {
        report_auth(ctx, channel, &error);
        return Tick::Done;
    }

    backoff.record_failure();
    tracing::warn!(
        job_id = %ctx.job_id,
        channel = %channel,
        failures = backoff.consecutive_failures(),
        transient = error.is_transient(),
        delay_ms = backoff.current_delay().as_millis() as u64,
        error = %error,
        "Sync API call failed, retrying",
    );
    Tick::Continue
}

fn report_auth(ctx: &ChannelContext, channel: Channel, error: &TransportError) {
    let status = error.status().unwrap_or(401);
    ctx.shared.auth_required(channel, status);
}
