//! Event-stream consumption.
//!
//! Reads byte chunks from an open progress stream, decodes them with a
//! [`StreamFrameParser`], classifies each frame with [`parse_event`] and
//! hands the result to the merge point. Returns when the stream ends,
//! fails, goes silent, or the job reaches a terminal state.

use futures::StreamExt;

use crate::frames::{FrameError, StreamFrameParser};
use crate::merge::MergeReport;
use crate::messages::{parse_event, StreamEvent};
use crate::poller::ChannelContext;
use crate::transport::{ByteStream, TransportError};

/// Why [`consume_stream`] returned.
#[derive(Debug)]
pub(crate) enum StreamEnd {
    /// The job reached a terminal state; progress acquisition is done.
    Terminal,
    /// The supervisor stopped or the channel was cancelled.
    Stopped,
    /// The server closed the response while the job was still live.
    Closed,
    /// No bytes arrived within the idle timeout.
    Idle,
    /// Reading the body failed.
    Failed(TransportError),
}

/// Drain `stream` into the merge point until it ends.
pub(crate) async fn consume_stream(ctx: &ChannelContext, mut stream: ByteStream) -> StreamEnd {
    let mut parser = match &ctx.hooks.on_parse_error {
        Some(hook) => StreamFrameParser::new().with_error_hook(hook.clone()),
        None => StreamFrameParser::new(),
    };
    let idle = ctx.config.stream_idle_timeout;

    loop {
        let next = tokio::select! {
            _ = ctx.cancel.cancelled() => return StreamEnd::Stopped,
            next = tokio::time::timeout(idle, stream.next()) => next,
        };

        let chunk = match next {
            Err(_) => return StreamEnd::Idle,
            Ok(None) => return StreamEnd::Closed,
            Ok(Some(Err(e))) => return StreamEnd::Failed(e),
            Ok(Some(Ok(chunk))) => chunk,
        };

        for payload in parser.feed(&chunk) {
            let Some(report) = handle_payload(ctx, &parser, payload) else {
                continue;
            };
            if report.stopped {
                return StreamEnd::Stopped;
            }
            if report.terminal {
                return StreamEnd::Terminal;
            }
        }
    }
}

/// Merge one decoded frame. `None` when the frame was dropped.
fn handle_payload(
    ctx: &ChannelContext,
    parser: &StreamFrameParser,
    payload: serde_json::Value,
) -> Option<MergeReport> {
    let event = match parse_event(payload) {
        Ok(event) => event,
        Err(e) => {
            parser.report(&e);
            return None;
        }
    };

    match event {
        StreamEvent::Snapshot(patch) => {
            let report = ctx.shared.apply_patch(patch);
            if report.is_none() {
                parser.report(&FrameError::UnknownShape(
                    "snapshot fields without a state before the first snapshot".into(),
                ));
            }
            report
        }
        StreamEvent::Logs(batch) => {
            tracing::trace!(
                job_id = %ctx.job_id,
                count = batch.logs.len(),
                "Log entries received on stream",
            );
            Some(ctx.shared.merge_log_batch(batch))
        }
    }
}
