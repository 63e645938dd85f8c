//! Pluggable transport seam between the supervisor and the sync API.
//!
//! [`Transport`] abstracts the four operations the supervisor needs:
//! starting a job, fetching a snapshot, fetching logs after a cursor and,
//! optionally, opening an event stream. A poll-only backend simply leaves
//! [`Transport::supports_streaming`] at its default of `false`.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use jobtrail_core::types::{JobId, Seq};
use jobtrail_core::{LogEntry, SyncJobSnapshot};
use serde::Deserialize;

/// Raw bytes of an event stream. Finite: it ends when the server closes
/// the response, and dropping it cancels the underlying request.
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Response body of `GET /sync/{jobId}/logs?since={seq}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogBatch {
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    /// Highest sequence number the server knows of, if it reports one.
    #[serde(default)]
    pub last_seq: Option<Seq>,
}

/// Operations the supervisor issues against the sync backend.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Issue the start-sync command and return the new job's id.
    async fn start_job(&self) -> Result<JobId, TransportError>;

    /// Fetch the latest full snapshot for `job_id`.
    async fn get_snapshot(&self, job_id: &str) -> Result<SyncJobSnapshot, TransportError>;

    /// Fetch log entries with `seq > after_seq`.
    async fn get_logs(&self, job_id: &str, after_seq: Seq) -> Result<LogBatch, TransportError>;

    /// Whether [`open_stream`](Self::open_stream) is available.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Open the progress event stream for `job_id`.
    async fn open_stream(&self, _job_id: &str) -> Result<ByteStream, TransportError> {
        Err(TransportError::StreamUnsupported)
    }

    /// Ask the server to cancel `job_id`.
    async fn cancel_job(&self, _job_id: &str) -> Result<(), TransportError> {
        Err(TransportError::CancelUnsupported)
    }
}

/// Errors from a transport call.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The call did not resolve within the per-call timeout.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The sync API returned a non-2xx status other than 401/403.
    #[error("Sync API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// The sync API rejected the bearer credential (401/403).
    #[error("Sync API rejected credentials ({status})")]
    Unauthorized { status: u16 },

    /// The response body did not have the expected shape.
    #[error("Malformed response: {0}")]
    Decode(String),

    /// This transport has no event stream.
    #[error("Transport does not support event streaming")]
    StreamUnsupported,

    /// This transport cannot cancel jobs server-side.
    #[error("Transport does not support job cancellation")]
    CancelUnsupported,
}

impl TransportError {
    /// `true` for 401/403 responses, which are never retried internally.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// Failures worth retrying on the next tick.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request(_) | Self::Timeout(_) | Self::Decode(_) => true,
            Self::Api { status, .. } => *status >= 500 || *status == 429 || *status == 408,
            Self::Unauthorized { .. } | Self::StreamUnsupported | Self::CancelUnsupported => false,
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } | Self::Unauthorized { status } => Some(*status),
            Self::Request(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Await `call`, failing with [`TransportError::Timeout`] once `limit`
/// elapses.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(limit)),
    }
}
