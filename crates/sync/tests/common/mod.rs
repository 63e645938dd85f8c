//! Shared helpers for supervisor integration tests.
//!
//! [`ScriptedTransport`] serves queued responses and counts every call so
//! tests can assert on network activity as well as on state.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use futures::StreamExt;
use jobtrail_core::types::{JobId, Seq};
use jobtrail_core::{JobState, LogEntry, LogLevel, SyncJobSnapshot};
use jobtrail_sync::reconnect::BackoffPolicy;
use jobtrail_sync::{
    ByteStream, Channel, LogBatch, SupervisorConfig, SupervisorEvent, Transport, TransportError,
};
use tokio::sync::{Notify, Semaphore};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Install a test log writer once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn entry(seq: Seq) -> LogEntry {
    LogEntry {
        seq,
        timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
        level: LogLevel::Info,
        message: format!("entry {seq}"),
    }
}

pub fn batch(seqs: &[Seq]) -> LogBatch {
    LogBatch {
        logs: seqs.iter().copied().map(entry).collect(),
        last_seq: seqs.iter().copied().max(),
    }
}

pub fn snapshot(state: JobState, percent: u8) -> SyncJobSnapshot {
    SyncJobSnapshot {
        percent,
        ..SyncJobSnapshot::new(state)
    }
}

/// Fast intervals, no jitter.
pub fn fast_config() -> SupervisorConfig {
    SupervisorConfig {
        progress_interval: Duration::from_millis(100),
        log_interval: Duration::from_millis(100),
        request_timeout: Duration::from_secs(1),
        backoff: BackoffPolicy {
            after_failures: 3,
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.0,
        },
        max_stream_attempts: 3,
        stream_idle_timeout: Duration::from_secs(5),
        prefer_stream: true,
    }
}

pub fn unavailable() -> TransportError {
    TransportError::Api {
        status: 503,
        body: "unavailable".into(),
    }
}

// ---------------------------------------------------------------------------
// Event recorder
// ---------------------------------------------------------------------------

/// Owned copy of one [`SupervisorEvent`].
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    State {
        snapshot: Option<SyncJobSnapshot>,
        log_seqs: Vec<Seq>,
        cursor: Seq,
    },
    Auth {
        channel: Channel,
        status: u16,
    },
}

#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<Recorded>>>);

impl Recorder {
    pub fn callback(&self) -> impl Fn(&SupervisorEvent<'_>) + Send + Sync + 'static {
        let events = Arc::clone(&self.0);
        move |event: &SupervisorEvent<'_>| {
            let recorded = match event {
                SupervisorEvent::StateChanged(state) => Recorded::State {
                    snapshot: state.latest_snapshot().cloned(),
                    log_seqs: state.logs().iter().map(|e| e.seq).collect(),
                    cursor: state.last_seen_seq(),
                },
                SupervisorEvent::AuthRequired { channel, status } => Recorded::Auth {
                    channel: *channel,
                    status: *status,
                },
            };
            events.lock().unwrap().push(recorded);
        }
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.0.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

// ---------------------------------------------------------------------------
// ScriptedTransport
// ---------------------------------------------------------------------------

/// One scripted stream connection.
pub enum ScriptedStream {
    /// Serve these chunks, then either end or stay open silently.
    Chunks { chunks: Vec<Vec<u8>>, hold_open: bool },
    /// Fail the connect.
    Error(TransportError),
}

#[derive(Default)]
pub struct ScriptedTransport {
    streaming: bool,
    start_results: Mutex<VecDeque<Result<JobId, TransportError>>>,
    snapshots: Mutex<VecDeque<Result<SyncJobSnapshot, TransportError>>>,
    last_snapshot: Mutex<Option<SyncJobSnapshot>>,
    log_batches: Mutex<VecDeque<Result<LogBatch, TransportError>>>,
    log_failure: Mutex<Option<u16>>,
    streams: Mutex<VecDeque<ScriptedStream>>,
    log_gate: Mutex<Option<Arc<Semaphore>>>,
    pub log_entered: Arc<Notify>,

    pub start_calls: AtomicUsize,
    pub snapshot_calls: AtomicUsize,
    pub log_calls: AtomicUsize,
    pub stream_calls: AtomicUsize,
    pub cancel_calls: AtomicUsize,
    pub log_cursors: Mutex<Vec<Seq>>,
    pub seen_job_ids: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn poll_only() -> Self {
        Self::default()
    }

    pub fn streaming() -> Self {
        Self {
            streaming: true,
            ..Self::default()
        }
    }

    pub fn push_start(&self, result: Result<JobId, TransportError>) {
        self.start_results.lock().unwrap().push_back(result);
    }

    pub fn push_snapshot(&self, snapshot: SyncJobSnapshot) {
        self.snapshots.lock().unwrap().push_back(Ok(snapshot));
    }

    pub fn push_snapshot_error(&self, error: TransportError) {
        self.snapshots.lock().unwrap().push_back(Err(error));
    }

    pub fn push_logs(&self, batch: LogBatch) {
        self.log_batches.lock().unwrap().push_back(Ok(batch));
    }

    pub fn push_logs_error(&self, error: TransportError) {
        self.log_batches.lock().unwrap().push_back(Err(error));
    }

    /// Fail every log call with `status` once the queue is empty.
    pub fn fail_logs_with(&self, status: u16) {
        *self.log_failure.lock().unwrap() = Some(status);
    }

    pub fn push_stream(&self, chunks: &[&str], hold_open: bool) {
        self.streams.lock().unwrap().push_back(ScriptedStream::Chunks {
            chunks: chunks.iter().map(|c| c.as_bytes().to_vec()).collect(),
            hold_open,
        });
    }

    pub fn push_stream_error(&self, error: TransportError) {
        self.streams.lock().unwrap().push_back(ScriptedStream::Error(error));
    }

    /// Make every `get_logs` wait for a permit on the returned semaphore.
    pub fn gate_logs(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.log_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn start_job(&self) -> Result<JobId, TransportError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        self.start_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("job-1".into()))
    }

    async fn get_snapshot(&self, job_id: &str) -> Result<SyncJobSnapshot, TransportError> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_job_ids.lock().unwrap().push(job_id.to_string());

        let next = self.snapshots.lock().unwrap().pop_front();
        match next {
            Some(Ok(snapshot)) => {
                *self.last_snapshot.lock().unwrap() = Some(snapshot.clone());
                Ok(snapshot)
            }
            Some(Err(e)) => Err(e),
            None => self.last_snapshot.lock().unwrap().clone().ok_or_else(unavailable),
        }
    }

    async fn get_logs(&self, _job_id: &str, after_seq: Seq) -> Result<LogBatch, TransportError> {
        self.log_calls.fetch_add(1, Ordering::SeqCst);
        self.log_cursors.lock().unwrap().push(after_seq);
        self.log_entered.notify_one();

        let gate = self.log_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }

        let next = self.log_batches.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => match *self.log_failure.lock().unwrap() {
                Some(status) => Err(TransportError::Api {
                    status,
                    body: String::new(),
                }),
                None => Ok(LogBatch::default()),
            },
        }
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    async fn open_stream(&self, _job_id: &str) -> Result<ByteStream, TransportError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.streams.lock().unwrap().pop_front();

        match next {
            None => Err(unavailable()),
            Some(ScriptedStream::Error(e)) => Err(e),
            Some(ScriptedStream::Chunks { chunks, hold_open }) => {
                let body = futures::stream::iter(
                    chunks
                        .into_iter()
                        .map(|c| Ok::<_, TransportError>(Bytes::from(c))),
                );
                if hold_open {
                    Ok(body.chain(futures::stream::pending()).boxed())
                } else {
                    Ok(body.boxed())
                }
            }
        }
    }

    async fn cancel_job(&self, _job_id: &str) -> Result<(), TransportError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
