//! Cursor-based log reconciliation.
//!
//! Log batches arrive from polling and from the event stream, possibly
//! overlapping and out of order. [`LogCursorReconciler`] keeps the
//! accumulated entries sorted by `seq` without duplicates and tracks the
//! highest `seq` seen as the cursor for the next fetch.

use jobtrail_core::types::Seq;
use jobtrail_core::LogEntry;

use crate::transport::{Transport, TransportError};

/// Result of one log fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedLogs {
    pub entries: Vec<LogEntry>,
    /// Cursor to use for the following fetch.
    pub new_cursor: Seq,
}

/// Fetch entries newer than `after_seq` for `job_id`.
///
/// The returned cursor is the highest `seq` in the batch, or `after_seq`
/// when the batch is empty; it never moves backwards. The server's own
/// `lastSeq` is only used for diagnostics because the entries themselves
/// are what the client has actually incorporated.
pub async fn fetch<T>(transport: &T, job_id: &str, after_seq: Seq) -> Result<FetchedLogs, TransportError>
where
    T: Transport + ?Sized,
{
    let batch = transport.get_logs(job_id, after_seq).await?;
    let batch_max = batch.logs.iter().map(|e| e.seq).max();
    let new_cursor = batch_max.map_or(after_seq, |m| m.max(after_seq));

    if let Some(last_seq) = batch.last_seq {
        if last_seq > new_cursor {
            tracing::debug!(
                job_id,
                after_seq,
                last_seq,
                new_cursor,
                "Server reports entries beyond the fetched batch",
            );
        }
    }

    Ok(FetchedLogs {
        entries: batch.logs,
        new_cursor,
    })
}

/// Sorted, deduplicated log accumulator with a monotonic cursor.
#[derive(Debug, Clone, Default)]
pub struct LogCursorReconciler {
    entries: Vec<LogEntry>,
    last_seen_seq: Seq,
}

impl LogCursorReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest `seq` observed so far; `0` before any entry.
    pub fn cursor(&self) -> Seq {
        self.last_seen_seq
    }

    /// All entries, ascending by `seq`.
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge a batch and return the entries that were not already present,
    /// ascending by `seq`.
    ///
    /// Merging the same batch twice leaves the log unchanged the second
    /// time. The cursor advances to the highest `seq` in the batch even
    /// when every entry was a duplicate.
    pub fn merge<I>(&mut self, batch: I) -> Vec<LogEntry>
    where
        I: IntoIterator<Item = LogEntry>,
    {
        let mut appended = Vec::new();

        for entry in batch {
            self.last_seen_seq = self.last_seen_seq.max(entry.seq);

            if let Err(index) = self.position(entry.seq) {
                self.entries.insert(index, entry.clone());
                appended.push(entry);
            }
        }

        appended.sort_by_key(|e| e.seq);
        appended
    }

    /// Merge a fetched batch and advance the cursor to its `new_cursor`.
    pub fn merge_fetched(&mut self, fetched: FetchedLogs) -> Vec<LogEntry> {
        let appended = self.merge(fetched.entries);
        self.last_seen_seq = self.last_seen_seq.max(fetched.new_cursor);
        appended
    }

    fn position(&self, seq: Seq) -> Result<usize, usize> {
        // Fast path: new entries almost always extend the tail.
        match self.entries.last() {
            Some(last) if last.seq < seq => Err(self.entries.len()),
            None => Err(0),
            _ => self.entries.binary_search_by_key(&seq, |e| e.seq),
        }
    }
}
