//! Typed stream events.
//!
//! Each event-stream frame carries either a (possibly partial)
//! snapshot-shaped payload or a log-shaped payload. This module classifies
//! the JSON produced by [`StreamFrameParser`](crate::frames::StreamFrameParser)
//! into a [`StreamEvent`], validating it at the boundary.

use std::collections::BTreeMap;

use jobtrail_core::snapshot::clamp_percent;
use jobtrail_core::{JobState, LogEntry, SyncJobSnapshot};
use serde::{Deserialize, Deserializer};

use crate::frames::FrameError;
use crate::transport::LogBatch;

/// One decoded stream frame.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Partial or full snapshot.
    Snapshot(SnapshotPatch),
    /// One or more log entries.
    Logs(LogBatch),
}

/// Snapshot fields present in a stream frame.
///
/// Absent fields keep the value of the snapshot the patch is applied to.
/// Nullable fields use a double `Option` so an explicit `null` can clear
/// them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPatch {
    #[serde(default)]
    pub state: Option<JobState>,
    #[serde(default, deserialize_with = "optional_percent")]
    pub percent: Option<u8>,
    #[serde(default)]
    pub emails_fetched: Option<u64>,
    #[serde(default)]
    pub emails_classified: Option<u64>,
    #[serde(default)]
    pub applications_created_or_updated: Option<u64>,
    #[serde(default)]
    pub skipped: Option<u64>,
    #[serde(default, deserialize_with = "nullable")]
    pub total_emails_estimated: Option<Option<u64>>,
    #[serde(default)]
    pub category_counts: Option<BTreeMap<String, u64>>,
    #[serde(default, deserialize_with = "nullable")]
    pub eta_seconds: Option<Option<u64>>,
    #[serde(default, deserialize_with = "nullable")]
    pub error_message: Option<Option<String>>,
}

impl SnapshotPatch {
    /// `true` when the frame carried no snapshot field at all.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Overlay this patch on `base` to form a full snapshot.
    ///
    /// Returns `None` when there is no base and the patch does not name a
    /// state, since a snapshot without a state is meaningless.
    pub fn apply_to(self, base: Option<&SyncJobSnapshot>) -> Option<SyncJobSnapshot> {
        let mut snapshot = match (base, self.state) {
            (_, Some(state)) => {
                let mut s = base.cloned().unwrap_or_else(|| SyncJobSnapshot::new(state));
                s.state = state;
                s
            }
            (Some(base), None) => base.clone(),
            (None, None) => return None,
        };

        if let Some(v) = self.percent {
            snapshot.percent = v;
        }
        if let Some(v) = self.emails_fetched {
            snapshot.emails_fetched = v;
        }
        if let Some(v) = self.emails_classified {
            snapshot.emails_classified = v;
        }
        if let Some(v) = self.applications_created_or_updated {
            snapshot.applications_created_or_updated = v;
        }
        if let Some(v) = self.skipped {
            snapshot.skipped = v;
        }
        if let Some(v) = self.total_emails_estimated {
            snapshot.total_emails_estimated = v;
        }
        if let Some(v) = self.category_counts {
            snapshot.category_counts = v;
        }
        if let Some(v) = self.eta_seconds {
            snapshot.eta_seconds = v;
        }
        if let Some(v) = self.error_message {
            snapshot.error_message = v;
        }

        Some(snapshot.normalized())
    }
}

/// Classify one frame payload.
///
/// * `{"logs": [...], "lastSeq": n}` is a log batch.
/// * An object with `seq` and `message` is a single log entry.
/// * Any other object with at least one snapshot field is a snapshot patch.
pub fn parse_event(payload: serde_json::Value) -> Result<StreamEvent, FrameError> {
    let Some(object) = payload.as_object() else {
        return Err(FrameError::UnknownShape(payload.to_string()));
    };

    let decode_err = |e: serde_json::Error, payload: &serde_json::Value| FrameError::InvalidJson {
        message: e.to_string(),
        payload: payload.to_string(),
    };

    if object.contains_key("logs") {
        return serde_json::from_value::<LogBatch>(payload.clone())
            .map(StreamEvent::Logs)
            .map_err(|e| decode_err(e, &payload));
    }

    if object.contains_key("seq") && object.contains_key("message") {
        return serde_json::from_value::<LogEntry>(payload.clone())
            .map(|entry| {
                StreamEvent::Logs(LogBatch {
                    logs: vec![entry],
                    last_seq: None,
                })
            })
            .map_err(|e| decode_err(e, &payload));
    }

    let patch = serde_json::from_value::<SnapshotPatch>(payload.clone())
        .map_err(|e| decode_err(e, &payload))?;
    if patch.is_empty() {
        return Err(FrameError::UnknownShape(payload.to_string()));
    }
    Ok(StreamEvent::Snapshot(patch))
}

fn optional_percent<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<i64>::deserialize(deserializer)?.map(clamp_percent))
}

/// Distinguish an explicit `null` (`Some(None)`) from an absent field
/// (`None`, via `#[serde(default)]`).
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
