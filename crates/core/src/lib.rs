//! Domain types shared by every jobtrail crate.
//!
//! This crate has zero internal dependencies. It defines the sync job
//! snapshot and log entry records as they appear on the wire, the job
//! state machine, and the core error taxonomy.

pub mod error;
pub mod log_entry;
pub mod snapshot;
pub mod state_machine;
pub mod types;

pub use error::CoreError;
pub use log_entry::{LogEntry, LogLevel};
pub use snapshot::{CounterRegression, JobState, SyncJobSnapshot};
