/// Server-assigned identifier of one sync job.
pub type JobId = String;

/// Log sequence number. Strictly increasing per job, gaps allowed.
pub type Seq = u64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
