use crate::snapshot::JobState;

/// Domain-level errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: JobState, to: JobState },
}
