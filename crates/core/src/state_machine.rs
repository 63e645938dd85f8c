//! Sync job state machine.
//!
//! Server-reported transitions follow [`valid_transitions`]. The only
//! other edge is a user-initiated cancel, which may leave any
//! non-terminal state. Nothing leaves a terminal state.

use crate::error::CoreError;
use crate::snapshot::JobState;

/// Who is asking for a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOrigin {
    /// A snapshot delivered by the server.
    Server,
    /// An explicit cancel issued by the local user.
    UserCancel,
}

/// Target states reachable from `from` via a server-reported snapshot.
///
/// Terminal states return an empty slice.
pub fn valid_transitions(from: JobState) -> &'static [JobState] {
    use JobState::*;

    match from {
        Queued => &[Running, Failed],
        // Running -> Running carries counter updates.
        Running => &[Running, Completed, Failed, Cancelled],
        Completed | Failed | Cancelled => &[],
    }
}

/// Check whether a server-reported transition from `from` to `to` is legal.
pub fn can_transition(from: JobState, to: JobState) -> bool {
    valid_transitions(from).contains(&to)
}

/// Check whether a transition is legal for the given origin.
pub fn is_allowed(from: JobState, to: JobState, origin: TransitionOrigin) -> bool {
    match origin {
        TransitionOrigin::Server => can_transition(from, to),
        TransitionOrigin::UserCancel => to == JobState::Cancelled && !from.is_terminal(),
    }
}

/// Validate a transition, returning [`CoreError::InvalidTransition`] for
/// illegal ones.
pub fn validate_transition(
    from: JobState,
    to: JobState,
    origin: TransitionOrigin,
) -> Result<(), CoreError> {
    if is_allowed(from, to, origin) {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition { from, to })
    }
}
