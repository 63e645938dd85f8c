//! Events delivered to supervisor subscribers.

use std::fmt;
use std::sync::Arc;

use crate::frames::ParseErrorHook;
use crate::merger::RejectionHook;
use crate::state::ClientState;

/// The two independently scheduled acquisition paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Progress,
    Logs,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Progress => "progress",
            Self::Logs => "logs",
        })
    }
}

/// A notification to subscribers.
#[derive(Debug, Clone, Copy)]
pub enum SupervisorEvent<'a> {
    /// A snapshot or log merge was accepted. Carries the full state after
    /// the mutation.
    StateChanged(&'a ClientState),

    /// The sync API rejected the credential. The named channel has
    /// stopped; the host should refresh the session or redirect to login.
    AuthRequired { channel: Channel, status: u16 },
}

/// Subscriber callback.
pub type Subscriber = Arc<dyn Fn(&SupervisorEvent<'_>) + Send + Sync>;

/// Optional diagnostic callbacks.
#[derive(Clone, Default)]
pub struct SupervisorHooks {
    /// Called for every malformed stream frame.
    pub on_parse_error: Option<ParseErrorHook>,
    /// Called for every snapshot the merger refuses.
    pub on_rejected_snapshot: Option<RejectionHook>,
}

impl fmt::Debug for SupervisorHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupervisorHooks")
            .field("on_parse_error", &self.on_parse_error.is_some())
            .field("on_rejected_snapshot", &self.on_rejected_snapshot.is_some())
            .finish()
    }
}
