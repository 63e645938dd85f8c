//! Client-side progress and log supervisor for server-side sync jobs.
//!
//! Tracks one job from a client, reconciling a live event stream and the
//! pull-based snapshot and log endpoints into one consistent, monotonic
//! [`ClientState`]. The supervisor is transport-agnostic: anything that
//! implements [`Transport`] works, and [`HttpTransport`] covers the REST
//! sync API.

pub mod api;
pub mod config;
pub mod events;
pub mod frames;
pub mod logs;
pub mod merger;
pub mod messages;
pub mod reconnect;
pub mod state;
pub mod supervisor;
pub mod transport;

mod merge;
mod poller;
mod processor;

pub use api::{CredentialSource, HttpTransport, HttpTransportConfig, StaticToken};
pub use config::SupervisorConfig;
pub use events::{Channel, SupervisorEvent, SupervisorHooks};
pub use merge::Subscription;
pub use state::{ClientState, Lifecycle};
pub use supervisor::{ProgressSupervisor, SupervisorError};
pub use transport::{ByteStream, LogBatch, Transport, TransportError};
