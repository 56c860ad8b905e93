//! texsync core library: domain types, config persistence, the document
//! marker grammar and the generation state machine.
//!
//! Public API surface:
//! - [`types`]: newtypes and domain structs
//! - [`error`]: [`ConfigError`], [`MarkerError`]
//! - [`config`]: load / save of `~/.texsync/config.yaml`
//! - [`marker`]: `%parameters:` marker parsing and rewriting
//! - [`session`]: per-session shared flags
//! - [`state_machine`]: [`EnvironmentStateMachine`]

pub mod config;
pub mod error;
pub mod marker;
pub mod session;
pub mod state_machine;
pub mod types;

pub use config::SessionConfig;
pub use error::{ConfigError, MarkerError};
pub use marker::{DocumentMarker, MarkerId, MarkerStatus};
pub use session::{CancellationToken, SessionFlags};
pub use state_machine::{Decision, EnvironmentStateMachine, ProcessingState, StreamingTicket};
pub use types::{
    content_digest, LockLease, OwnerToken, RemoteUrl, RepoIdentity, StashRecord, SyncState,
};
