//! # texsync-sync
//!
//! Keeps a local LaTeX document, a streaming generator and a git remote
//! consistent.
//!
//! Open a [`Session`] from `~/.texsync/config.yaml`, call
//! [`Session::prepare`], then feed local file events to
//! [`Session::local_change`] and run [`Session::monitor`] on a thread.

pub mod collaborators;
pub mod context;
pub mod error;
pub mod file_guard;
pub mod git;
pub mod lock;
pub mod monitor;
pub mod notify;
pub mod orchestrator;
pub mod pipeline;
pub mod state_store;

pub use collaborators::{
    CommandCompiler, CommandGenerator, Compiler, GenerationRequest, Generator,
    ParameterLineExtractor, Prompt, PromptExtractor,
};
pub use context::{SessionStatus, SyncContext};
pub use error::{GitError, GitErrorKind, SyncError};
pub use file_guard::{LocalFileGuard, WriteReceipt};
pub use git::GitSyncClient;
pub use lock::{DistributedLock, LeaseGuard, LeaseStore};
pub use monitor::{CycleOutcome, DocumentTrigger, RemoteMonitor, ShutdownSignal, SkipReason};
pub use notify::{Level, Notification, Notifier, Notifiers};
pub use orchestrator::{LocalChange, PushOutcome, SyncOrchestrator};
pub use pipeline::{ActionOutcome, Preparation, Session, SyncAction};
