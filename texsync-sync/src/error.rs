//! Error types for texsync-sync.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use texsync_core::error::{ConfigError, MarkerError};

/// How a failed git command should be treated by its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitErrorKind {
    /// Network trouble or a timeout. Safe to retry.
    Transient,
    /// Non-fast-forward or merge conflict. Needs a human; never retried.
    Conflict,
    /// Credentials rejected. Surfaced immediately.
    AuthFailure,
    /// Repository, ref or path does not exist.
    NotFound,
    /// Any other non-zero exit (e.g. a stale `.git/index.lock`).
    Failed,
}

impl fmt::Display for GitErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GitErrorKind::Transient => "transient",
            GitErrorKind::Conflict => "conflict",
            GitErrorKind::AuthFailure => "authentication failure",
            GitErrorKind::NotFound => "not found",
            GitErrorKind::Failed => "failed",
        })
    }
}

/// A classified git failure. `detail` is already redacted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("git {op} {kind}: {detail}")]
pub struct GitError {
    pub kind: GitErrorKind,
    pub op: String,
    pub detail: String,
}

impl GitError {
    pub fn is_transient(&self) -> bool {
        self.kind == GitErrorKind::Transient
    }

    pub fn is_conflict(&self) -> bool {
        self.kind == GitErrorKind::Conflict
    }
}

/// All errors that can arise from sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The local file's advisory lock stayed busy for the whole retry budget.
    #[error("timed out locking {path} after {attempts} attempts")]
    LockTimeout { path: PathBuf, attempts: u32 },

    /// The distributed lease stayed held by someone else for the whole retry budget.
    #[error("repository lock {key} unavailable after {attempts} attempts")]
    LockUnavailable { key: String, attempts: u32 },

    /// A classified git failure.
    #[error(transparent)]
    Git(#[from] GitError),

    /// `git stash pop` conflicted; the stash and the conflicted tree are left in place.
    #[error("stash '{label}' could not be re-applied cleanly; resolve by hand")]
    StashConflict { label: String },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The lease store itself failed (unreachable server, corrupt lease file).
    #[error("lock store error: {0}")]
    LockStore(String),

    /// JSON serialization/deserialization error (state store, lease files).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("marker error: {0}")]
    Marker(#[from] MarkerError),

    /// The generator failed, timed out or was cancelled.
    #[error("generation failed: {0}")]
    Generation(String),

    /// A notification sink could not deliver.
    #[error("notification failed: {0}")]
    Notify(String),

    /// The compile collaborator failed.
    #[error("compile failed: {0}")]
    Compile(String),
}

impl SyncError {
    /// Conditions an operator has to look at, as opposed to routine failures.
    pub fn needs_operator(&self) -> bool {
        match self {
            SyncError::StashConflict { .. } | SyncError::LockTimeout { .. } => true,
            SyncError::LockUnavailable { .. } => true,
            SyncError::Git(e) => matches!(
                e.kind,
                GitErrorKind::Conflict | GitErrorKind::AuthFailure | GitErrorKind::Failed
            ),
            _ => false,
        }
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
