pub mod daemon;
pub mod init;
pub mod notifications;
pub mod status;
pub mod sync;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;

use texsync_daemon::{
    request_cancel, request_pull, request_push, request_reset, request_status, DaemonError,
};
use texsync_sync::{Session, SyncAction};

pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// Where an action ended up running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Daemon,
    OneShot,
}

/// Run `action` on the daemon if one is listening, otherwise in a one-shot
/// session built from the saved config. Either way the outcome comes back as
/// the same JSON shape.
pub fn dispatch(home: &Path, action: SyncAction) -> Result<(Route, Value)> {
    let via_daemon = match &action {
        SyncAction::Push => request_push(home),
        SyncAction::Pull => request_pull(home),
        SyncAction::Reset(to) => request_reset(home, &to.to_string()),
        SyncAction::Cancel => request_cancel(home),
        SyncAction::Status => request_status(home),
    };
    match via_daemon {
        Ok(value) => return Ok((Route::Daemon, value)),
        Err(DaemonError::DaemonNotRunning { .. }) => {}
        Err(err) => return Err(err).context("daemon request failed"),
    }

    let session = Session::open_at(home).context("failed to open session")?;
    if matches!(action, SyncAction::Push | SyncAction::Pull | SyncAction::Reset(_)) {
        session.prepare().context("failed to prepare repository")?;
    }
    let outcome = session.run(action).context("sync action failed")?;
    let value = serde_json::to_value(outcome).context("failed to serialize outcome")?;
    Ok((Route::OneShot, value))
}
