//! Sync-state snapshots for `texsync status`.
//!
//! Persists the session's [`SyncState`] at
//! `<home>/.texsync/state/<repo-id>.json`, written with the usual atomic
//! `.tmp` + rename. The snapshot is informational: nothing in a running
//! session reads decisions back from it.

use std::path::{Path, PathBuf};

use texsync_core::{RepoIdentity, SyncState};

use crate::error::{io_err, SyncError};

/// `<home>/.texsync/state/<repo-id>.json`
pub fn store_path_at(home: &Path, identity: &RepoIdentity) -> PathBuf {
    home.join(".texsync")
        .join("state")
        .join(format!("{}.json", identity.0))
}

/// Load the last snapshot, `None` if no session has written one yet.
pub fn load_at(home: &Path, identity: &RepoIdentity) -> Result<Option<SyncState>, SyncError> {
    let path = store_path_at(home, identity);
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    Ok(Some(serde_json::from_str(&contents)?))
}

/// Save a snapshot atomically.
pub fn save_at(home: &Path, identity: &RepoIdentity, state: &SyncState) -> Result<(), SyncError> {
    let path = store_path_at(home, identity);
    let Some(dir) = path.parent() else {
        return Err(io_err(path, std::io::Error::other("invalid state store path")));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let json = serde_json::to_string_pretty(state)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}
