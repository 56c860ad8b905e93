//! Size-based rotation for the daemon logs and the notification journal.
//!
//! `daemon.log` and `daemon-err.log` rotate past 10 MiB and keep 5 copies.
//! The journal rotates past 1 MiB and keeps 3, since `texsync daemon logs`
//! only ever tails it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::paths::{journal_path, stderr_log_path, stdout_log_path};

/// When a file rotates and how many numbered copies survive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    pub max_bytes: u64,
    pub keep: usize,
}

pub const DAEMON_LOG_POLICY: RotationPolicy = RotationPolicy {
    max_bytes: 10 * 1024 * 1024,
    keep: 5,
};

pub const JOURNAL_POLICY: RotationPolicy = RotationPolicy {
    max_bytes: 1024 * 1024,
    keep: 3,
};

/// Rotate `path` if it has reached `policy.max_bytes`.
///
/// `<name>.<keep>` is dropped, `<name>.<n>` moves to `<name>.<n+1>`, the live
/// file becomes `<name>.1` and an empty live file takes its place. `Ok(false)`
/// when under the threshold or missing.
pub fn rotate_if_needed(path: &Path, policy: RotationPolicy) -> io::Result<bool> {
    let size = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if size < policy.max_bytes {
        return Ok(false);
    }

    let oldest = numbered_path(path, policy.keep);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for n in (1..policy.keep).rev() {
        let src = numbered_path(path, n);
        if src.exists() {
            fs::rename(&src, numbered_path(path, n + 1))?;
        }
    }
    fs::rename(path, numbered_path(path, 1))?;

    fs::OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(path)?;
    Ok(true)
}

/// Rotate every file the daemon appends to under `home`. Failures are logged
/// per file and never stop the others.
pub fn rotate_all(home: &Path) {
    let targets = [
        (stdout_log_path(home), DAEMON_LOG_POLICY),
        (stderr_log_path(home), DAEMON_LOG_POLICY),
        (journal_path(home), JOURNAL_POLICY),
    ];
    for (path, policy) in &targets {
        match rotate_if_needed(path, *policy) {
            Ok(true) => tracing::info!(path = %path.display(), "rotated"),
            Ok(false) => {}
            Err(err) => tracing::warn!(path = %path.display(), error = %err, "rotation failed"),
        }
    }
}

/// `daemon.log` → `daemon.log.2` for `n = 2`.
fn numbered_path(base: &Path, n: usize) -> PathBuf {
    let name = base
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("daemon.log");
    base.with_file_name(format!("{name}.{n}"))
}
