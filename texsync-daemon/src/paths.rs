use std::path::{Path, PathBuf};

use texsync_core::config::texsync_root;

pub const DAEMON_LABEL: &str = "dev.texsync.daemon";

pub const DAEMON_STDOUT_LOG: &str = "daemon.log";
pub const DAEMON_STDERR_LOG: &str = "daemon-err.log";
pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn run_dir(home: &Path) -> PathBuf {
    texsync_root(home).join("run")
}

pub fn socket_path(home: &Path) -> PathBuf {
    texsync_root(home).join(DAEMON_SOCKET)
}

pub fn logs_dir(home: &Path) -> PathBuf {
    texsync_root(home).join("logs")
}

pub fn stdout_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(DAEMON_STDOUT_LOG)
}

pub fn stderr_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(DAEMON_STDERR_LOG)
}

/// The notification journal shared with one-shot CLI runs.
pub fn journal_path(home: &Path) -> PathBuf {
    texsync_sync::context::journal_path_at(home)
}
