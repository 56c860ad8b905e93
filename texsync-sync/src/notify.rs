//! Operator notifications.
//!
//! Conflicts, unavailable locks, stranded stashes and stale markers all need a
//! human. They go through [`Notifiers`], which fans out to every configured
//! sink and never fails the caller: a broken sink is logged and skipped.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use texsync_core::config::NotifyConfig;

use crate::error::{io_err, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub level: Level,
    pub title: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl Notification {
    pub fn new(level: Level, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            level,
            title: title.into(),
            message: message.into(),
            at: Utc::now(),
        }
    }

    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Level::Info, title, message)
    }

    pub fn warning(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Level::Warning, title, message)
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Level::Error, title, message)
    }
}

/// A destination for operator notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<(), SyncError>;
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Writes notifications through the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, n: &Notification) -> Result<(), SyncError> {
        match n.level {
            Level::Info => tracing::info!("[{}] {}", n.title, n.message),
            Level::Warning => tracing::warn!("[{}] {}", n.title, n.message),
            Level::Error => tracing::error!("[{}] {}", n.title, n.message),
        }
        Ok(())
    }
}

/// Appends one JSON object per line to a journal file.
#[derive(Debug, Clone)]
pub struct JournalNotifier {
    path: PathBuf,
}

impl JournalNotifier {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Notifier for JournalNotifier {
    fn notify(&self, n: &Notification) -> Result<(), SyncError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        let mut line = serde_json::to_string(n)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| io_err(&self.path, e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| io_err(&self.path, e))?;
        Ok(())
    }
}

/// Last `limit` entries of a journal; unparsable lines are skipped.
pub fn read_journal(path: &Path, limit: usize) -> Result<Vec<Notification>, SyncError> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_err(path, e)),
    };
    let mut entries: Vec<Notification> = BufReader::new(file)
        .lines()
        .map_while(Result::ok)
        .filter_map(|line| serde_json::from_str(&line).ok())
        .collect();
    let skip = entries.len().saturating_sub(limit);
    Ok(entries.split_off(skip))
}

/// POSTs a "box" message to a log viewer.
///
/// Body: `{"id", "command": "box", "level", "title", "args": [message]}`.
pub struct HttpNotifier {
    endpoint: String,
    agent: ureq::Agent,
}

impl HttpNotifier {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(3))
                .build(),
        }
    }
}

impl Notifier for HttpNotifier {
    fn notify(&self, n: &Notification) -> Result<(), SyncError> {
        let body = serde_json::json!({
            "id": n.id,
            "command": "box",
            "level": n.level,
            "title": n.title,
            "args": [n.message],
        });
        self.agent
            .post(&self.endpoint)
            .send_json(body)
            .map_err(|e| SyncError::Notify(format!("{}: {e}", self.endpoint)))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fan-out
// ---------------------------------------------------------------------------

/// Every configured sink. Always includes [`TracingNotifier`].
pub struct Notifiers {
    sinks: Vec<Box<dyn Notifier>>,
}

impl Default for Notifiers {
    fn default() -> Self {
        Self {
            sinks: vec![Box::new(TracingNotifier)],
        }
    }
}

impl Notifiers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sinks named by `config`; `journal_path` backs the journal sink.
    pub fn from_config(config: &NotifyConfig, journal_path: &Path) -> Self {
        let mut notifiers = Self::new();
        if config.journal {
            notifiers.push(JournalNotifier::new(journal_path));
        }
        if let Some(endpoint) = &config.endpoint {
            notifiers.push(HttpNotifier::new(endpoint.clone()));
        }
        notifiers
    }

    pub fn push(&mut self, sink: impl Notifier + 'static) {
        self.sinks.push(Box::new(sink));
    }

    pub fn notify(&self, notification: Notification) {
        for sink in &self.sinks {
            if let Err(e) = sink.notify(&notification) {
                tracing::warn!("notification sink failed: {e}");
            }
        }
    }
}
