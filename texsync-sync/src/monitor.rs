//! Remote polling.
//!
//! ## One cycle
//!
//! 1. Skip while a generation is streaming.
//! 2. Take the repository lease; busy means someone else is syncing, so skip.
//! 3. `fetch`, then count commits on `origin/<branch>` we lack. Zero: push
//!    any local commits a rejected push left behind, then done.
//! 4. Copy unsynced local edits into the working tree, then stash if dirty.
//! 5. `pull`, then pop the stash. A conflicting pop leaves both in place. A
//!    failed pull pops the stash back when the tree allows it and otherwise
//!    names the stash in an operator notification.
//! 6. Copy the merged file to the local document, compile, and push the
//!    merge plus any stranded local commits.
//! 7. Release the lease, then tell the [`DocumentTrigger`] about new content.
//!
//! The ahead count always comes from this cycle's fetch; nothing cached
//! decides whether to pull.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use texsync_core::marker::find_markers;
use texsync_core::{content_digest, MarkerId, MarkerStatus, StashRecord};

use crate::context::SyncContext;
use crate::error::{GitError, GitErrorKind, SyncError};
use crate::file_guard::write_durable;
use crate::notify::Notification;

/// Something that reacts to remote content landing in the local document.
pub trait DocumentTrigger: Send + Sync {
    fn document_changed(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Streaming,
    LockBusy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    Skipped(SkipReason),
    UpToDate,
    Pulled {
        commits: u32,
        stashed: bool,
        applied: bool,
    },
}

/// Stop flag that also wakes a sleeping monitor.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock().unwrap_or_else(|p| p.into_inner()) = true;
        cvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Sleep up to `timeout`; `true` if shutdown was requested.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(|p| p.into_inner());
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |stop| !*stop)
            .unwrap_or_else(|p| p.into_inner());
        *guard
    }
}

pub struct RemoteMonitor {
    ctx: Arc<SyncContext>,
    trigger: Option<Arc<dyn DocumentTrigger>>,
}

impl RemoteMonitor {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx, trigger: None }
    }

    pub fn with_trigger(mut self, trigger: Arc<dyn DocumentTrigger>) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// Run cycles every `interval` on a dedicated thread until `shutdown`.
    pub fn spawn(self, interval: Duration, shutdown: ShutdownSignal) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("texsync-monitor".into())
            .spawn(move || self.run(interval, &shutdown))
    }

    /// The poll loop. A failed cycle never ends it.
    pub fn run(&self, interval: Duration, shutdown: &ShutdownSignal) {
        tracing::info!(
            "remote monitor started (every {}s)",
            interval.as_secs_f32()
        );
        loop {
            if shutdown.is_triggered() {
                break;
            }
            match self.run_cycle() {
                Ok(outcome) => tracing::debug!("monitor cycle: {outcome:?}"),
                Err(e) => tracing::error!("monitor cycle failed: {e}"),
            }
            if shutdown.wait(interval) {
                break;
            }
        }
        tracing::info!("remote monitor stopped");
    }

    /// One cycle. Errors are reported to the operator before being returned.
    pub fn run_cycle(&self) -> Result<CycleOutcome, SyncError> {
        let flags = self.ctx.flags();
        if flags.is_streaming() {
            tracing::debug!("generation streaming; skipping remote poll");
            return Ok(CycleOutcome::Skipped(SkipReason::Streaming));
        }

        let lease = match self.ctx.lease() {
            Ok(lease) => lease,
            Err(SyncError::LockUnavailable { key, .. }) => {
                tracing::debug!("lease {key} busy; someone else is syncing");
                return Ok(CycleOutcome::Skipped(SkipReason::LockBusy));
            }
            Err(e) => {
                self.ctx.report("Remote sync", &e);
                return Err(e);
            }
        };

        let result = self.sync_locked();
        if lease.is_expired() {
            tracing::warn!("lease expired during remote sync; exclusivity was not guaranteed");
        }
        drop(lease);
        self.ctx.mark_cycle();

        match &result {
            Ok(CycleOutcome::Pulled { applied: true, .. }) => {
                if let Some(trigger) = &self.trigger {
                    trigger.document_changed();
                }
            }
            Ok(_) => {}
            Err(e) => self.ctx.report("Remote sync", e),
        }
        result
    }

    fn sync_locked(&self) -> Result<CycleOutcome, SyncError> {
        let git = self.ctx.git();

        git.fetch()?;
        let ahead = git.remote_ahead_count()?;
        self.ctx.update_state(|s| s.last_known_remote_ahead = ahead);
        if ahead == 0 {
            self.push_stranded_commits();
            return Ok(CycleOutcome::UpToDate);
        }
        tracing::info!("remote is {ahead} commit(s) ahead; pulling");

        if git.index_lock_present() {
            return Err(GitError {
                kind: GitErrorKind::Failed,
                op: "pull".into(),
                detail: format!(
                    "{} exists; remove it if no git process is running",
                    git.repo().join(".git").join("index.lock").display()
                ),
            }
            .into());
        }

        self.carry_local_edits()?;
        let streams_before = self
            .ctx
            .read_repo_document()
            .map(|c| streaming_ids(&c))
            .unwrap_or_default();

        let dirty = git.is_dirty()?;
        self.ctx.update_state(|s| s.dirty = dirty);
        let stash = if dirty {
            let record = StashRecord::new(&MarkerId::from_time(Utc::now()).0);
            if git.stash_save(&record)? {
                tracing::info!("stashed local changes as '{}'", record.label);
                let pending = record.clone();
                self.ctx.update_state(|s| s.pending_stash = Some(pending));
                Some(record)
            } else {
                None
            }
        } else {
            None
        };

        if let Err(e) = git.pull() {
            if let Some(record) = &stash {
                self.recover_stash(record, &e);
            }
            return Err(e.into());
        }

        if let Some(record) = &stash {
            match git.stash_pop() {
                Ok(_) => self.ctx.update_state(|s| s.pending_stash = None),
                Err(e) if e.is_conflict() => {
                    tracing::error!("stash pop conflicted: {}", e.detail);
                    return Err(SyncError::StashConflict {
                        label: record.label.clone(),
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }

        let merged = self.ctx.read_repo_document()?;
        self.ctx.note_remote_streams(
            streaming_ids(&merged)
                .into_iter()
                .filter(|id| !streams_before.contains(id)),
        );
        let receipt = self.ctx.write_document(&merged)?;
        self.ctx.mark_synced(receipt.digest);
        self.ctx.flags().mark_remote_update();
        self.ctx.compile();
        self.push_stranded_commits();

        Ok(CycleOutcome::Pulled {
            commits: ahead,
            stashed: stash.is_some(),
            applied: true,
        })
    }

    /// After a failed pull: pop the stash back if the pull left the tree
    /// untouched, otherwise tell the operator where the local edits are.
    fn recover_stash(&self, record: &StashRecord, pull_error: &GitError) {
        let git = self.ctx.git();
        if !pull_error.is_conflict() {
            match git.stash_pop() {
                Ok(_) => {
                    tracing::info!("pull failed; restored stash '{}'", record.label);
                    self.ctx.update_state(|s| s.pending_stash = None);
                    return;
                }
                Err(e) => tracing::warn!("cannot restore stash '{}': {}", record.label, e.detail),
            }
        }
        self.ctx.notify(Notification::error(
            "Unpopped stash",
            format!(
                "Pull failed ({}). Local edits are kept in stash '{}' in {}. Finish or abort the merge, then `git stash pop`.",
                pull_error.detail,
                record.label,
                git.repo().display()
            ),
        ));
    }

    /// Push local commits the remote lacks. Failures are reported and the
    /// next cycle tries again.
    fn push_stranded_commits(&self) {
        let git = self.ctx.git();
        let local_ahead = match git.local_ahead_count() {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!("cannot count local commits: {}", e.detail);
                return;
            }
        };
        if local_ahead == 0 {
            return;
        }
        tracing::info!("pushing {local_ahead} local commit(s) the remote lacks");
        match git.push() {
            Ok(_) => self.ctx.update_state(|s| s.last_push_at = Some(Utc::now())),
            Err(e) => self.ctx.report("Push", &SyncError::from(e)),
        }
    }

    /// Local edits not yet pushed are written into the working tree so the
    /// stash protects them across the pull.
    fn carry_local_edits(&self) -> Result<(), SyncError> {
        let document = self.ctx.document();
        if !document.exists() {
            return Ok(());
        }
        let local = self.ctx.read_document()?;
        let local_digest = content_digest(&local);
        let synced = self.ctx.sync_state().last_synced_digest;
        if synced.as_deref() == Some(local_digest.as_str()) {
            return Ok(());
        }
        if local == self.ctx.read_repo_document()? {
            return Ok(());
        }
        tracing::info!("carrying unsynced local edits into the working tree");
        write_durable(self.ctx.repo_document(), &local)
    }
}

/// Ids of every `streaming_<id>` marker in `content`.
fn streaming_ids(content: &str) -> Vec<MarkerId> {
    find_markers(content)
        .into_iter()
        .filter_map(|m| match m.status {
            MarkerStatus::Streaming(id) => Some(id),
            _ => None,
        })
        .collect()
}
