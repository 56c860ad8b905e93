//! Everything a watch session shares between its threads.
//!
//! One [`SyncContext`] is built per session and handed by `Arc` to the
//! orchestrator, the remote monitor and the daemon. It owns the collaborators
//! and the process-local [`SyncState`]; no globals.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde::Serialize;

use texsync_core::config::texsync_root;
use texsync_core::{
    EnvironmentStateMachine, MarkerId, OwnerToken, ProcessingState, RepoIdentity,
    SessionConfig, SessionFlags, StashRecord, SyncState,
};

use crate::collaborators::{
    CommandCompiler, CommandGenerator, Compiler, Generator, ParameterLineExtractor,
    PromptExtractor,
};
use crate::error::{io_err, SyncError};
use crate::file_guard::{LocalFileGuard, WriteReceipt};
use crate::git::GitSyncClient;
use crate::lock::{open_store, DistributedLock, LeaseGuard, LeaseStore};
use crate::notify::{Notification, Notifiers};
use crate::state_store;

/// `<home>/.texsync/notifications.jsonl`
pub fn journal_path_at(home: &Path) -> PathBuf {
    texsync_root(home).join("notifications.jsonl")
}

/// `<home>/.texsync/leases/`
pub fn lease_dir_at(home: &Path) -> PathBuf {
    texsync_root(home).join("leases")
}

/// Point-in-time view of a session, for `texsync status`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub processing: ProcessingState,
    pub streaming: bool,
    pub sync: SyncState,
    pub lease_holder: Option<String>,
    pub owner: String,
    pub stranded_stashes: Vec<String>,
    pub index_lock: bool,
}

pub struct SyncContext {
    pub config: SessionConfig,
    home: PathBuf,
    identity: RepoIdentity,
    owner: OwnerToken,
    flags: Arc<SessionFlags>,
    machine: EnvironmentStateMachine,
    guard: LocalFileGuard,
    lock: DistributedLock,
    git: GitSyncClient,
    notifiers: Notifiers,
    extractor: Box<dyn PromptExtractor>,
    generator: Option<Box<dyn Generator>>,
    compiler: Option<Box<dyn Compiler>>,
    repo_document: PathBuf,
    state: Mutex<SyncState>,
    /// `streaming_<id>` markers that arrived by pull: another clone's
    /// generation, not one this host abandoned.
    remote_streams: Mutex<HashSet<MarkerId>>,
}

impl SyncContext {
    /// Build a context with the collaborators named by `config` and the lease
    /// store it selects.
    pub fn from_config(config: SessionConfig, home: &Path) -> Result<Self, SyncError> {
        let store = open_store(&config.distributed_lock, &lease_dir_at(home))?;
        Self::with_store(config, home, store)
    }

    /// Like [`from_config`](Self::from_config) but with an explicit lease store.
    pub fn with_store(
        config: SessionConfig,
        home: &Path,
        store: Arc<dyn LeaseStore>,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let git = GitSyncClient::from_config(&config)?;
        let repo_document = config.repo_document()?;
        let identity = config.identity();
        let flags = SessionFlags::new();

        let extractor: Box<dyn PromptExtractor> = match &config.generator {
            Some(g) => Box::new(ParameterLineExtractor::from_config(g)),
            None => Box::new(ParameterLineExtractor::default()),
        };
        let generator = config
            .generator
            .as_ref()
            .map(|g| Box::new(CommandGenerator::from_config(g)) as Box<dyn Generator>);
        let compiler = config
            .compile
            .as_ref()
            .map(|c| Box::new(CommandCompiler::from_config(c)) as Box<dyn Compiler>);
        let notifiers = Notifiers::from_config(&config.notify, &journal_path_at(home));

        let state = state_store::load_at(home, &identity)
            .ok()
            .flatten()
            .filter(|s| s.repo_path == config.repo_path)
            .unwrap_or_else(|| SyncState::new(config.repo_path.clone(), &config.remote));

        Ok(Self {
            guard: LocalFileGuard::from_config(&config.file_lock),
            lock: DistributedLock::from_config(store, &config.distributed_lock),
            machine: EnvironmentStateMachine::new(flags.clone()),
            home: home.to_path_buf(),
            owner: OwnerToken::generate(),
            state: Mutex::new(state),
            remote_streams: Mutex::new(HashSet::new()),
            config,
            identity,
            flags,
            git,
            notifiers,
            extractor,
            generator,
            compiler,
            repo_document,
        })
    }

    pub fn with_generator(self, generator: impl Generator + 'static) -> Self {
        self.with_boxed_generator(Box::new(generator))
    }

    pub fn with_boxed_generator(mut self, generator: Box<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_compiler(mut self, compiler: impl Compiler + 'static) -> Self {
        self.compiler = Some(Box::new(compiler));
        self
    }

    pub fn with_extractor(mut self, extractor: impl PromptExtractor + 'static) -> Self {
        self.extractor = Box::new(extractor);
        self
    }

    pub fn with_notifiers(mut self, notifiers: Notifiers) -> Self {
        self.notifiers = notifiers;
        self
    }

    pub fn with_git(mut self, git: GitSyncClient) -> Self {
        self.git = git;
        self
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn identity(&self) -> &RepoIdentity {
        &self.identity
    }

    pub fn owner(&self) -> &OwnerToken {
        &self.owner
    }

    pub fn flags(&self) -> &Arc<SessionFlags> {
        &self.flags
    }

    pub fn machine(&self) -> &EnvironmentStateMachine {
        &self.machine
    }

    pub fn git(&self) -> &GitSyncClient {
        &self.git
    }

    pub fn extractor(&self) -> &dyn PromptExtractor {
        self.extractor.as_ref()
    }

    pub fn generator(&self) -> Option<&dyn Generator> {
        self.generator.as_deref()
    }

    pub fn document(&self) -> &Path {
        &self.config.document
    }

    pub fn repo_document(&self) -> &Path {
        &self.repo_document
    }

    // -----------------------------------------------------------------------
    // Shared operations
    // -----------------------------------------------------------------------

    /// The repository's lease, with the configured retry budget.
    pub fn lease(&self) -> Result<LeaseGuard, SyncError> {
        self.lock.lock(&self.identity.lock_key(), &self.owner)
    }

    /// Current local document, read under the file guard.
    pub fn read_document(&self) -> Result<String, SyncError> {
        self.guard.read(&self.config.document)
    }

    /// Current repository copy, empty if it does not exist yet.
    pub fn read_repo_document(&self) -> Result<String, SyncError> {
        match std::fs::read_to_string(&self.repo_document) {
            Ok(s) => Ok(s),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(io_err(&self.repo_document, e)),
        }
    }

    /// Guarded write of the local document, remembered as our own write.
    pub fn write_document(&self, content: &str) -> Result<WriteReceipt, SyncError> {
        let receipt = self.guard.write(&self.config.document, content)?;
        self.flags.record_written(receipt.digest.clone());
        Ok(receipt)
    }

    /// Run the compile collaborator if one is configured. Failures are
    /// reported, never propagated.
    pub fn compile(&self) {
        let Some(compiler) = &self.compiler else {
            return;
        };
        if let Err(e) = compiler.compile(&self.config.document) {
            self.notify(Notification::warning("Compile failed", e.to_string()));
        }
    }

    pub fn notify(&self, notification: Notification) {
        self.notifiers.notify(notification);
    }

    /// Turn an error into an operator notification.
    pub fn report(&self, context: &str, err: &SyncError) {
        let message = match err {
            SyncError::StashConflict { label } => format!(
                "Local edits are kept in stash '{label}' and the working tree has conflicts in {}. Resolve by hand, then `git stash drop`.",
                self.config.repo_path.display()
            ),
            SyncError::LockTimeout { path, .. } => format!(
                "{} stayed locked. If no other writer is running, remove {}.lock.",
                path.display(),
                path.display()
            ),
            other => other.to_string(),
        };
        let notification = if err.needs_operator() {
            Notification::error(context, message)
        } else {
            Notification::warning(context, message)
        };
        self.notify(notification);
    }

    fn state(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn sync_state(&self) -> SyncState {
        self.state().clone()
    }

    /// Mutate the sync state and snapshot it for `texsync status`.
    pub fn update_state(&self, f: impl FnOnce(&mut SyncState)) {
        let snapshot = {
            let mut state = self.state();
            f(&mut state);
            state.clone()
        };
        if let Err(e) = state_store::save_at(&self.home, &self.identity, &snapshot) {
            tracing::warn!("failed to save sync state: {e}");
        }
    }

    pub fn note_remote_streams(&self, ids: impl IntoIterator<Item = MarkerId>) {
        let mut streams = self.remote_streams.lock().unwrap_or_else(|p| p.into_inner());
        for id in ids {
            tracing::info!("generation {id} is streaming on another clone");
            streams.insert(id);
        }
    }

    pub fn is_remote_stream(&self, id: &MarkerId) -> bool {
        self.remote_streams
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(id)
    }

    /// Stash entries texsync created and never popped.
    pub fn stranded_stashes(&self) -> Result<Vec<String>, SyncError> {
        Ok(self
            .git
            .stash_list()?
            .into_iter()
            .filter(|l| StashRecord::is_ours(l))
            .collect())
    }

    /// Warn about leftovers that block syncing until a human acts.
    pub fn check_leftovers(&self) {
        match self.stranded_stashes() {
            Ok(stashes) if !stashes.is_empty() => self.notify(Notification::warning(
                "Unpopped stash",
                format!(
                    "{} texsync stash entr{} in {}: {}",
                    stashes.len(),
                    if stashes.len() == 1 { "y" } else { "ies" },
                    self.config.repo_path.display(),
                    stashes.join("; ")
                ),
            )),
            Ok(_) => {}
            Err(e) => tracing::warn!("cannot list stashes: {e}"),
        }
        if self.git.index_lock_present() {
            self.notify(Notification::error(
                "Stale git lock",
                format!(
                    "{} exists. If no git process is running, remove it.",
                    self.config.repo_path.join(".git").join("index.lock").display()
                ),
            ));
        }
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            processing: self.machine.state(),
            streaming: self.flags.is_streaming(),
            sync: self.sync_state(),
            lease_holder: self
                .lock
                .holder(&self.identity.lock_key())
                .ok()
                .flatten()
                .map(|o| o.0),
            owner: self.owner.0.clone(),
            stranded_stashes: self.stranded_stashes().unwrap_or_default(),
            index_lock: self.git.index_lock_present(),
        }
    }

    pub(crate) fn mark_synced(&self, digest: String) {
        self.update_state(|s| {
            s.last_synced_digest = Some(digest);
            s.dirty = false;
        });
    }

    pub(crate) fn mark_cycle(&self) {
        self.update_state(|s| s.last_cycle_at = Some(Utc::now()));
    }
}
