//! Shared session entrypoint used by CLI and daemon.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use texsync_core::{config, MarkerStatus, SessionConfig};

use crate::context::{SessionStatus, SyncContext};
use crate::error::SyncError;
use crate::monitor::{CycleOutcome, RemoteMonitor};
use crate::orchestrator::{LocalChange, PushOutcome, SyncOrchestrator};

/// A one-shot operator action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    /// Push the local document now.
    Push,
    /// Run one remote cycle now.
    Pull,
    /// Reset a stale marker to the given status.
    Reset(MarkerStatus),
    /// Cancel the generation in flight.
    Cancel,
    Status,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    Pushed(PushOutcome),
    Pulled(CycleOutcome),
    Reset(bool),
    Cancelled(bool),
    Status(Box<SessionStatus>),
}

/// What [`Session::prepare`] had to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Preparation {
    pub cloned: bool,
    pub created_document: bool,
}

/// A configured context plus the orchestrator driving it.
pub struct Session {
    ctx: Arc<SyncContext>,
    orchestrator: Arc<SyncOrchestrator>,
}

impl Session {
    /// Load `<home>/.texsync/config.yaml` and build a session from it.
    pub fn open_at(home: &Path) -> Result<Self, SyncError> {
        let config = config::load_at(home)?;
        Self::from_config(config, home)
    }

    pub fn from_config(config: SessionConfig, home: &Path) -> Result<Self, SyncError> {
        Ok(Self::from_context(SyncContext::from_config(config, home)?))
    }

    pub fn from_context(ctx: SyncContext) -> Self {
        let ctx = ctx.into_shared();
        let orchestrator = Arc::new(SyncOrchestrator::new(ctx.clone()));
        Self { ctx, orchestrator }
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        &self.ctx
    }

    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    /// A remote monitor whose pulls feed back into the orchestrator.
    pub fn monitor(&self) -> RemoteMonitor {
        RemoteMonitor::new(self.ctx.clone()).with_trigger(self.orchestrator.clone())
    }

    /// Make the repository and local document usable.
    ///
    /// Clones when the repository is missing, otherwise refreshes the remote
    /// URL so a rotated token takes effect. Sets the commit identity, seeds a
    /// missing local document from the repository copy and warns about
    /// leftovers from earlier runs.
    pub fn prepare(&self) -> Result<Preparation, SyncError> {
        let ctx = &self.ctx;
        let cfg = &ctx.config;
        let git = ctx.git();
        let remote = cfg.authenticated_remote()?;
        let mut prep = Preparation::default();

        if cfg.repo_path.join(".git").exists() {
            git.set_remote_url(&remote)?;
        } else {
            tracing::info!(
                "cloning {} into {}",
                cfg.remote.redacted(),
                cfg.repo_path.display()
            );
            let depth = cfg.git.shallow_clone.then_some(1);
            git.clone_from(&remote, depth)?;
            prep.cloned = true;
        }
        git.configure_identity(&cfg.identity.name, &cfg.identity.email)?;

        if !cfg.document.exists() {
            let seed = ctx.read_repo_document()?;
            let receipt = ctx.write_document(&seed)?;
            ctx.update_state(|s| s.last_synced_digest = Some(receipt.digest));
            prep.created_document = true;
            tracing::info!("created {} from the repository", cfg.document.display());
        }

        ctx.check_leftovers();
        Ok(prep)
    }

    /// React to a change of the local document.
    pub fn local_change(&self) -> Result<LocalChange, SyncError> {
        self.orchestrator.handle_local_change()
    }

    pub fn run(&self, action: SyncAction) -> Result<ActionOutcome, SyncError> {
        match action {
            SyncAction::Push => {
                let content = self.ctx.read_document()?;
                let outcome = self.orchestrator.push_document(&content).map_err(|e| {
                    self.ctx.report("Push", &e);
                    e
                })?;
                Ok(ActionOutcome::Pushed(outcome))
            }
            SyncAction::Pull => Ok(ActionOutcome::Pulled(self.monitor().run_cycle()?)),
            SyncAction::Reset(to) => Ok(ActionOutcome::Reset(self.orchestrator.reset_marker(to)?)),
            SyncAction::Cancel => Ok(ActionOutcome::Cancelled(
                self.orchestrator.cancel_generation(),
            )),
            SyncAction::Status => Ok(ActionOutcome::Status(Box::new(self.ctx.status()))),
        }
    }
}
