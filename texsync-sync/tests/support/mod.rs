//! Real-git fixtures: a bare remote, a collaborator clone that commits to it,
//! and a session config pointing a fresh clone at it.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use tempfile::TempDir;
use texsync_core::config::LockBackend;
use texsync_core::{CancellationToken, RemoteUrl, SessionConfig};
use texsync_sync::{GenerationRequest, Generator, Session, SyncContext, SyncError};

pub const DOCUMENT: &str = "paper.tex";

/// Run git in `dir`, panicking with its stderr on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(["-c", "user.name=collaborator", "-c", "user.email=collab@localhost"])
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("spawn git");
    assert!(
        out.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).into_owned()
}

/// Route the sync crate's log records to the test output (`RUST_LOG=debug`).
pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub struct Fixture {
    pub home: TempDir,
    pub work: TempDir,
    pub remote: PathBuf,
    pub collaborator: PathBuf,
}

impl Fixture {
    /// A bare remote on `master` holding `paper.tex` with `initial`.
    pub fn new(initial: &str) -> Self {
        init_logs();
        let home = TempDir::new().expect("home");
        let work = TempDir::new().expect("work");
        let remote = work.path().join("remote.git");
        let collaborator = work.path().join("collaborator");

        git(work.path(), &["init", "--bare", "remote.git"]);
        git(&remote, &["symbolic-ref", "HEAD", "refs/heads/master"]);

        git(work.path(), &["init", "collaborator"]);
        git(&collaborator, &["symbolic-ref", "HEAD", "refs/heads/master"]);
        git(
            &collaborator,
            &["remote", "add", "origin", &remote.to_string_lossy()],
        );
        fs::write(collaborator.join(DOCUMENT), initial).expect("seed document");
        git(&collaborator, &["add", DOCUMENT]);
        git(&collaborator, &["commit", "-m", "Initial"]);
        git(&collaborator, &["push", "origin", "master"]);

        Self {
            home,
            work,
            remote,
            collaborator,
        }
    }

    pub fn local_document(&self) -> PathBuf {
        self.work.path().join("local").join(DOCUMENT)
    }

    pub fn repo_path(&self) -> PathBuf {
        self.work.path().join("repo")
    }

    pub fn config(&self) -> SessionConfig {
        let mut cfg = SessionConfig::new(
            self.local_document(),
            self.repo_path(),
            RemoteUrl(self.remote.to_string_lossy().into_owned()),
        );
        cfg.distributed_lock.backend = LockBackend::File;
        cfg.distributed_lock.dir = Some(self.work.path().join("leases"));
        cfg.distributed_lock.retries = 2;
        cfg.distributed_lock.retry_delay_ms = 20;
        cfg.file_lock.retry_delay_ms = 20;
        cfg.git.network_retries = 1;
        cfg.git.retry_delay_ms = 10;
        cfg
    }

    /// A prepared session, optionally with a generator.
    pub fn session(&self, generator: Option<Box<dyn Generator>>) -> Session {
        let mut ctx = SyncContext::from_config(self.config(), self.home.path()).expect("context");
        if let Some(generator) = generator {
            ctx = ctx.with_boxed_generator(generator);
        }
        let session = Session::from_context(ctx);
        session.prepare().expect("prepare");
        session
    }

    /// Commit `content` as the collaborator and push it.
    pub fn remote_commit(&self, content: &str, message: &str) {
        git(&self.collaborator, &["pull", "--no-rebase", "origin", "master"]);
        fs::write(self.collaborator.join(DOCUMENT), content).expect("write");
        git(&self.collaborator, &["add", DOCUMENT]);
        git(&self.collaborator, &["commit", "-m", message]);
        git(&self.collaborator, &["push", "origin", "master"]);
    }

    /// `paper.tex` as of the remote's `master`.
    pub fn remote_content(&self) -> String {
        git(&self.remote, &["show", &format!("master:{DOCUMENT}")])
    }

    pub fn remote_log(&self) -> String {
        git(&self.remote, &["log", "--format=%s", "master"])
    }

    /// Make the remote decline every push until [`accept_pushes`](Self::accept_pushes).
    #[cfg(unix)]
    pub fn reject_pushes(&self) {
        use std::os::unix::fs::PermissionsExt;

        let hook = self.remote.join("hooks").join("pre-receive");
        fs::create_dir_all(hook.parent().expect("hooks dir")).expect("mkdir hooks");
        fs::write(&hook, "#!/bin/sh\necho 'pushes are closed' >&2\nexit 1\n").expect("hook");
        fs::set_permissions(&hook, fs::Permissions::from_mode(0o755)).expect("chmod hook");
    }

    pub fn accept_pushes(&self) {
        let _ = fs::remove_file(self.remote.join("hooks").join("pre-receive"));
    }

    pub fn read_local(&self) -> String {
        fs::read_to_string(self.local_document()).expect("read local")
    }

    pub fn write_local(&self, content: &str) {
        fs::write(self.local_document(), content).expect("write local");
    }
}

/// Ten numbered lines, so edits at opposite ends merge cleanly.
pub fn numbered_document() -> String {
    (1..=10).map(|n| format!("line {n}\n")).collect()
}

/// Emits fixed chunks, or fails when `fail` is set.
pub struct ScriptedGenerator {
    pub chunks: Vec<&'static str>,
    pub fail: bool,
}

impl Generator for ScriptedGenerator {
    fn generate(
        &self,
        _request: &GenerationRequest,
        _cancel: &CancellationToken,
        on_chunk: &mut dyn FnMut(&str) -> Result<(), SyncError>,
    ) -> Result<(), SyncError> {
        for chunk in &self.chunks {
            on_chunk(chunk)?;
        }
        if self.fail {
            return Err(SyncError::Generation("model refused".into()));
        }
        Ok(())
    }
}

/// Runs `inspect` against the live context while generating.
pub struct InspectingGenerator<F> {
    pub ctx: Arc<std::sync::Mutex<Option<Arc<SyncContext>>>>,
    pub inspect: F,
}

impl<F> Generator for InspectingGenerator<F>
where
    F: Fn(&Arc<SyncContext>) + Send + Sync,
{
    fn generate(
        &self,
        _request: &GenerationRequest,
        _cancel: &CancellationToken,
        on_chunk: &mut dyn FnMut(&str) -> Result<(), SyncError>,
    ) -> Result<(), SyncError> {
        let ctx = self.ctx.lock().unwrap().clone().expect("context installed");
        (self.inspect)(&ctx);
        on_chunk("done")
    }
}
