use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use assert_cmd::prelude::*;
use predicates::prelude::*;
use tempfile::TempDir;

const DOCUMENT: &str = "paper.tex";

fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(["-c", "user.name=collaborator", "-c", "user.email=collab@localhost"])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("spawn git");
    assert!(
        out.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).into_owned()
}

/// A bare remote on `master` holding `paper.tex`, plus a HOME for texsync.
struct Project {
    home: TempDir,
    work: TempDir,
}

impl Project {
    fn new(initial: &str) -> Self {
        let home = TempDir::new().expect("home");
        let work = TempDir::new().expect("work");
        let seed = work.path().join("seed");

        git(work.path(), &["init", "--bare", "remote.git"]);
        git(&work.path().join("remote.git"), &["symbolic-ref", "HEAD", "refs/heads/master"]);
        git(work.path(), &["init", "seed"]);
        git(&seed, &["symbolic-ref", "HEAD", "refs/heads/master"]);
        fs::write(seed.join(DOCUMENT), initial).expect("seed document");
        git(&seed, &["add", DOCUMENT]);
        git(&seed, &["commit", "-m", "Initial"]);
        git(&seed, &["push", "../remote.git", "master"]);

        Self { home, work }
    }

    fn remote(&self) -> PathBuf {
        self.work.path().join("remote.git")
    }

    fn document(&self) -> PathBuf {
        self.work.path().join("local").join(DOCUMENT)
    }

    fn texsync(&self) -> Command {
        let mut cmd = Command::cargo_bin("texsync").expect("texsync binary");
        cmd.env("HOME", self.home.path())
            .env("USERPROFILE", self.home.path())
            .env("NO_COLOR", "1")
            .env("RUST_LOG", "info");
        cmd
    }

    fn init(&self) {
        self.texsync()
            .args(["init", "--document"])
            .arg(self.document())
            .arg("--repo")
            .arg(self.work.path().join("repo"))
            .arg("--remote")
            .arg(self.remote())
            .assert()
            .success();
    }

    fn remote_content(&self) -> String {
        git(&self.remote(), &["show", &format!("master:{DOCUMENT}")])
    }
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(100));
    }
    false
}

#[test]
fn status_without_config_fails() {
    let project = Project::new("hello\n");
    project
        .texsync()
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to open session"));
}

#[test]
fn init_clones_and_seeds_the_document() {
    let project = Project::new("\\section{Intro}\n");
    project
        .texsync()
        .args(["init", "--document"])
        .arg(project.document())
        .arg("--repo")
        .arg(project.work.path().join("repo"))
        .arg("--remote")
        .arg(project.remote())
        .assert()
        .success()
        .stdout(predicate::str::contains("Cloned"))
        .stdout(predicate::str::contains("Created"));

    assert!(project.home.path().join(".texsync/config.yaml").exists());
    assert_eq!(
        fs::read_to_string(project.document()).expect("read"),
        "\\section{Intro}\n"
    );
}

#[test]
fn init_refuses_to_overwrite_without_force() {
    let project = Project::new("x\n");
    project
        .texsync()
        .args(["init", "--no-clone", "--document", "a.tex", "--repo", "repo", "--remote"])
        .arg(project.remote())
        .assert()
        .success();

    project
        .texsync()
        .args(["init", "--no-clone", "--document", "a.tex", "--repo", "repo", "--remote"])
        .arg(project.remote())
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));
}

#[test]
fn one_shot_push_reaches_the_remote() {
    let project = Project::new("one\n");
    project.init();
    fs::write(project.document(), "one\ntwo\n").expect("edit");

    project
        .texsync()
        .arg("push")
        .assert()
        .success()
        .stdout(predicate::str::contains("pushed"));
    assert_eq!(project.remote_content(), "one\ntwo\n");

    project
        .texsync()
        .arg("push")
        .assert()
        .success()
        .stdout(predicate::str::contains("nothing to commit"));
}

#[test]
fn status_json_reports_a_stopped_daemon() {
    let project = Project::new("one\n");
    project.init();

    let output = project
        .texsync()
        .args(["status", "--json"])
        .output()
        .expect("status");
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(value["running"], false);
    assert_eq!(value["session"]["streaming"], false);
}

#[test]
fn reset_without_stale_marker_reports_nothing() {
    let project = Project::new("%parameters: status=idle\n");
    project.init();
    project
        .texsync()
        .arg("reset")
        .assert()
        .success()
        .stdout(predicate::str::contains("no stale marker found"));
}

#[test]
fn daemon_status_when_not_running() {
    let project = Project::new("one\n");
    let output = project
        .texsync()
        .args(["daemon", "status"])
        .output()
        .expect("daemon status");
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(value["running"], false);
}

struct DaemonProcess<'a> {
    child: Child,
    project: &'a Project,
}

impl<'a> DaemonProcess<'a> {
    fn start(project: &'a Project) -> Self {
        let child = project
            .texsync()
            .args(["daemon", "start", "--foreground"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn daemon");
        Self { child, project }
    }

    fn running(&self) -> bool {
        let Ok(output) = self.project.texsync().args(["daemon", "status"]).output() else {
            return false;
        };
        serde_json::from_slice::<serde_json::Value>(&output.stdout)
            .ok()
            .and_then(|v| v.get("running").and_then(|r| r.as_bool()))
            .unwrap_or(false)
    }

    fn stop(&mut self) {
        let _ = self.project.texsync().args(["daemon", "stop"]).status();
        let exited = wait_until(Duration::from_secs(5), || {
            matches!(self.child.try_wait(), Ok(Some(_)))
        });
        if !exited {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

impl Drop for DaemonProcess<'_> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[test]
fn daemon_pushes_local_edits() {
    let project = Project::new("first\n");
    project.init();

    let mut daemon = DaemonProcess::start(&project);
    assert!(
        wait_until(Duration::from_secs(10), || daemon.running()),
        "daemon did not report running state in time",
    );

    fs::write(project.document(), "first\nsecond\n").expect("edit");
    let pushed = wait_until(Duration::from_secs(15), || {
        project.remote_content() == "first\nsecond\n"
    });
    assert!(pushed, "daemon did not push the local edit in time");

    project
        .texsync()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("daemon running"));

    daemon.stop();
    assert!(!project.home.path().join(".texsync/daemon.sock").exists());
}

#[test]
fn notifications_show_journal_entries() {
    let project = Project::new("one\n");
    project
        .texsync()
        .arg("notifications")
        .assert()
        .success()
        .stdout(predicate::str::contains("no notifications yet"));

    let journal = project.home.path().join(".texsync/notifications.jsonl");
    fs::create_dir_all(journal.parent().expect("parent")).expect("mkdir");
    fs::write(
        &journal,
        concat!(
            r#"{"id":"1","level":"error","title":"Push rejected","message":"remote moved","at":"2026-10-17T12:00:00Z"}"#,
            "\n",
            "{\"truncat\n",
        ),
    )
    .expect("journal");

    project
        .texsync()
        .arg("notifications")
        .assert()
        .success()
        .stdout(predicate::str::contains("ERROR Push rejected: remote moved"));
}
