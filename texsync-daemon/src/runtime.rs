use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::Instant;

use texsync_core::MarkerStatus;
use texsync_sync::{Session, ShutdownSignal, SyncAction, SyncError};

use crate::error::{io_err, DaemonError};
use crate::paths::{logs_dir, run_dir, socket_path, DAEMON_LABEL};
use crate::protocol::{DaemonRequest, DaemonResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobKind {
    /// The document changed on disk.
    LocalChange,
    /// Operator asked for a push.
    Push,
}

struct SyncJob {
    kind: JobKind,
    source: &'static str,
    respond_to: Option<oneshot::Sender<Result<Value, String>>>,
}

/// What the processor last did, for `status`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Activity {
    pub last_local_sync_at_unix: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_outcome: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// State every task shares.
struct Shared {
    home: PathBuf,
    session: Arc<Session>,
    activity: RwLock<Activity>,
    sync_tx: mpsc::Sender<SyncJob>,
    shutdown_tx: broadcast::Sender<()>,
    started_at_unix: u64,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon: open and prepare the session, then watch, poll and serve
/// the socket until `stop` or ctrl-c.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let session = {
        let home = home.clone();
        tokio::task::spawn_blocking(move || -> Result<Session, SyncError> {
            let session = Session::open_at(&home)?;
            let prep = session.prepare()?;
            tracing::info!(
                cloned = prep.cloned,
                created_document = prep.created_document,
                "session prepared"
            );
            Ok(session)
        })
        .await
        .map_err(|source| DaemonError::Join {
            task: "session setup",
            source,
        })??
    };
    let session = Arc::new(session);
    let config = session.context().config.clone();

    let (sync_tx, sync_rx) = mpsc::channel::<SyncJob>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);
    let shared = Arc::new(Shared {
        home: home.clone(),
        session: session.clone(),
        activity: RwLock::new(Activity::default()),
        sync_tx: sync_tx.clone(),
        shutdown_tx: shutdown_tx.clone(),
        started_at_unix: unix_seconds_now(),
    });

    // Local edits made while the daemon was down.
    enqueue(&sync_tx, JobKind::LocalChange, "startup", None).await?;

    let monitor_stop = ShutdownSignal::new();
    let monitor_handle = if config.monitor.enabled {
        let handle = session
            .monitor()
            .spawn(config.monitor.poll_interval(), monitor_stop.clone())
            .map_err(|e| io_err("monitor thread", e))?;
        Some(handle)
    } else {
        tracing::info!("remote monitor disabled");
        None
    };

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let document = config.document.clone();
        let window = Duration::from_millis(config.debounce_ms);
        let sync_tx = sync_tx.clone();
        tokio::spawn(async move {
            let result = watcher_task(document, window, sync_tx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let shared = shared.clone();
        tokio::spawn(async move {
            let result = sync_processor_task(shared, sync_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let shared = shared.clone();
        tokio::spawn(async move {
            let result = socket_server_task(shared, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let rotation_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        tokio::spawn(async move {
            let result = log_rotation_task(home, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let session = session.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            session.orchestrator().cancel_generation();
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (watcher_result, processor_result, socket_result, rotation_result, signal_result) =
        tokio::join!(
            watcher_handle,
            processor_handle,
            socket_handle,
            rotation_handle,
            signal_handle
        );

    monitor_stop.trigger();
    if let Some(handle) = monitor_handle {
        let joined = tokio::task::spawn_blocking(move || handle.join()).await;
        if !matches!(joined, Ok(Ok(()))) {
            tracing::error!("remote monitor thread panicked");
        }
    }

    handle_join("watcher", watcher_result)?;
    handle_join("sync_processor", processor_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("log_rotation", rotation_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

async fn watcher_task(
    document: PathBuf,
    window: Duration,
    sync_tx: mpsc::Sender<SyncJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let Some(file_name) = document.file_name().map(|n| n.to_os_string()) else {
        return Err(DaemonError::Protocol(format!(
            "document path has no file name: {}",
            document.display()
        )));
    };
    let dir = document
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    // FSEvents reports real paths (/private/var/... on macOS).
    let dir = fs::canonicalize(dir).map_err(|e| io_err(dir, e))?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    tracing::info!(dir = %dir.display(), "watching document directory");

    let mut debounce = Debouncer::new(window);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = debounce.wait(), if debounce.is_pending() => {
                debounce.clear();
                enqueue(&sync_tx, JobKind::LocalChange, "watcher", None).await?;
            }
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if !is_relevant_event_kind(&event.kind) {
                    continue;
                }
                if event.paths.iter().any(|p| is_document(p, &dir, &file_name)) {
                    debounce.note(Instant::now());
                }
            }
        }
    }

    Ok(())
}

/// Trailing-edge debounce: fires once `window` after the last event, so a
/// burst of saves becomes one job that sees the final content.
struct Debouncer {
    window: Duration,
    last_event: Option<Instant>,
}

impl Debouncer {
    fn new(window: Duration) -> Self {
        Self {
            window,
            last_event: None,
        }
    }

    fn note(&mut self, now: Instant) {
        self.last_event = Some(now);
    }

    fn is_pending(&self) -> bool {
        self.last_event.is_some()
    }

    fn deadline(&self) -> Option<Instant> {
        self.last_event.map(|at| at + self.window)
    }

    fn clear(&mut self) {
        self.last_event = None;
    }

    async fn wait(&self) {
        match self.deadline() {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}

async fn sync_processor_task(
    shared: Arc<Shared>,
    mut sync_rx: mpsc::Receiver<SyncJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = sync_rx.recv() => {
                let Some(job) = maybe_job else { break };
                let started = Instant::now();

                let session = shared.session.clone();
                let kind = job.kind;
                let result = tokio::task::spawn_blocking(move || run_job(&session, kind))
                    .await
                    .map_err(|source| DaemonError::Join { task: "sync job", source })?;

                {
                    let mut activity = shared.activity.write().await;
                    activity.last_local_sync_at_unix = unix_seconds_now();
                    match &result {
                        Ok(outcome) => {
                            activity.last_outcome = Some(outcome.clone());
                            activity.last_error = None;
                        }
                        Err(err) => activity.last_error = Some(err.clone()),
                    }
                }

                match &result {
                    Ok(outcome) => tracing::info!(
                        source = job.source,
                        duration_ms = started.elapsed().as_millis() as u64,
                        outcome = %outcome,
                        "local sync finished",
                    ),
                    Err(err) => tracing::error!(source = job.source, error = %err, "local sync failed"),
                }

                if let Some(respond_to) = job.respond_to {
                    let _ = respond_to.send(result);
                }
            }
        }
    }

    Ok(())
}

fn run_job(session: &Session, kind: JobKind) -> Result<Value, String> {
    match kind {
        JobKind::LocalChange => to_json(session.local_change()),
        JobKind::Push => to_json(session.run(SyncAction::Push)),
    }
}

fn to_json<T: Serialize>(result: Result<T, SyncError>) -> Result<Value, String> {
    let value = result.map_err(|e| e.to_string())?;
    serde_json::to_value(value).map_err(|e| e.to_string())
}

async fn socket_server_task(
    shared: Arc<Shared>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&shared.home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let shared = shared.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, shared).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(stream: UnixStream, shared: Arc<Shared>) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let stopping = request.cmd == "stop";
        let response = handle_request(&shared, request).await;
        write_response(&mut writer, &response).await?;
        if stopping {
            break;
        }
    }

    Ok(())
}

async fn handle_request(shared: &Arc<Shared>, request: DaemonRequest) -> DaemonResponse {
    match request.cmd.as_str() {
        "status" => DaemonResponse::ok(build_status_payload(shared).await),
        "push" => {
            let (tx, rx) = oneshot::channel();
            if let Err(err) = enqueue(&shared.sync_tx, JobKind::Push, "socket", Some(tx)).await {
                return DaemonResponse::error(err.to_string());
            }
            match rx.await {
                Ok(Ok(outcome)) => DaemonResponse::ok(outcome),
                Ok(Err(err)) => DaemonResponse::error(err),
                Err(_) => DaemonResponse::error(DaemonError::ChannelClosed("sync response").to_string()),
            }
        }
        "pull" => blocking_action(shared, SyncAction::Pull).await,
        "reset" => match parse_reset_target(request.to.as_deref()) {
            Ok(to) => blocking_action(shared, SyncAction::Reset(to)).await,
            Err(err) => DaemonResponse::error(err),
        },
        "cancel" => blocking_action(shared, SyncAction::Cancel).await,
        "stop" => {
            shared.session.orchestrator().cancel_generation();
            let _ = shared.shutdown_tx.send(());
            DaemonResponse::ok(json!({ "stopping": true }))
        }
        other => DaemonResponse::error(format!("unknown command '{other}'")),
    }
}

/// Actions that must not queue behind a running generation.
async fn blocking_action(shared: &Arc<Shared>, action: SyncAction) -> DaemonResponse {
    let session = shared.session.clone();
    let joined = tokio::task::spawn_blocking(move || to_json(session.run(action))).await;
    match joined {
        Ok(Ok(outcome)) => DaemonResponse::ok(outcome),
        Ok(Err(err)) => DaemonResponse::error(err),
        Err(err) => DaemonResponse::error(format!("action join error: {err}")),
    }
}

fn parse_reset_target(to: Option<&str>) -> Result<MarkerStatus, String> {
    match to.map(str::to_ascii_lowercase).as_deref() {
        None | Some("idle") => Ok(MarkerStatus::Idle),
        Some("start") => Ok(MarkerStatus::Start),
        Some(other) => Err(format!("cannot reset to '{other}'; expected idle or start")),
    }
}

async fn build_status_payload(shared: &Arc<Shared>) -> Value {
    let session = shared.session.clone();
    let status = tokio::task::spawn_blocking(move || session.context().status())
        .await
        .ok()
        .and_then(|s| serde_json::to_value(s).ok())
        .unwrap_or(Value::Null);
    let activity = shared.activity.read().await.clone();
    let config = &shared.session.context().config;

    json!({
        "running": true,
        "label": DAEMON_LABEL,
        "pid": std::process::id(),
        "started_at_unix": shared.started_at_unix,
        "document": config.document.display().to_string(),
        "repo_path": config.repo_path.display().to_string(),
        "remote": config.remote.redacted(),
        "socket": socket_path(&shared.home).display().to_string(),
        "activity": activity,
        "session": status,
    })
}

async fn enqueue(
    sync_tx: &mpsc::Sender<SyncJob>,
    kind: JobKind,
    source: &'static str,
    respond_to: Option<oneshot::Sender<Result<Value, String>>>,
) -> Result<(), DaemonError> {
    sync_tx
        .send(SyncJob {
            kind,
            source,
            respond_to,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("sync queue"))
}

async fn log_rotation_task(
    home: PathBuf,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick is immediate; never rotate on startup.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let home = home.clone();
                tokio::task::spawn_blocking(move || crate::log_rotation::rotate_all(&home))
                    .await
                    .ok();
            }
        }
    }
    Ok(())
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any
    )
}

/// Events name the document itself; the lock file and editor temp files
/// next to it are ignored.
fn is_document(path: &Path, dir: &Path, file_name: &std::ffi::OsStr) -> bool {
    path.file_name() == Some(file_name)
        && path
            .parent()
            .map(|p| p == dir || fs::canonicalize(p).is_ok_and(|c| c == dir))
            .unwrap_or(false)
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    for dir in [run_dir(home), logs_dir(home)] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use texsync_core::config::LockBackend;
    use texsync_core::{RemoteUrl, SessionConfig};
    use tokio::time::advance;

    fn shared(home: &TempDir, work: &TempDir) -> (Arc<Shared>, mpsc::Receiver<SyncJob>) {
        let repo = work.path().join("repo");
        fs::create_dir_all(&repo).expect("repo dir");
        let mut cfg = SessionConfig::new(
            work.path().join("paper.tex"),
            repo,
            RemoteUrl("https://git.example.org/project".into()),
        );
        cfg.distributed_lock.backend = LockBackend::Memory;
        cfg.notify.journal = false;
        let session = Session::from_config(cfg, home.path()).expect("session");

        let (sync_tx, sync_rx) = mpsc::channel(8);
        let (shutdown_tx, _) = broadcast::channel(4);
        let shared = Arc::new(Shared {
            home: home.path().to_path_buf(),
            session: Arc::new(session),
            activity: RwLock::new(Activity::default()),
            sync_tx,
            shutdown_tx,
            started_at_unix: 1_000_000,
        });
        (shared, sync_rx)
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn debounce_fires_once_after_the_last_event() {
        let mut debounce = Debouncer::new(Duration::from_millis(100));
        assert!(!debounce.is_pending());

        for _ in 0..5 {
            debounce.note(Instant::now());
            advance(Duration::from_millis(30)).await;
        }
        let last = Instant::now() - Duration::from_millis(30);
        assert_eq!(debounce.deadline(), Some(last + Duration::from_millis(100)));

        debounce.wait().await;
        assert!(Instant::now() >= last + Duration::from_millis(100));
        debounce.clear();
        assert!(!debounce.is_pending());
    }

    #[test]
    fn only_the_document_counts_as_a_change() {
        let dir = TempDir::new().expect("dir");
        let dir = fs::canonicalize(dir.path()).expect("canonical");
        let name = std::ffi::OsStr::new("paper.tex");

        assert!(is_document(&dir.join("paper.tex"), &dir, name));
        assert!(!is_document(&dir.join("paper.tex.lock"), &dir, name));
        assert!(!is_document(&dir.join(".paper.tex.swp"), &dir, name));
        assert!(!is_document(&dir.join("sub").join("paper.tex"), &dir, name));
    }

    #[test]
    fn reset_target_parses_idle_and_start() {
        assert_eq!(parse_reset_target(None), Ok(MarkerStatus::Idle));
        assert_eq!(parse_reset_target(Some("START")), Ok(MarkerStatus::Start));
        assert!(parse_reset_target(Some("completed")).is_err());
    }

    #[tokio::test]
    async fn status_payload_describes_the_session() {
        let home = TempDir::new().expect("home");
        let work = TempDir::new().expect("work");
        let (shared, _rx) = shared(&home, &work);

        let payload = build_status_payload(&shared).await;
        assert_eq!(payload["running"], json!(true));
        assert_eq!(payload["started_at_unix"], json!(1_000_000u64));
        assert_eq!(payload["activity"]["last_local_sync_at_unix"], json!(0u64));
        assert_eq!(payload["session"]["streaming"], json!(false));
        assert!(payload["document"].as_str().unwrap().ends_with("paper.tex"));
    }

    #[tokio::test]
    async fn stop_cancels_and_broadcasts_shutdown() {
        let home = TempDir::new().expect("home");
        let work = TempDir::new().expect("work");
        let (shared, _rx) = shared(&home, &work);
        let mut shutdown_rx = shared.shutdown_tx.subscribe();

        let response = handle_request(&shared, DaemonRequest::new("stop")).await;
        assert!(response.ok);
        shutdown_rx.recv().await.expect("shutdown signal");
    }

    #[tokio::test]
    async fn unknown_and_bad_reset_requests_are_errors() {
        let home = TempDir::new().expect("home");
        let work = TempDir::new().expect("work");
        let (shared, _rx) = shared(&home, &work);

        let unknown = handle_request(&shared, DaemonRequest::new("sync")).await;
        assert!(!unknown.ok);

        let bad = handle_request(
            &shared,
            DaemonRequest {
                cmd: "reset".into(),
                to: Some("completed".into()),
            },
        )
        .await;
        assert!(!bad.ok);
        assert!(bad.error.unwrap().contains("idle or start"));
    }

    #[tokio::test]
    async fn push_request_is_answered_by_the_processor() {
        let home = TempDir::new().expect("home");
        let work = TempDir::new().expect("work");
        let (shared, mut rx) = shared(&home, &work);

        let answer = tokio::spawn(async move {
            let job = rx.recv().await.expect("job");
            assert_eq!(job.kind, JobKind::Push);
            let _ = job
                .respond_to
                .expect("reply channel")
                .send(Ok(json!({ "pushed": "pushed" })));
        });

        let response = handle_request(&shared, DaemonRequest::new("push")).await;
        answer.await.expect("processor");
        assert!(response.ok);
        assert_eq!(response.data, Some(json!({ "pushed": "pushed" })));
    }
}
