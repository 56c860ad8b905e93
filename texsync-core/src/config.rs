//! Session configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.texsync/
//!   config.yaml      (mode 0600; never contains the access token itself)
//! ```
//!
//! # API pattern
//!
//! As elsewhere in the workspace, every function comes in two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{RemoteUrl, RepoIdentity};

pub const CONFIG_FILE: &str = "config.yaml";

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// How git authenticates against the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialConfig {
    #[serde(default = "default_username")]
    pub username: String,
    /// Name of the environment variable holding the access token.
    pub token_env: String,
}

/// Author identity for commits made by the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitIdentity {
    pub name: String,
    pub email: String,
}

impl Default for GitIdentity {
    fn default() -> Self {
        Self {
            name: "texsync".to_string(),
            email: "texsync@localhost".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            enabled: true,
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLockConfig {
    #[serde(default = "default_file_lock_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_file_lock_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for FileLockConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_file_lock_attempts(),
            retry_delay_ms: default_file_lock_delay_ms(),
        }
    }
}

/// Where distributed leases live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LockBackend {
    /// Lease files in a shared directory.
    #[default]
    File,
    /// In-process only; no cross-process exclusion.
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributedLockConfig {
    #[serde(default)]
    pub backend: LockBackend,
    /// Lease directory for the `file` backend; defaults to `~/.texsync/leases`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_lease_ttl_ms")]
    pub ttl_ms: u64,
    #[serde(default = "default_lease_retries")]
    pub retries: u32,
    #[serde(default = "default_lease_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for DistributedLockConfig {
    fn default() -> Self {
        Self {
            backend: LockBackend::default(),
            dir: None,
            ttl_ms: default_lease_ttl_ms(),
            retries: default_lease_retries(),
            retry_delay_ms: default_lease_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitConfig {
    #[serde(default = "default_git_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_network_retries")]
    pub network_retries: u32,
    #[serde(default = "default_network_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Clone with `--depth 1`.
    #[serde(default)]
    pub shallow_clone: bool,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_git_timeout_secs(),
            network_retries: default_network_retries(),
            retry_delay_ms: default_network_retry_delay_ms(),
            shallow_clone: false,
        }
    }
}

/// External command that streams generated text on stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub command: Vec<String>,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    /// How often streamed text is flushed into the document.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_open_line")]
    pub open_line: String,
    #[serde(default = "default_close_line")]
    pub close_line: String,
}

/// External command run after remote content lands locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileConfig {
    pub command: Vec<String>,
    #[serde(default = "default_compile_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Log viewer endpoint accepting `POST` JSON boxes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Append notifications to `~/.texsync/notifications.jsonl`.
    #[serde(default = "default_true")]
    pub journal: bool,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            journal: true,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Everything one watch session needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// The local document being edited.
    pub document: PathBuf,
    /// Local clone of the remote.
    pub repo_path: PathBuf,
    pub remote: RemoteUrl,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<CredentialConfig>,
    #[serde(default)]
    pub identity: GitIdentity,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub file_lock: FileLockConfig,
    #[serde(default)]
    pub distributed_lock: DistributedLockConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator: Option<GeneratorConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compile: Option<CompileConfig>,
    #[serde(default)]
    pub notify: NotifyConfig,
    /// Filesystem event coalescing window.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl SessionConfig {
    /// Minimal config with defaults everywhere else.
    pub fn new(document: PathBuf, repo_path: PathBuf, remote: RemoteUrl) -> Self {
        Self {
            document,
            repo_path,
            remote,
            branch: default_branch(),
            credentials: None,
            identity: GitIdentity::default(),
            monitor: MonitorConfig::default(),
            file_lock: FileLockConfig::default(),
            distributed_lock: DistributedLockConfig::default(),
            git: GitConfig::default(),
            generator: None,
            compile: None,
            notify: NotifyConfig::default(),
            debounce_ms: default_debounce_ms(),
        }
    }

    /// File name shared by the local document and its copy in the repo.
    pub fn document_name(&self) -> Result<&str, ConfigError> {
        self.document
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "document path has no file name: {}",
                    self.document.display()
                ))
            })
    }

    /// Path of the document's copy inside the repository.
    pub fn repo_document(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.repo_path.join(self.document_name()?))
    }

    pub fn identity(&self) -> RepoIdentity {
        RepoIdentity::from_remote(&self.remote)
    }

    /// Access token from the configured environment variable.
    ///
    /// `Ok(None)` when no credentials are configured.
    pub fn access_token(&self) -> Result<Option<String>, ConfigError> {
        let Some(creds) = &self.credentials else {
            return Ok(None);
        };
        match std::env::var(&creds.token_env) {
            Ok(token) if !token.is_empty() => Ok(Some(token)),
            _ => Err(ConfigError::Invalid(format!(
                "environment variable {} is not set",
                creds.token_env
            ))),
        }
    }

    /// Remote URL git should use, with credentials injected when configured.
    pub fn authenticated_remote(&self) -> Result<String, ConfigError> {
        match (&self.credentials, self.access_token()?) {
            (Some(creds), Some(token)) => self.remote.with_credentials(&creds.username, &token),
            _ => Ok(self.remote.0.clone()),
        }
    }

    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.document_name()?;
        if self.branch.trim().is_empty() {
            return Err(ConfigError::Invalid("branch must not be empty".into()));
        }
        if self.file_lock.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "file_lock.max_attempts must be at least 1".into(),
            ));
        }
        if self.distributed_lock.ttl_ms == 0 {
            return Err(ConfigError::Invalid(
                "distributed_lock.ttl_ms must be positive".into(),
            ));
        }
        if self.monitor.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "monitor.poll_interval_secs must be positive".into(),
            ));
        }
        for (name, cmd) in [
            ("generator", self.generator.as_ref().map(|g| &g.command)),
            ("compile", self.compile.as_ref().map(|c| &c.command)),
        ] {
            if matches!(cmd, Some(c) if c.is_empty()) {
                return Err(ConfigError::Invalid(format!("{name}.command is empty")));
            }
        }
        Ok(())
    }

    /// Resolve relative paths against `base` (the config file's directory).
    fn resolve_relative(&mut self, base: &Path) {
        for path in [&mut self.document, &mut self.repo_path] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        if let Some(dir) = self.distributed_lock.dir.as_mut() {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// `<home>/.texsync/`
pub fn texsync_root(home: &Path) -> PathBuf {
    home.join(".texsync")
}

/// `<home>/.texsync/config.yaml`; pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    texsync_root(home).join(CONFIG_FILE)
}

/// Load and validate the config at an explicit path.
///
/// Returns `ConfigError::ConfigNotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_from(path: &Path) -> Result<SessionConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::ConfigNotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path)?;
    let mut config: SessionConfig =
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
    if let Some(base) = path.parent() {
        config.resolve_relative(base);
    }
    config.validate()?;
    Ok(config)
}

/// Load `<home>/.texsync/config.yaml`.
pub fn load_at(home: &Path) -> Result<SessionConfig, ConfigError> {
    load_from(&config_path_at(home))
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<SessionConfig, ConfigError> {
    load_at(&home()?)
}

/// Atomically save a config to an explicit path.
///
/// Write flow: serialize → `.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_to(path: &Path, config: &SessionConfig) -> Result<(), ConfigError> {
    config.validate()?;
    if let Some(dir) = path.parent() {
        if !dir.exists() {
            std::fs::create_dir_all(dir)?;
            set_dir_permissions(dir)?;
        }
    }
    let tmp_path = path.with_extension("yaml.tmp");
    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Save to `<home>/.texsync/config.yaml`.
pub fn save_at(home: &Path, config: &SessionConfig) -> Result<(), ConfigError> {
    save_to(&config_path_at(home), config)
}

/// `save_at` convenience wrapper.
pub fn save(config: &SessionConfig) -> Result<(), ConfigError> {
    save_at(&home()?, config)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

pub(crate) fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

fn default_username() -> String {
    "git".to_string()
}
fn default_branch() -> String {
    "master".to_string()
}
fn default_true() -> bool {
    true
}
fn default_poll_interval_secs() -> u64 {
    10
}
fn default_file_lock_attempts() -> u32 {
    5
}
fn default_file_lock_delay_ms() -> u64 {
    1_000
}
fn default_lease_ttl_ms() -> u64 {
    30_000
}
fn default_lease_retries() -> u32 {
    5
}
fn default_lease_retry_delay_ms() -> u64 {
    500
}
fn default_git_timeout_secs() -> u64 {
    120
}
fn default_network_retries() -> u32 {
    3
}
fn default_network_retry_delay_ms() -> u64 {
    2_000
}
fn default_generation_timeout_secs() -> u64 {
    600
}
fn default_flush_interval_ms() -> u64 {
    500
}
fn default_open_line() -> String {
    "\\begin{answer}".to_string()
}
fn default_close_line() -> String {
    "\\end{answer}".to_string()
}
fn default_compile_timeout_secs() -> u64 {
    300
}
fn default_debounce_ms() -> u64 {
    500
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}
