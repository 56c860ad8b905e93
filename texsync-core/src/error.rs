//! Error types for texsync-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from loading or saving session configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure (file not found, permission denied, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load; includes file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`; cannot locate `~/.texsync/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// The config YAML file did not exist at the expected path.
    #[error("config not found at {path}")]
    ConfigNotFound { path: PathBuf },

    /// The remote URL could not be parsed or is missing a host.
    #[error("invalid remote URL '{url}': {reason}")]
    InvalidRemote { url: String, reason: String },

    /// A configured value is out of range or inconsistent.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors raised while rewriting an in-document marker.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MarkerError {
    /// No parameter line carried the expected status.
    #[error("no marker with status '{status}' found in document")]
    NotFound { status: String },

    /// A requested transition would move the marker backwards.
    #[error("illegal marker transition {from} -> {to}")]
    IllegalTransition { from: String, to: String },
}
