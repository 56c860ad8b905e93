//! `texsync init --document <path> --repo <path> --remote <url> [...]`

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use texsync_core::config::{self, CompileConfig, CredentialConfig, GeneratorConfig};
use texsync_core::{RemoteUrl, SessionConfig};
use texsync_sync::Session;

use super::home_dir;

/// Write the session config and make the local clone usable.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// The local .tex document to keep in sync.
    #[arg(long, short = 'd')]
    pub document: PathBuf,

    /// Where the local clone of the remote lives.
    #[arg(long, short = 'r')]
    pub repo: PathBuf,

    /// Git URL of the Overleaf project, without credentials.
    #[arg(long)]
    pub remote: String,

    #[arg(long, default_value = "master")]
    pub branch: String,

    /// Git username; the token is read from `--token-env` at run time.
    #[arg(long, requires = "token_env")]
    pub username: Option<String>,

    /// Environment variable holding the access token.
    #[arg(long, requires = "username")]
    pub token_env: Option<String>,

    /// Generator command, one argument per flag occurrence.
    #[arg(long = "generator", value_name = "ARG", num_args = 1..)]
    pub generator: Vec<String>,

    /// Compile command run after remote content lands locally.
    #[arg(long = "compile", value_name = "ARG", num_args = 1..)]
    pub compile: Vec<String>,

    /// Overwrite an existing config.
    #[arg(long)]
    pub force: bool,

    /// Only write the config; do not clone.
    #[arg(long)]
    pub no_clone: bool,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let path = config::config_path_at(&home);
        if path.exists() && !self.force {
            bail!(
                "{} already exists; pass --force to overwrite it",
                path.display()
            );
        }

        let no_clone = self.no_clone;
        let config = self.into_config()?;
        config.validate().context("invalid session config")?;
        config::save_at(&home, &config)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("{} Saved config to {}", "✓".green(), path.display());

        if no_clone {
            return Ok(());
        }
        let session =
            Session::from_config(config, &home).context("failed to open session")?;
        let prep = session
            .prepare()
            .context("failed to prepare the local clone")?;
        let cfg = &session.context().config;
        if prep.cloned {
            println!(
                "{} Cloned {} into {}",
                "✓".green(),
                cfg.remote.redacted(),
                cfg.repo_path.display()
            );
        }
        if prep.created_document {
            println!(
                "{} Created {} from the repository",
                "✓".green(),
                cfg.document.display()
            );
        }
        Ok(())
    }

    fn into_config(self) -> Result<SessionConfig> {
        let document = absolute(&self.document)?;
        let repo = absolute(&self.repo)?;
        let mut config = SessionConfig::new(document, repo, RemoteUrl(self.remote));
        config.branch = self.branch;
        if let (Some(username), Some(token_env)) = (self.username, self.token_env) {
            config.credentials = Some(CredentialConfig {
                username,
                token_env,
            });
        }
        if !self.generator.is_empty() {
            let defaults: GeneratorConfig =
                serde_json::from_value(serde_json::json!({ "command": self.generator }))
                    .context("failed to build generator config")?;
            config.generator = Some(defaults);
        }
        if !self.compile.is_empty() {
            let defaults: CompileConfig =
                serde_json::from_value(serde_json::json!({ "command": self.compile }))
                    .context("failed to build compile config")?;
            config.compile = Some(defaults);
        }
        Ok(config)
    }
}

/// Make `path` absolute without requiring it to exist.
fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("cannot resolve current directory")?;
    Ok(cwd.join(path))
}
