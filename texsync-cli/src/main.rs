//! texsync: keep a LaTeX document, a streaming generator and an Overleaf
//! git remote in step.
//!
//! # Usage
//!
//! ```text
//! texsync init --document <path> --repo <path> --remote <url> [--branch ...]
//! texsync push | pull | cancel
//! texsync reset [--to idle|start]
//! texsync status [--json]
//! texsync notifications [--lines N]
//! texsync daemon start|stop|status|cancel|logs
//! ```
//!
//! `push`, `pull`, `reset`, `cancel` and `status` go through the daemon's
//! socket when it is running and fall back to a one-shot session otherwise.

mod commands;

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    daemon::DaemonCommand, init::InitArgs, notifications::NotificationsArgs, status::StatusArgs,
    sync::ResetArgs,
};
use texsync_core::MarkerStatus;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "texsync",
    version,
    about = "Sync a LaTeX document with its Overleaf git remote",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write ~/.texsync/config.yaml and clone the remote.
    Init(InitArgs),

    /// Commit and push the local document now.
    Push,

    /// Fetch the remote and merge it into the local document now.
    Pull,

    /// Reset a stale streaming or error marker.
    Reset(ResetArgs),

    /// Cancel the generation in flight.
    Cancel,

    /// Show session, lease and sync state.
    Status(StatusArgs),

    /// Print recent operator notifications.
    Notifications(NotificationsArgs),

    /// Manage the background watch session.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Shared reset target argument
// ---------------------------------------------------------------------------

/// Marker status a stale marker may be reset to.
#[derive(Debug, Clone)]
pub struct ResetTarget(pub MarkerStatus);

impl Default for ResetTarget {
    fn default() -> Self {
        Self(MarkerStatus::Idle)
    }
}

impl FromStr for ResetTarget {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "idle" => Ok(Self(MarkerStatus::Idle)),
            "start" => Ok(Self(MarkerStatus::Start)),
            other => Err(format!(
                "cannot reset to '{other}'; expected: idle, start"
            )),
        }
    }
}

impl fmt::Display for ResetTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Push => commands::sync::push(),
        Commands::Pull => commands::sync::pull(),
        Commands::Reset(args) => args.run(),
        Commands::Cancel => commands::sync::cancel(),
        Commands::Status(args) => args.run(),
        Commands::Notifications(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
