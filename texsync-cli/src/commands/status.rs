//! `texsync status [--json]`

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::{json, Value};
use tabled::{settings::Style, Table, Tabled};

use texsync_daemon::{request_status, DaemonError};
use texsync_sync::{ActionOutcome, Session, SyncAction};

use super::home_dir;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Field")]
    field: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let payload = match request_status(&home) {
            Ok(status) => status,
            Err(DaemonError::DaemonNotRunning { .. }) => local_status(&home)?,
            Err(err) => return Err(err).context("failed to query daemon status"),
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&payload)
                    .context("failed to serialize status JSON")?
            );
        } else {
            print_table(&payload);
        }
        Ok(())
    }
}

/// The daemon's status shape, built from a one-shot session.
fn local_status(home: &std::path::Path) -> Result<Value> {
    let session = Session::open_at(home).context("failed to open session")?;
    let ActionOutcome::Status(status) = session
        .run(SyncAction::Status)
        .context("failed to read session status")?
    else {
        anyhow::bail!("status action returned an unexpected outcome");
    };
    let config = &session.context().config;
    Ok(json!({
        "running": false,
        "document": config.document.display().to_string(),
        "repo_path": config.repo_path.display().to_string(),
        "remote": config.remote.redacted(),
        "session": status,
    }))
}

fn print_table(payload: &Value) {
    let running = payload["running"].as_bool().unwrap_or(false);
    println!(
        "texsync v{} | daemon {}",
        env!("CARGO_PKG_VERSION"),
        if running {
            "running".green().bold().to_string()
        } else {
            "stopped".bright_black().bold().to_string()
        }
    );

    let session = &payload["session"];
    let sync = &session["sync"];
    let rows = vec![
        StatusRow {
            field: "document",
            value: text(&payload["document"]),
        },
        StatusRow {
            field: "repository",
            value: text(&payload["repo_path"]),
        },
        StatusRow {
            field: "remote",
            value: text(&payload["remote"]),
        },
        StatusRow {
            field: "state",
            value: processing(&session["processing"]),
        },
        StatusRow {
            field: "lease holder",
            value: session["lease_holder"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| "free".to_string()),
        },
        StatusRow {
            field: "dirty",
            value: text(&sync["dirty"]),
        },
        StatusRow {
            field: "last cycle",
            value: text(&sync["last_cycle_at"]),
        },
        StatusRow {
            field: "last push",
            value: text(&sync["last_push_at"]),
        },
    ];
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    if let Some(stashes) = session["stranded_stashes"].as_array() {
        for stash in stashes {
            println!(
                "{} unpopped stash: {}",
                "■".red().bold(),
                stash.as_str().unwrap_or_default()
            );
        }
    }
    if session["index_lock"].as_bool().unwrap_or(false) {
        println!(
            "{} .git/index.lock is present; remove it if no git process is running",
            "■".red().bold()
        );
    }
    if let Some(err) = payload["activity"]["last_error"].as_str() {
        println!("{} last error: {err}", "■".yellow().bold());
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::Null => "never".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `{"state": "streaming", "id": "..."}` → `streaming (…)`
fn processing(value: &Value) -> String {
    let state = value["state"].as_str().unwrap_or("unknown");
    match value["id"].as_str() {
        Some(id) => format!("{state} ({id})"),
        None => state.to_string(),
    }
}
