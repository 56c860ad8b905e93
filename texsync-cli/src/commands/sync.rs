//! `texsync push | pull | reset | cancel`

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use serde_json::Value;

use texsync_sync::SyncAction;

use super::{dispatch, home_dir, Route};
use crate::ResetTarget;

#[derive(Args, Debug)]
pub struct ResetArgs {
    /// Status to write into the marker: idle or start.
    #[arg(long, default_value_t = ResetTarget::default())]
    pub to: ResetTarget,
}

impl ResetArgs {
    pub fn run(self) -> Result<()> {
        run_action(SyncAction::Reset(self.to.0))
    }
}

pub fn push() -> Result<()> {
    run_action(SyncAction::Push)
}

pub fn pull() -> Result<()> {
    run_action(SyncAction::Pull)
}

pub fn cancel() -> Result<()> {
    run_action(SyncAction::Cancel)
}

fn run_action(action: SyncAction) -> Result<()> {
    let home = home_dir()?;
    let (route, outcome) = dispatch(&home, action)?;
    let via = match route {
        Route::Daemon => " (daemon)".bright_black().to_string(),
        Route::OneShot => String::new(),
    };
    println!("{}{via}", describe(&outcome));
    Ok(())
}

/// One line for an `ActionOutcome` rendered as JSON.
pub fn describe(outcome: &Value) -> String {
    let Some((kind, detail)) = outcome.as_object().and_then(|o| o.iter().next()) else {
        return outcome.to_string();
    };
    match (kind.as_str(), detail) {
        ("pushed", Value::String(s)) if s == "pushed" => format!("{} pushed", "✓".green()),
        ("pushed", _) => "nothing to commit".to_string(),
        ("pulled", Value::String(s)) if s == "up_to_date" => "already up to date".to_string(),
        ("pulled", Value::Object(o)) => describe_cycle(o),
        ("reset", Value::Bool(true)) => format!("{} marker reset", "✓".green()),
        ("reset", Value::Bool(false)) => "no stale marker found".to_string(),
        ("cancelled", Value::Bool(true)) => format!("{} generation cancelled", "✓".green()),
        ("cancelled", Value::Bool(false)) => "no generation running".to_string(),
        _ => outcome.to_string(),
    }
}

fn describe_cycle(cycle: &serde_json::Map<String, Value>) -> String {
    if let Some(reason) = cycle.get("skipped").and_then(Value::as_str) {
        let why = match reason {
            "streaming" => "a generation is streaming",
            "lock_busy" => "another process holds the repository lease",
            other => other,
        };
        return format!("{} skipped: {why}", "!".yellow().bold());
    }
    if let Some(pulled) = cycle.get("pulled") {
        let commits = pulled.get("commits").and_then(Value::as_u64).unwrap_or(0);
        let stashed = pulled.get("stashed").and_then(Value::as_bool).unwrap_or(false);
        let mut line = format!(
            "{} pulled {commits} commit{}",
            "✓".green(),
            if commits == 1 { "" } else { "s" }
        );
        if stashed {
            line.push_str(", local edits restored from stash");
        }
        return line;
    }
    Value::Object(cycle.clone()).to_string()
}
