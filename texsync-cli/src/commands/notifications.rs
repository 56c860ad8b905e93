//! `texsync notifications [--lines N]`

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use texsync_daemon::paths::journal_path;
use texsync_sync::notify::read_journal;
use texsync_sync::Level;

use super::home_dir;

#[derive(Args, Debug)]
pub struct NotificationsArgs {
    /// Number of trailing notifications to show.
    #[arg(long, default_value_t = 20)]
    pub lines: usize,
}

impl NotificationsArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let path = journal_path(&home);
        let entries = read_journal(&path, self.lines)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if entries.is_empty() {
            println!("no notifications yet");
            return Ok(());
        }

        for n in entries {
            println!(
                "{} {} {}: {}",
                n.at.format("%Y-%m-%d %H:%M:%S").to_string().bright_black(),
                level_tag(n.level),
                n.title.bold(),
                n.message
            );
        }
        Ok(())
    }
}

fn level_tag(level: Level) -> String {
    match level {
        Level::Info => "INFO ".green().to_string(),
        Level::Warning => "WARN ".yellow().bold().to_string(),
        Level::Error => "ERROR".red().bold().to_string(),
    }
}
