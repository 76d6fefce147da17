//! Backup CLI commands
//!
//! Implements CLI commands for backup management.

use clap::Subcommand;

use crate::core::LogItCore;
use crate::error::{LogItError, LogItResult};

/// Backup subcommands
#[derive(Subcommand)]
pub enum BackupCommands {
    /// Create a new backup
    Create,

    /// List all available backups, oldest first
    List,

    /// Restore the accounts from a backup
    Restore {
        /// Backup filename (use 'latest' for most recent)
        backup: String,

        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Delete the oldest backups
    Remove {
        /// Number of backups to delete
        amount: usize,
    },
}

/// Handle a backup command
pub fn handle_backup_command(core: &LogItCore, cmd: BackupCommands) -> LogItResult<()> {
    let manager = core.backups()?;

    match cmd {
        BackupCommands::Create => {
            let backup_path = manager.create_backup()?;
            let filename = backup_path
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| backup_path.display().to_string());
            println!("Backup created: {}", filename);
            println!("Location: {}", backup_path.display());
        }

        BackupCommands::List => {
            let backups = manager.get_backups(true)?;

            if backups.is_empty() {
                println!("No backups found.");
                println!("Create one with: logit backup create");
                return Ok(());
            }

            for (i, backup) in backups.iter().enumerate() {
                println!(
                    "  {}. {} ({})",
                    i + 1,
                    backup.filename,
                    format_size(backup.size_bytes)
                );
            }
            println!();
            println!("Total: {} backup(s)", backups.len());
        }

        BackupCommands::Restore { backup, force } => {
            let filename = if backup.eq_ignore_ascii_case("latest") {
                manager
                    .get_backups(true)?
                    .pop()
                    .map(|b| b.filename)
                    .ok_or_else(|| LogItError::backup_not_found("latest"))?
            } else {
                backup
            };

            if manager.get_backup_file(&filename).is_none() {
                return Err(LogItError::backup_not_found(&filename));
            }

            if !force {
                println!("WARNING: This will replace ALL current accounts!");
                println!("To proceed, run again with --force flag:");
                println!("  logit backup restore {} --force", filename);
                return Ok(());
            }

            let result = manager.restore_backup(&filename)?;
            println!("Restore complete!");
            println!("{}", result.summary());
        }

        BackupCommands::Remove { amount } => {
            let removed = manager.remove_backups(amount)?;
            println!("Deleted {} backup(s).", removed);
        }
    }

    Ok(())
}

/// Format a file size in human-readable form
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
