use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use logit::cli::{handle_account_command, handle_backup_command};
use logit::clock::SystemClock;
use logit::config::{paths::LogItPaths, settings::Settings};
use logit::core::LogItCore;
use logit::logging::init_logging;

#[derive(Parser)]
#[command(
    name = "logit",
    version,
    about = "Account storage, sessions and backups for game-server login protection",
    long_about = "LogIt keeps player accounts in SQLite, PostgreSQL or CSV storage, \
                  tracks login sessions and takes point-in-time backups of the \
                  accounts. This binary administers the stored data."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Account management commands
    #[command(subcommand)]
    Account(logit::cli::AccountCommands),

    /// Backup management commands
    #[command(subcommand)]
    Backup(logit::cli::BackupCommands),

    /// Write the default configuration and create the data directory
    Init,

    /// Show current configuration and paths
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let paths = LogItPaths::new()?;
    let settings = Settings::load_or_create(&paths)?;
    init_logging(&settings.log_to_file, &paths)?;

    match cli.command {
        Some(Commands::Account(cmd)) => {
            let mut core = start_core(&paths)?;
            let result = handle_account_command(&core, cmd);
            core.stop()?;
            result?;
        }
        Some(Commands::Backup(cmd)) => {
            let mut core = start_core(&paths)?;
            let result = handle_backup_command(&core, cmd);
            core.stop()?;
            result?;
        }
        Some(Commands::Init) => {
            println!("Initializing LogIt at: {}", paths.base_dir().display());
            paths.ensure_directories()?;
            if paths.is_initialized() {
                println!("Configuration already exists; left unchanged.");
            } else {
                settings.save(&paths)?;
                println!("Wrote {}", paths.settings_file().display());
            }
            std::fs::create_dir_all(paths.data_file(&settings.backup.path))?;
            println!("Initialization complete!");
        }
        Some(Commands::Config) => {
            println!("LogIt Configuration");
            println!("===================");
            println!("Data directory:   {}", paths.base_dir().display());
            println!("Settings file:    {}", paths.settings_file().display());
            println!(
                "Backup directory: {}",
                paths.data_file(&settings.backup.path).display()
            );
            println!();
            println!("Settings:");
            print!("{}", serde_yaml::to_string(&settings)?);
        }
        None => {
            println!("LogIt - login protection account store");
            println!();
            println!("Run 'logit --help' for usage information.");
        }
    }

    Ok(())
}

fn start_core(paths: &LogItPaths) -> Result<LogItCore> {
    let mut core = LogItCore::new(paths.clone(), Arc::new(SystemClock))?;
    core.start()?;
    Ok(core)
}
