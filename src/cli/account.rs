//! Account CLI commands
//!
//! Implements CLI commands for account management.

use chrono::{TimeZone, Utc};
use clap::Subcommand;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::accounts::Account;
use crate::core::LogItCore;
use crate::error::{LogItError, LogItResult};

/// Account subcommands
#[derive(Subcommand)]
pub enum AccountCommands {
    /// Register a new account
    Register {
        /// Username
        username: String,
        /// Password (prompted for when omitted)
        password: Option<String>,
        /// Registration IP address
        #[arg(long, default_value = "")]
        ip: String,
    },
    /// Remove an account
    Unregister {
        /// Username
        username: String,
    },
    /// Check a password against an account
    Check {
        /// Username
        username: String,
        /// Password (prompted for when omitted)
        password: Option<String>,
    },
    /// Change the password of an account
    #[command(name = "changepass")]
    ChangePassword {
        /// Username
        username: String,
        /// New password (prompted for when omitted)
        password: Option<String>,
    },
    /// Show account details
    Info {
        /// Username
        username: String,
    },
    /// List all accounts
    List,
}

#[derive(Tabled)]
struct AccountRow {
    #[tabled(rename = "Username")]
    username: String,
    #[tabled(rename = "IP")]
    ip: String,
    #[tabled(rename = "Email")]
    email: String,
    #[tabled(rename = "Last active")]
    last_active: String,
}

impl From<&Account> for AccountRow {
    fn from(account: &Account) -> Self {
        Self {
            username: account.username.clone(),
            ip: account.ip.clone(),
            email: account.email.clone(),
            last_active: format_timestamp(account.last_active),
        }
    }
}

/// Handle an account command
pub fn handle_account_command(core: &LogItCore, cmd: AccountCommands) -> LogItResult<()> {
    let accounts = core.accounts()?;

    match cmd {
        AccountCommands::Register {
            username,
            password,
            ip,
        } => {
            let password = match password {
                Some(password) => password,
                None => prompt_new_password()?,
            };
            let account = accounts.create_account(&username, &password, &ip)?;
            println!("Registered account: {}", account.username);
        }

        AccountCommands::Unregister { username } => {
            accounts.remove_account(&username)?;
            println!("Removed account: {}", username.to_lowercase());
        }

        AccountCommands::Check { username, password } => {
            if !accounts.is_registered(&username)? {
                return Err(LogItError::account_not_found(&username));
            }
            let password = match password {
                Some(password) => password,
                None => prompt_password("Password: ")?,
            };
            if !accounts.check_account_password(&username, &password)? {
                return Err(LogItError::Validation("Password does not match".into()));
            }
            println!("Password matches.");
        }

        AccountCommands::ChangePassword { username, password } => {
            if !accounts.is_registered(&username)? {
                return Err(LogItError::account_not_found(&username));
            }
            let password = match password {
                Some(password) => password,
                None => prompt_new_password()?,
            };
            accounts.change_account_password(&username, &password)?;
            println!("Password changed for: {}", username.to_lowercase());
        }

        AccountCommands::Info { username } => {
            let account = accounts
                .get_account(&username)?
                .ok_or_else(|| LogItError::account_not_found(&username))?;

            println!("Account: {}", account.username);
            println!("  IP:          {}", or_dash(&account.ip));
            println!("  Email:       {}", or_dash(&account.email));
            println!("  Last active: {}", format_timestamp(account.last_active));
            match &account.location {
                Some(location) => println!("  Location:    {}", location),
                None => println!("  Location:    -"),
            }
            println!(
                "  Waiting room: {}",
                if account.in_waiting_room { "Yes" } else { "No" }
            );
        }

        AccountCommands::List => {
            let all = accounts.accounts()?;
            if all.is_empty() {
                println!("No accounts registered.");
                return Ok(());
            }

            let rows: Vec<AccountRow> = all.iter().map(AccountRow::from).collect();
            println!("{}", Table::new(rows).with(Style::modern()));
            println!("Total: {} account(s)", all.len());
        }
    }

    Ok(())
}

fn or_dash(value: &str) -> &str {
    if value.is_empty() {
        "-"
    } else {
        value
    }
}

fn format_timestamp(timestamp: Option<i64>) -> String {
    timestamp
        .and_then(|t| Utc.timestamp_opt(t, 0).single())
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Prompt for a password (hidden input)
fn prompt_password(prompt: &str) -> LogItResult<String> {
    rpassword::prompt_password(prompt)
        .map_err(|e| LogItError::Io(format!("Failed to read password: {}", e)))
}

/// Prompt twice for a new password
fn prompt_new_password() -> LogItResult<String> {
    let first = prompt_password("New password: ")?;
    if first.is_empty() {
        return Err(LogItError::Validation("Password cannot be empty".into()));
    }
    let second = prompt_password("Confirm password: ")?;
    if first != second {
        return Err(LogItError::Validation("Passwords do not match".into()));
    }
    Ok(first)
}
