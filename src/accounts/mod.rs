//! Accounts: the cached, write-through view of the accounts unit

pub mod account;
pub mod manager;

pub use account::{normalize_username, Account, AccountColumns, Location};
pub use manager::{AccountBatch, AccountChange, AccountManager};
