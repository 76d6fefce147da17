//! Session tracking
//!
//! Per-username authentication sessions, their idle timeout, the
//! forced-login policy and the side file used across restarts.

pub mod export;
pub mod forced_login;
pub mod manager;
pub mod record;

pub use forced_login::{ForcedLoginPolicy, Player};
pub use manager::SessionManager;
pub use record::{EndReason, Session, SessionEvent, SessionState, SessionStatus};
