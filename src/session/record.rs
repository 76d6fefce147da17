//! Session records and transitions

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndReason {
    /// Ended explicitly, by the player or on disconnect
    Logout,
    /// Idle for at least the configured lifetime
    Timeout,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Logout => write!(f, "logout"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// State of a tracked session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Alive,
    /// Kept until the next sweep, then forgotten
    Ended(EndReason),
}

/// Session status of a username, including the untracked case
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    NoSession,
    Alive,
    Ended(EndReason),
}

/// One tracked session
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub username: String,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub state: SessionState,
}

impl Session {
    pub fn new(username: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            username: username.into(),
            started_at: now,
            last_activity: now,
            state: SessionState::Alive,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.state == SessionState::Alive
    }

    pub fn idle_time(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_activity
    }

    /// Idle for `lifetime` or longer; the boundary itself counts as expired
    pub fn is_expired(&self, now: DateTime<Utc>, lifetime: Duration) -> bool {
        self.is_alive() && self.idle_time(now) >= lifetime
    }
}

/// A transition reported to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Ended { username: String, reason: EndReason },
}

impl SessionEvent {
    pub fn username(&self) -> &str {
        match self {
            Self::Ended { username, .. } => username,
        }
    }
}
