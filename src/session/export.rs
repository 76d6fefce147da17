//! Session side file
//!
//! Carries the alive sessions across a controlled restart. The file is JSON:
//!
//! ```json
//! { "sessions": [ { "username": "bob", "started_at": "...", "last_activity": "..." } ] }
//! ```

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::manager::SessionManager;
use super::record::{Session, SessionState};
use crate::error::LogItResult;
use crate::storage::file_io::{read_json_required, write_json_atomic};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ExportedSession {
    username: String,
    started_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SessionFile {
    sessions: Vec<ExportedSession>,
}

impl SessionManager {
    /// Write every alive session to `path`, returning how many were written
    pub fn export_sessions(&self, path: &Path) -> LogItResult<usize> {
        let file = SessionFile {
            sessions: self
                .alive_sessions()
                .into_iter()
                .map(|s| ExportedSession {
                    username: s.username.clone(),
                    started_at: s.started_at,
                    last_activity: s.last_activity,
                })
                .collect(),
        };
        write_json_atomic(path, &file)?;
        info!(count = file.sessions.len(), path = %path.display(), "sessions exported");
        Ok(file.sessions.len())
    }

    /// Re-establish the sessions stored in `path`
    ///
    /// Start and activity times are kept as exported. Entries for usernames
    /// that are no longer registered are skipped. Returns how many sessions
    /// were restored.
    pub fn import_sessions(&mut self, path: &Path) -> LogItResult<usize> {
        let file: SessionFile = read_json_required(path)?;

        let mut restored = 0;
        for exported in file.sessions {
            let session = Session {
                username: exported.username,
                started_at: exported.started_at,
                last_activity: exported.last_activity,
                state: SessionState::Alive,
            };
            let username = session.username.clone();
            if self.restore_session(session)? {
                restored += 1;
            } else {
                warn!(username = %username, "skipping session of unregistered account");
            }
        }
        info!(count = restored, path = %path.display(), "sessions imported");
        Ok(restored)
    }
}
