//! Session lifecycle
//!
//! ```text
//! start_session() ──→ [Alive] ──→ end_session() ──→ [Ended(Logout)]
//!                        │                                │
//!                        └── idle ≥ lifetime, tick() ──→ [Ended(Timeout)]
//!                                                         │
//!                                         next tick() ──→ forgotten
//! ```
//!
//! Owned by the single scheduler thread, so plain `&mut self` methods.
//! Sessions exist only for registered accounts.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use super::record::{EndReason, Session, SessionEvent, SessionState, SessionStatus};
use crate::accounts::{normalize_username, AccountManager};
use crate::clock::Clock;
use crate::error::{LogItError, LogItResult};

pub struct SessionManager {
    accounts: Arc<AccountManager>,
    clock: Arc<dyn Clock>,
    lifetime: Duration,
    sessions: HashMap<String, Session>,
}

impl SessionManager {
    pub fn new(accounts: Arc<AccountManager>, clock: Arc<dyn Clock>, lifetime: Duration) -> Self {
        Self {
            accounts,
            clock,
            lifetime,
            sessions: HashMap::new(),
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Start a session for a registered account
    ///
    /// Returns `false` without touching the session if one is already alive.
    pub fn start_session(&mut self, username: &str) -> LogItResult<bool> {
        let username = normalize_username(username);
        if !self.accounts.is_registered(&username)? {
            return Err(LogItError::account_not_found(&username));
        }
        if self.is_session_alive(&username) {
            return Ok(false);
        }

        let now = self.clock.now();
        self.sessions
            .insert(username.clone(), Session::new(username.clone(), now));
        self.record_last_active(&username, now);
        debug!(username = %username, "session started");
        Ok(true)
    }

    /// End an alive session
    ///
    /// Returns `false` if there was no alive session.
    pub fn end_session(&mut self, username: &str) -> LogItResult<bool> {
        let username = normalize_username(username);
        Ok(self.end(&username, EndReason::Logout).is_some())
    }

    fn end(&mut self, username: &str, reason: EndReason) -> Option<SessionEvent> {
        let now = self.clock.now();
        let session = self.sessions.get_mut(username).filter(|s| s.is_alive())?;
        session.state = SessionState::Ended(reason);
        self.record_last_active(username, now);
        debug!(username = %username, %reason, "session ended");
        Some(SessionEvent::Ended {
            username: username.to_string(),
            reason,
        })
    }

    /// Persist the transition time; a failed write is logged, not fatal
    fn record_last_active(&self, username: &str, now: DateTime<Utc>) {
        if let Err(e) = self.accounts.set_last_active(username, now.timestamp()) {
            warn!(username = %username, error = %e, "failed to record last activity");
        }
    }

    pub fn is_session_alive(&self, username: &str) -> bool {
        self.sessions
            .get(&normalize_username(username))
            .is_some_and(Session::is_alive)
    }

    pub fn status(&self, username: &str) -> SessionStatus {
        match self.sessions.get(&normalize_username(username)) {
            None => SessionStatus::NoSession,
            Some(session) => match session.state {
                SessionState::Alive => SessionStatus::Alive,
                SessionState::Ended(reason) => SessionStatus::Ended(reason),
            },
        }
    }

    pub fn get_session(&self, username: &str) -> Option<&Session> {
        self.sessions.get(&normalize_username(username))
    }

    /// Record activity, postponing the idle timeout
    pub fn touch(&mut self, username: &str) -> bool {
        let now = self.clock.now();
        match self
            .sessions
            .get_mut(&normalize_username(username))
            .filter(|s| s.is_alive())
        {
            Some(session) => {
                session.last_activity = now;
                true
            }
            None => false,
        }
    }

    /// Forget any session for `username`, e.g. after the account is removed
    pub fn forget(&mut self, username: &str) -> bool {
        self.sessions.remove(&normalize_username(username)).is_some()
    }

    /// Alive sessions, sorted by username
    pub fn alive_sessions(&self) -> Vec<&Session> {
        let mut alive: Vec<&Session> = self.sessions.values().filter(|s| s.is_alive()).collect();
        alive.sort_by(|a, b| a.username.cmp(&b.username));
        alive
    }

    /// Periodic sweep
    ///
    /// Forgets sessions that ended before this tick, drops sessions whose
    /// account no longer exists, then ends every alive session idle for at
    /// least the lifetime. Returns the timeouts, in username order.
    pub fn tick(&mut self) -> Vec<SessionEvent> {
        self.sessions.retain(|_, s| s.is_alive());

        let accounts = Arc::clone(&self.accounts);
        self.sessions.retain(|username, _| {
            let registered = accounts.is_registered(username).unwrap_or(true);
            if !registered {
                debug!(username = %username, "session dropped for removed account");
            }
            registered
        });

        let now = self.clock.now();
        let mut expired: Vec<String> = self
            .sessions
            .values()
            .filter(|s| s.is_expired(now, self.lifetime))
            .map(|s| s.username.clone())
            .collect();
        expired.sort();

        expired
            .iter()
            .filter_map(|username| self.end(username, EndReason::Timeout))
            .collect()
    }

    /// Re-establish an alive session without resetting its times
    ///
    /// Used when sessions are carried across a restart.
    pub(crate) fn restore_session(&mut self, session: Session) -> LogItResult<bool> {
        let username = normalize_username(&session.username);
        if !self.accounts.is_registered(&username)? {
            return Ok(false);
        }
        self.sessions.insert(
            username.clone(),
            Session {
                username,
                state: SessionState::Alive,
                ..session
            },
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::AccountColumns;
    use crate::clock::ManualClock;
    use crate::crypto::{HashingAlgorithm, PasswordHasher};
    use crate::storage::{Storage, SqliteStorage};
    use chrono::TimeZone;

    fn start_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
    }

    fn setup(users: &[&str]) -> (SessionManager, Arc<AccountManager>, ManualClock) {
        let mut storage = SqliteStorage::in_memory();
        storage.connect().unwrap();
        let accounts = Arc::new(AccountManager::new(
            Box::new(storage),
            "accounts",
            AccountColumns::default(),
            PasswordHasher::new(HashingAlgorithm::Plain, false),
        ));
        accounts.initialize().unwrap();
        for user in users {
            accounts.create_account(user, "pw", "").unwrap();
        }

        let clock = ManualClock::new(start_time());
        let sessions = SessionManager::new(
            Arc::clone(&accounts),
            Arc::new(clock.clone()),
            Duration::seconds(60),
        );
        (sessions, accounts, clock)
    }

    #[test]
    fn test_start_is_idempotent() {
        let (mut sessions, _, clock) = setup(&["bob"]);

        assert!(sessions.start_session("bob").unwrap());
        clock.advance(Duration::seconds(5));
        assert!(!sessions.start_session("Bob").unwrap());

        assert_eq!(sessions.alive_sessions().len(), 1);
        assert_eq!(sessions.get_session("bob").unwrap().started_at, start_time());
    }

    #[test]
    fn test_unregistered_user_gets_no_session() {
        let (mut sessions, _, _) = setup(&[]);

        let err = sessions.start_session("ghost").unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(sessions.status("ghost"), SessionStatus::NoSession);
    }

    #[test]
    fn test_end_session_records_last_active() {
        let (mut sessions, accounts, clock) = setup(&["bob"]);
        sessions.start_session("bob").unwrap();
        clock.advance(Duration::seconds(30));

        assert!(sessions.end_session("bob").unwrap());
        assert!(!sessions.end_session("bob").unwrap());
        assert_eq!(sessions.status("bob"), SessionStatus::Ended(EndReason::Logout));
        assert!(!sessions.is_session_alive("bob"));

        let account = accounts.get_account("bob").unwrap().unwrap();
        assert_eq!(
            account.last_active,
            Some((start_time() + Duration::seconds(30)).timestamp())
        );

        // Ended records are forgotten on the next sweep
        sessions.tick();
        assert_eq!(sessions.status("bob"), SessionStatus::NoSession);
    }

    #[test]
    fn test_timeout_boundary() {
        let (mut sessions, _, clock) = setup(&["bob"]);
        sessions.start_session("bob").unwrap();

        clock.advance(Duration::seconds(59));
        assert!(sessions.tick().is_empty());
        assert!(sessions.is_session_alive("bob"));

        clock.advance(Duration::seconds(1));
        let events = sessions.tick();
        assert_eq!(
            events,
            vec![SessionEvent::Ended {
                username: "bob".into(),
                reason: EndReason::Timeout,
            }]
        );
        assert_eq!(sessions.status("bob"), SessionStatus::Ended(EndReason::Timeout));
    }

    #[test]
    fn test_touch_postpones_timeout() {
        let (mut sessions, _, clock) = setup(&["bob"]);
        sessions.start_session("bob").unwrap();

        clock.advance(Duration::seconds(50));
        assert!(sessions.touch("bob"));
        clock.advance(Duration::seconds(50));
        assert!(sessions.tick().is_empty());

        assert!(!sessions.touch("alice"));
    }

    #[test]
    fn test_sessions_of_removed_accounts_are_dropped() {
        let (mut sessions, accounts, _) = setup(&["bob", "carol"]);
        sessions.start_session("bob").unwrap();
        sessions.start_session("carol").unwrap();

        accounts.remove_account("carol").unwrap();
        sessions.tick();

        assert!(sessions.is_session_alive("bob"));
        assert_eq!(sessions.status("carol"), SessionStatus::NoSession);
    }
}
