//! Account model
//!
//! The application-level view of one entry of the accounts unit, plus the
//! configurable mapping between account fields and unit keys.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{LogItError, LogItResult};
use crate::storage::{Entry, Key, KeyType};

/// Last known position of a player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub world: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f32,
    pub pitch: f32,
}

impl Location {
    pub fn new(world: impl Into<String>, x: f64, y: f64, z: f64, yaw: f32, pitch: f32) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
            yaw,
            pitch,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:.1}, {:.1}, {:.1})",
            self.world, self.x, self.y, self.z
        )
    }
}

/// Names of the keys of the accounts unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountColumns {
    pub username: String,
    pub salt: String,
    pub password: String,
    pub ip: String,
    pub email: String,
    pub last_active: String,
    pub location_world: String,
    pub location_x: String,
    pub location_y: String,
    pub location_z: String,
    pub location_yaw: String,
    pub location_pitch: String,
    pub in_wr: String,
}

impl Default for AccountColumns {
    fn default() -> Self {
        Self {
            username: "username".to_string(),
            salt: "salt".to_string(),
            password: "password".to_string(),
            ip: "ip".to_string(),
            email: "email".to_string(),
            last_active: "last_active".to_string(),
            location_world: "location_world".to_string(),
            location_x: "location_x".to_string(),
            location_y: "location_y".to_string(),
            location_z: "location_z".to_string(),
            location_yaw: "location_yaw".to_string(),
            location_pitch: "location_pitch".to_string(),
            in_wr: "in_wr".to_string(),
        }
    }
}

impl AccountColumns {
    /// The full key set of the accounts unit, in creation order
    pub fn keys(&self) -> Vec<Key> {
        vec![
            Key::new(&self.username, KeyType::ShortText),
            Key::new(&self.salt, KeyType::ShortText),
            Key::new(&self.password, KeyType::LongText),
            Key::new(&self.ip, KeyType::ShortText),
            Key::new(&self.email, KeyType::ShortText),
            Key::new(&self.last_active, KeyType::Integer),
            Key::new(&self.location_world, KeyType::ShortText),
            Key::new(&self.location_x, KeyType::Real),
            Key::new(&self.location_y, KeyType::Real),
            Key::new(&self.location_z, KeyType::Real),
            Key::new(&self.location_yaw, KeyType::Real),
            Key::new(&self.location_pitch, KeyType::Real),
            Key::new(&self.in_wr, KeyType::Boolean),
        ]
    }
}

/// One registered account
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    /// Lowercase username; the identity of the account
    pub username: String,
    pub salt: String,
    pub password: String,
    /// IP address the account was registered from
    pub ip: String,
    pub email: String,
    /// Unix timestamp (seconds) of the last session transition
    pub last_active: Option<i64>,
    pub location: Option<Location>,
    /// Set while the player is being held in the waiting room
    pub in_waiting_room: bool,
}

impl Account {
    pub fn new(
        username: &str,
        salt: impl Into<String>,
        password: impl Into<String>,
        ip: impl Into<String>,
    ) -> Self {
        Self {
            username: normalize_username(username),
            salt: salt.into(),
            password: password.into(),
            ip: ip.into(),
            email: String::new(),
            last_active: None,
            location: None,
            in_waiting_room: false,
        }
    }

    /// Build an account from a stored entry
    ///
    /// # Errors
    ///
    /// Returns a validation error when the username or password key is
    /// missing, the username is empty, or a numeric value does not parse.
    pub fn from_entry(entry: &Entry, columns: &AccountColumns) -> LogItResult<Self> {
        let username = entry
            .get(&columns.username)
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| LogItError::Validation("Entry has no username".into()))?;
        let password = entry.get(&columns.password).ok_or_else(|| {
            LogItError::Validation(format!("Entry for {} has no password", username))
        })?;

        let text = |key: &str| entry.get(key).unwrap_or("").to_string();

        let last_active = match entry.get(&columns.last_active).unwrap_or("") {
            "" => None,
            value => Some(parse_number::<i64>(username, &columns.last_active, value)?),
        };

        let world = text(&columns.location_world);
        let location = if world.is_empty() {
            None
        } else {
            Some(Location {
                world,
                x: parse_optional(username, entry, &columns.location_x)?,
                y: parse_optional(username, entry, &columns.location_y)?,
                z: parse_optional(username, entry, &columns.location_z)?,
                yaw: parse_optional(username, entry, &columns.location_yaw)?,
                pitch: parse_optional(username, entry, &columns.location_pitch)?,
            })
        };

        Ok(Self {
            username: normalize_username(username),
            salt: text(&columns.salt),
            password: password.to_string(),
            ip: text(&columns.ip),
            email: text(&columns.email),
            last_active,
            location,
            in_waiting_room: parse_flag(entry.get(&columns.in_wr).unwrap_or("")),
        })
    }

    /// Every key of the accounts unit, filled from this account
    pub fn to_entry(&self, columns: &AccountColumns) -> Entry {
        let mut entry = Entry::new()
            .with(&columns.username, &self.username)
            .with(&columns.salt, &self.salt)
            .with(&columns.password, &self.password)
            .with(&columns.ip, &self.ip)
            .with(&columns.email, &self.email)
            .with(
                &columns.last_active,
                self.last_active.map(|t| t.to_string()).unwrap_or_default(),
            );
        for (key, value) in location_values(self.location.as_ref(), columns).iter() {
            entry.put(key, value);
        }
        entry.put(&columns.in_wr, flag_value(self.in_waiting_room));
        entry
    }
}

/// Canonical form of a username
pub fn normalize_username(username: &str) -> String {
    username.trim().to_lowercase()
}

/// Stored location values; `None` clears every location key
pub(crate) fn location_values(location: Option<&Location>, columns: &AccountColumns) -> Entry {
    match location {
        Some(l) => Entry::new()
            .with(&columns.location_world, &l.world)
            .with(&columns.location_x, l.x.to_string())
            .with(&columns.location_y, l.y.to_string())
            .with(&columns.location_z, l.z.to_string())
            .with(&columns.location_yaw, l.yaw.to_string())
            .with(&columns.location_pitch, l.pitch.to_string()),
        None => Entry::new()
            .with(&columns.location_world, "")
            .with(&columns.location_x, "")
            .with(&columns.location_y, "")
            .with(&columns.location_z, "")
            .with(&columns.location_yaw, "")
            .with(&columns.location_pitch, ""),
    }
}

pub(crate) fn flag_value(flag: bool) -> &'static str {
    if flag {
        "1"
    } else {
        "0"
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "TRUE")
}

fn parse_number<T: std::str::FromStr>(username: &str, key: &str, value: &str) -> LogItResult<T> {
    value.trim().parse::<T>().map_err(|_| {
        LogItError::Validation(format!(
            "Entry for {} has a malformed {}: {:?}",
            username, key, value
        ))
    })
}

fn parse_optional<T>(username: &str, entry: &Entry, key: &str) -> LogItResult<T>
where
    T: std::str::FromStr + Default,
{
    match entry.get(key).unwrap_or("") {
        "" => Ok(T::default()),
        value => parse_number(username, key, value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Account {
        let mut account = Account::new("Alice", "salt", "hash", "10.0.0.1");
        account.email = "alice@example.com".into();
        account.last_active = Some(1_700_000_000);
        account.location = Some(Location::new("lobby", 1.5, 64.0, -3.25, 90.0, 0.5));
        account.in_waiting_room = true;
        account
    }

    #[test]
    fn test_username_is_normalised() {
        assert_eq!(sample().username, "alice");
        assert_eq!(normalize_username("  BoB "), "bob");
    }

    #[test]
    fn test_entry_mapping_is_lossless() {
        let columns = AccountColumns::default();
        let account = sample();
        let entry = account.to_entry(&columns);

        assert_eq!(entry.len(), columns.keys().len());
        assert_eq!(entry.get("in_wr"), Some("1"));
        assert_eq!(Account::from_entry(&entry, &columns).unwrap(), account);
    }

    #[test]
    fn test_custom_column_names() {
        let columns = AccountColumns {
            username: "player_name".into(),
            ..AccountColumns::default()
        };
        let entry = Entry::new().with("player_name", "Carol").with("password", "h");

        let account = Account::from_entry(&entry, &columns).unwrap();
        assert_eq!(account.username, "carol");
        assert_eq!(account.last_active, None);
        assert_eq!(account.location, None);
        assert!(!account.in_waiting_room);
    }

    #[test]
    fn test_malformed_entries_rejected() {
        let columns = AccountColumns::default();

        let no_username = Entry::new().with("password", "h");
        assert!(Account::from_entry(&no_username, &columns).is_err());

        let no_password = Entry::new().with("username", "dave");
        assert!(Account::from_entry(&no_password, &columns).is_err());

        let bad_time = Entry::new()
            .with("username", "dave")
            .with("password", "h")
            .with("last_active", "yesterday");
        assert!(matches!(
            Account::from_entry(&bad_time, &columns),
            Err(LogItError::Validation(_))
        ));
    }

    #[test]
    fn test_integer_looking_reals_parse() {
        let columns = AccountColumns::default();
        let entry = Entry::new()
            .with("username", "erin")
            .with("password", "h")
            .with("location_world", "nether")
            .with("location_x", "0")
            .with("location_y", "12");

        let location = Account::from_entry(&entry, &columns)
            .unwrap()
            .location
            .unwrap();
        assert_eq!(location.x, 0.0);
        assert_eq!(location.y, 12.0);
        assert_eq!(location.yaw, 0.0);
    }
}
