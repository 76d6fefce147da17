//! Units, keys and entries
//!
//! Values travel as strings so an entry read from one backend can be written
//! to any other without conversion. Backends decide how a [`KeyType`] maps
//! onto their own column types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Declared type of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    /// Up to 255 characters
    ShortText,
    /// Unbounded text
    LongText,
    Integer,
    Real,
    /// Stored as 0/1
    Boolean,
}

impl KeyType {
    /// Stable name used in the CSV header
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ShortText => "short_text",
            Self::LongText => "long_text",
            Self::Integer => "integer",
            Self::Real => "real",
            Self::Boolean => "boolean",
        }
    }

    /// Parse the name produced by [`KeyType::as_str`]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "short_text" => Some(Self::ShortText),
            "long_text" => Some(Self::LongText),
            "integer" => Some(Self::Integer),
            "real" => Some(Self::Real),
            "boolean" => Some(Self::Boolean),
            _ => None,
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, typed column of a unit
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key {
    pub name: String,
    pub key_type: KeyType,
}

impl Key {
    pub fn new(name: impl Into<String>, key_type: KeyType) -> Self {
        Self {
            name: name.into(),
            key_type,
        }
    }
}

/// One row: an ordered mapping from key name to value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    values: Vec<(String, String)>,
}

impl Entry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`Entry::put`]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.put(key, value);
        self
    }

    /// Set a value, replacing an existing one in place
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.values.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.values.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.iter().any(|(k, _)| k == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Keep only the named keys, in the order given
    pub fn project(&self, keys: &[String]) -> Entry {
        let mut projected = Entry::new();
        for key in keys {
            if let Some(value) = self.get(key) {
                projected.put(key.clone(), value);
            }
        }
        projected
    }

    /// Whether every condition of the selector holds for this entry
    pub fn matches(&self, selector: &Selector) -> bool {
        selector
            .conditions()
            .iter()
            .all(|(key, value)| self.get(key).unwrap_or("") == value)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Entry {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut entry = Entry::new();
        for (k, v) in iter {
            entry.put(k, v);
        }
        entry
    }
}

/// Equality predicate over one or more keys, all of which must match
///
/// An empty selector matches every entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    conditions: Vec<(String, String)>,
}

impl Selector {
    /// Match entries whose `key` equals `value`
    pub fn eq(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            conditions: vec![(key.into(), value.into())],
        }
    }

    /// Add another condition
    pub fn and(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.conditions.push((key.into(), value.into()));
        self
    }

    pub fn conditions(&self) -> &[(String, String)] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_replaces_in_place() {
        let mut entry = Entry::new().with("username", "alice").with("email", "");
        entry.put("email", "alice@example.com");

        let keys: Vec<_> = entry.keys().collect();
        assert_eq!(keys, vec!["username", "email"]);
        assert_eq!(entry.get("email"), Some("alice@example.com"));
        assert_eq!(entry.len(), 2);
    }

    #[test]
    fn test_project_keeps_requested_order() {
        let entry = Entry::new()
            .with("username", "bob")
            .with("salt", "abc")
            .with("password", "hash");

        let projected = entry.project(&["password".into(), "username".into(), "missing".into()]);
        let pairs: Vec<_> = projected.iter().collect();
        assert_eq!(pairs, vec![("password", "hash"), ("username", "bob")]);
    }

    #[test]
    fn test_selector_matching() {
        let entry = Entry::new().with("username", "bob").with("ip", "10.0.0.1");

        assert!(entry.matches(&Selector::default()));
        assert!(entry.matches(&Selector::eq("username", "bob")));
        assert!(entry.matches(&Selector::eq("username", "bob").and("ip", "10.0.0.1")));
        assert!(!entry.matches(&Selector::eq("username", "bob").and("ip", "10.0.0.2")));
        // Missing keys compare as empty
        assert!(entry.matches(&Selector::eq("email", "")));
    }

    #[test]
    fn test_key_type_names() {
        for key_type in [
            KeyType::ShortText,
            KeyType::LongText,
            KeyType::Integer,
            KeyType::Real,
            KeyType::Boolean,
        ] {
            assert_eq!(KeyType::parse(key_type.as_str()), Some(key_type));
        }
        assert_eq!(KeyType::parse("varchar"), None);
    }
}
