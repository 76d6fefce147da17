//! Password hashing
//!
//! Digest algorithms hash `password + salt` and encode the result as
//! lowercase hex. Argon2id produces a self-describing PHC string with the
//! salt embedded, so checking it never needs the stored salt.

use std::fmt;

use argon2::password_hash::{
    rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString,
};
use argon2::Argon2;
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::error::{LogItError, LogItResult};

/// Supported hashing algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashingAlgorithm {
    /// No hashing; for testing only
    Plain,
    Sha256,
    Sha384,
    Sha512,
    Argon2,
}

impl HashingAlgorithm {
    /// Parse a configuration name such as `sha-256`
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "plain" => Some(Self::Plain),
            "sha-256" | "sha256" => Some(Self::Sha256),
            "sha-384" | "sha384" => Some(Self::Sha384),
            "sha-512" | "sha512" => Some(Self::Sha512),
            "argon2" | "argon2id" => Some(Self::Argon2),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Sha256 => "sha-256",
            Self::Sha384 => "sha-384",
            Self::Sha512 => "sha-512",
            Self::Argon2 => "argon2",
        }
    }
}

impl fmt::Display for HashingAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Hashes and checks passwords with the configured algorithm
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    algorithm: HashingAlgorithm,
    use_salt: bool,
}

impl PasswordHasher {
    pub fn new(algorithm: HashingAlgorithm, use_salt: bool) -> Self {
        Self {
            algorithm,
            use_salt,
        }
    }

    pub fn algorithm(&self) -> HashingAlgorithm {
        self.algorithm
    }

    /// Whether salts are generated and used for new hashes
    pub fn use_salt(&self) -> bool {
        self.use_salt
    }

    /// Hash without a salt
    ///
    /// Argon2 still needs one, so a random salt is embedded in the result.
    pub fn hash(&self, password: &str) -> LogItResult<String> {
        match self.algorithm {
            HashingAlgorithm::Argon2 => argon2_hash(password, &SaltString::generate(&mut OsRng)),
            _ => Ok(self.digest(password, "")),
        }
    }

    /// Hash `password` with `salt`
    pub fn hash_salted(&self, password: &str, salt: &str) -> LogItResult<String> {
        match self.algorithm {
            HashingAlgorithm::Argon2 => {
                let salt = SaltString::from_b64(salt)
                    .map_err(|e| LogItError::Hashing(format!("Invalid salt: {}", e)))?;
                argon2_hash(password, &salt)
            }
            _ => Ok(self.digest(password, salt)),
        }
    }

    /// Check a password against an unsalted hash
    pub fn check_password(&self, password: &str, hashed: &str) -> bool {
        match self.algorithm {
            HashingAlgorithm::Argon2 => argon2_verify(password, hashed),
            _ => self.digest(password, "") == hashed,
        }
    }

    /// Check a password against a hash created with `salt`
    ///
    /// For digest algorithms the salt is only applied when salting is enabled
    /// on this hasher, regardless of whether the hash was created with one.
    pub fn check_password_salted(&self, password: &str, hashed: &str, salt: &str) -> bool {
        match self.algorithm {
            HashingAlgorithm::Argon2 => argon2_verify(password, hashed),
            _ if self.use_salt => self.digest(password, salt) == hashed,
            _ => self.digest(password, "") == hashed,
        }
    }

    fn digest(&self, password: &str, salt: &str) -> String {
        let input = format!("{}{}", password, salt);
        match self.algorithm {
            HashingAlgorithm::Plain => password.to_string(),
            HashingAlgorithm::Sha256 => hex::encode(Sha256::digest(input.as_bytes())),
            HashingAlgorithm::Sha384 => hex::encode(Sha384::digest(input.as_bytes())),
            HashingAlgorithm::Sha512 => hex::encode(Sha512::digest(input.as_bytes())),
            // Argon2 never reaches the digest path
            HashingAlgorithm::Argon2 => String::new(),
        }
    }
}

fn argon2_hash(password: &str, salt: &SaltString) -> LogItResult<String> {
    Argon2::default()
        .hash_password(password.as_bytes(), salt)
        .map(|hash| hash.to_string())
        .map_err(|e| LogItError::Hashing(format!("Argon2 hashing failed: {}", e)))
}

fn argon2_verify(password: &str, hashed: &str) -> bool {
    match PasswordHash::new(hashed) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        assert_eq!(HashingAlgorithm::parse("SHA-256"), Some(HashingAlgorithm::Sha256));
        assert_eq!(HashingAlgorithm::parse("sha-512"), Some(HashingAlgorithm::Sha512));
        assert_eq!(HashingAlgorithm::parse("argon2"), Some(HashingAlgorithm::Argon2));
        assert_eq!(HashingAlgorithm::parse("whirlpool"), None);
    }

    #[test]
    fn test_sha256_known_digest() {
        let hasher = PasswordHasher::new(HashingAlgorithm::Sha256, false);
        assert_eq!(
            hasher.hash("abc").unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_salted_check() {
        let hasher = PasswordHasher::new(HashingAlgorithm::Sha512, true);
        let hashed = hasher.hash_salted("p1", "NaCl").unwrap();

        assert!(hasher.check_password_salted("p1", &hashed, "NaCl"));
        assert!(!hasher.check_password_salted("p1", &hashed, "KCl"));
        assert!(!hasher.check_password_salted("wrong", &hashed, "NaCl"));
    }

    #[test]
    fn test_salt_setting_is_read_at_check_time() {
        // A hash created with a salt no longer verifies once salting is
        // switched off, and an unsalted hash verifies with any salt.
        let salted = PasswordHasher::new(HashingAlgorithm::Sha256, true);
        let unsalted = PasswordHasher::new(HashingAlgorithm::Sha256, false);

        let with_salt = salted.hash_salted("p1", "NaCl").unwrap();
        assert!(!unsalted.check_password_salted("p1", &with_salt, "NaCl"));

        let without_salt = unsalted.hash("p1").unwrap();
        assert!(unsalted.check_password_salted("p1", &without_salt, "anything"));
    }

    #[test]
    fn test_argon2_ignores_salt_setting() {
        let hasher = PasswordHasher::new(HashingAlgorithm::Argon2, true);
        let hashed = hasher.hash_salted("p1", "abcdefghijklmnopqrst").unwrap();
        assert!(hashed.starts_with("$argon2"));

        let unsalted = PasswordHasher::new(HashingAlgorithm::Argon2, false);
        assert!(unsalted.check_password_salted("p1", &hashed, "other"));
        assert!(unsalted.check_password("p1", &hashed));
        assert!(!unsalted.check_password("p2", &hashed));
        assert!(!unsalted.check_password("p1", "not a phc string"));
    }

    #[test]
    fn test_plain_ignores_salt() {
        let hasher = PasswordHasher::new(HashingAlgorithm::Plain, true);
        assert_eq!(hasher.hash_salted("secret", "NaCl").unwrap(), "secret");
        assert!(hasher.check_password_salted("secret", "secret", "NaCl"));
    }
}
