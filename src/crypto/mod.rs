//! Cryptographic functions for LogIt
//!
//! Password hashing with a configurable digest or Argon2id, plus random
//! salt and password generation.

pub mod generate;
pub mod hashing;

pub use generate::{generate_password, generate_salt};
pub use hashing::{HashingAlgorithm, PasswordHasher};
