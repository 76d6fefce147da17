//! Random salts and passwords

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::error::{LogItError, LogItResult};

/// Length of generated salts
pub const SALT_LENGTH: usize = 20;

/// Random alphanumeric salt
///
/// Alphanumeric salts are valid for every hashing algorithm, including as
/// an Argon2 PHC salt.
pub fn generate_salt() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SALT_LENGTH)
        .map(char::from)
        .collect()
}

/// Random password of `length` characters drawn from `combination`
pub fn generate_password(length: usize, combination: &str) -> LogItResult<String> {
    let chars: Vec<char> = combination.chars().collect();
    if chars.is_empty() {
        return Err(LogItError::Validation(
            "Password character set is empty".into(),
        ));
    }

    let mut rng = rand::thread_rng();
    Ok((0..length)
        .map(|_| chars[rng.gen_range(0..chars.len())])
        .collect())
}
