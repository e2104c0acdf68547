//
// Copyright 2025 Tabs Data Inc.
//

use crate::config::PasswordHashingConfig;
use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use mb_error::{MbError, mb_error};

#[mb_error]
pub enum Error {
    #[error("Password must be at least {0} characters")]
    PasswordLengthViolation(usize) = 0,
}

// Verifies the password hash.
pub fn verify_password(phc_str: &str, password: &str) -> bool {
    match PasswordHash::new(phc_str) {
        // the values encoded in the PHC string are used to configure the verifier
        Ok(parsed_hash) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok(),
        Err(_) => false,
    }
}

pub fn assert_password_policy(password: &str) -> Result<(), MbError> {
    const MIN_PASSWORD_LENGTH: usize = 8;
    if password.len() < MIN_PASSWORD_LENGTH {
        Err(Error::PasswordLengthViolation(MIN_PASSWORD_LENGTH))?
    }
    Ok(())
}

pub fn create_password_hash(
    password_hashing_config: &PasswordHashingConfig,
    password: &str,
) -> String {
    // creates a PHC string
    password_hashing_config
        .password_hasher()
        .hash_password(password.as_bytes(), &SaltString::generate(&mut OsRng))
        .unwrap()
        .to_string()
}
