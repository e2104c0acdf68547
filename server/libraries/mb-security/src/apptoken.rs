//
// Copyright 2025 Tabs Data Inc.
//

use data_encoding::{BASE32HEX_NOPAD, HEXLOWER};
use sha2::{Digest, Sha256};

/// Prefix of application token secrets, used to route bearer values to the
/// application token verifier instead of the JWT decoder.
pub const APP_TOKEN_PREFIX: &str = "mb_";

/// Entropy of a generated application token secret.
const APP_TOKEN_BYTES: usize = 25;

/// Generates an application token secret and its stored digest.
///
/// The secret is returned to the caller exactly once; only the digest is persisted.
pub fn generate_app_token() -> (String, String) {
    use rand::RngCore;

    let mut bytes = [0u8; APP_TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    let secret = format!(
        "{}{}",
        APP_TOKEN_PREFIX,
        BASE32HEX_NOPAD.encode(&bytes).to_lowercase()
    );
    let digest = hash_app_token(&secret);
    (secret, digest)
}

/// Digest of an application token secret as stored in the database.
pub fn hash_app_token(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    HEXLOWER.encode(&hasher.finalize())
}

/// Returns whether a bearer value looks like an application token secret.
pub fn is_app_token(bearer: &str) -> bool {
    bearer.starts_with(APP_TOKEN_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_app_token() {
        let (secret, digest) = generate_app_token();
        assert!(secret.starts_with(APP_TOKEN_PREFIX));
        assert!(is_app_token(&secret));
        assert_eq!(digest, hash_app_token(&secret));
        assert_eq!(digest.len(), 64);
    }

    #[test]
    fn test_tokens_are_unique() {
        let (a, _) = generate_app_token();
        let (b, _) = generate_app_token();
        assert_ne!(a, b);
    }

    #[test]
    fn test_jwt_is_not_app_token() {
        assert!(!is_app_token("eyJhbGciOiJIUzI1NiJ9.x.y"));
    }
}
