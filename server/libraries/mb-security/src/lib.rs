//
// Copyright 2025 Tabs Data Inc.
//

pub mod apptoken;
pub mod config;
pub mod jwt;
pub mod password;

/// Email of the bootstrap admin user when none is given to `init`.
pub const DEFAULT_ADMIN_EMAIL: &str = "admin@localhost";

/// Length in bytes of a generated JWT secret.
pub const GENERATED_SECRET_BYTES: usize = 48;

/// Generates a random secret, base32hex encoded.
pub fn generate_secret() -> String {
    use rand::RngCore;

    let mut bytes = [0u8; GENERATED_SECRET_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    data_encoding::BASE32HEX_NOPAD.encode(&bytes)
}

#[cfg(test)]
mod tests {
    use super::generate_secret;

    #[test]
    fn test_generate_secret() {
        let a = generate_secret();
        let b = generate_secret();
        assert_ne!(a, b);
        assert!(a.len() > 64);
    }
}
