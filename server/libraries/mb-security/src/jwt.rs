//
// Copyright 2025 Tabs Data Inc.
//

use getset::{CopyGetters, Getters};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Validation, decode, encode};
use mb_common::id::Id;
use mb_error::mb_error;
use serde::{Deserialize, Serialize};

/// JWT signing and validation material, derived from the instance secret.
#[derive(Clone)]
pub struct JwtKeys {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    access_expiration_seconds: i64,
    refresh_expiration_seconds: i64,
}

impl JwtKeys {
    pub fn new(
        secret: &str,
        access_expiration_seconds: i64,
        refresh_expiration_seconds: i64,
    ) -> Self {
        let encoding_key = EncodingKey::from_secret(secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(secret.as_bytes());
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 5;
        validation.set_required_spec_claims(&["jti", "exp"]);

        Self {
            encoding_key,
            decoding_key,
            validation,
            access_expiration_seconds,
            refresh_expiration_seconds,
        }
    }

    pub fn access_expiration_seconds(&self) -> i64 {
        self.access_expiration_seconds
    }

    pub fn refresh_expiration_seconds(&self) -> i64 {
        self.refresh_expiration_seconds
    }
}

/// Whether a token grants API access or only a refresh.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenUse {
    Access,
    Refresh,
}

/// JWT Token Claims, serialized on login and deserialized on request.
///
/// `jti` is the session id; `sub` is the user id. Refresh tokens additionally
/// carry the rotation id (`rid`) matched against the session row.
#[derive(Clone, Debug, Serialize, Deserialize, Getters, CopyGetters)]
pub struct TokenClaims {
    #[getset(get_copy = "pub")]
    jti: Id,
    #[getset(get_copy = "pub")]
    sub: Id,
    #[getset(get_copy = "pub")]
    exp: i64,
    #[getset(get_copy = "pub")]
    us: TokenUse,
    #[getset(get = "pub")]
    #[serde(skip_serializing_if = "Option::is_none")]
    rid: Option<Id>,
}

impl TokenClaims {
    pub fn access(session_id: Id, user_id: Id, exp: i64) -> Self {
        Self {
            jti: session_id,
            sub: user_id,
            exp,
            us: TokenUse::Access,
            rid: None,
        }
    }

    pub fn refresh(session_id: Id, user_id: Id, exp: i64, refresh_id: Id) -> Self {
        Self {
            jti: session_id,
            sub: user_id,
            exp,
            us: TokenUse::Refresh,
            rid: Some(refresh_id),
        }
    }
}

#[mb_error]
pub enum JwtError {
    #[error("Could not decode JWT token: {0}")]
    JwtDecodingError(jsonwebtoken::errors::Error) = 4000,
    #[error("Could not encode JWT token: {0}")]
    JwtEncodingError(jsonwebtoken::errors::Error) = 7000,
}

pub fn encode_token(keys: &JwtKeys, token: &TokenClaims) -> Result<String, JwtError> {
    encode(&jsonwebtoken::Header::default(), token, &keys.encoding_key)
        .map_err(JwtError::JwtEncodingError)
}

pub fn decode_token(keys: &JwtKeys, token: &str) -> Result<TokenClaims, JwtError> {
    decode::<TokenClaims>(token, &keys.decoding_key, &keys.validation)
        .map_err(JwtError::JwtDecodingError)
        .map(|tt| tt.claims)
}
