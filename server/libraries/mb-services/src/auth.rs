//
// Copyright 2025 Tabs Data Inc.
//

//! Identity: login sessions, JWT access/refresh pairs, bearer verification and
//! the bootstrap admin. Access tokens carry the session id, so revoking a
//! session invalidates tokens issued before the revocation; in-flight calls
//! already authorized complete.

use crate::users::UserService;
use chrono::{Duration, Utc};
use getset::Getters;
use mb_common::id::{self, Id};
use mb_common::time::UniqueUtc;
use mb_database::sql::DbPool;
use mb_error::{MbError, mb_error};
use mb_objects::types::session::Session;
use mb_objects::types::token::ApplicationToken;
use mb_objects::types::user::User;
use mb_security::apptoken;
use mb_security::jwt::{JwtKeys, TokenClaims, TokenUse, decode_token, encode_token};
use mb_security::password::verify_password;
use serde::Serialize;
use tracing::{info, warn};

#[mb_error]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials = 4000,
    #[error("Invalid or expired token")]
    InvalidToken = 4001,
    #[error("Session is revoked")]
    SessionRevoked = 4002,
    #[error("Account is deactivated")]
    AccountDeactivated = 4003,
    #[error("Instance is already initialized")]
    AlreadyInitialized = 2000,
    #[error("Session not found")]
    SessionNotFound = 1000,
    #[error("Sql error: {0}")]
    Sql(#[from] sqlx::Error) = 7000,
}

/// An authenticated principal, as resolved from a bearer value.
#[derive(Debug, Clone)]
pub enum Principal {
    User { user: User, session_id: Id },
    AppToken(ApplicationToken),
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        match self {
            Principal::User { user, .. } => user.is_admin(),
            // application tokens act as service principals
            Principal::AppToken(_) => true,
        }
    }

    pub fn id(&self) -> Id {
        match self {
            Principal::User { user, .. } => user.id(),
            Principal::AppToken(token) => token.id(),
        }
    }
}

/// The (access, refresh) pair returned on login and refresh.
#[derive(Debug, Clone, Serialize, Getters)]
#[getset(get = "pub")]
pub struct TokenPair {
    access_token: String,
    refresh_token: String,
    token_type: String,
    expires_in: i64,
}

pub struct AuthService {
    db: DbPool,
    keys: JwtKeys,
}

impl AuthService {
    pub fn new(db: DbPool, keys: JwtKeys) -> Self {
        Self { db, keys }
    }

    /// Creates the admin account once. A second call is a bootstrap conflict.
    pub async fn bootstrap(
        &self,
        users: &UserService,
        email: &str,
        password: &str,
    ) -> Result<User, MbError> {
        if users.any_admin().await? {
            Err(AuthError::AlreadyInitialized)?;
        }
        let user = users.create(email, password, true).await?;
        info!("Bootstrapped admin account '{}'", email);
        Ok(user)
    }

    /// Verifies credentials and opens a session.
    pub async fn login(&self, users: &UserService, email: &str, password: &str) -> Result<TokenPair, MbError> {
        let user = match users.find_by_email(email).await? {
            Some(user) => user,
            None => {
                // equalize the work factor between unknown users and bad passwords
                let _ = verify_password("$argon2id$v=19$m=19456,t=2,p=1$AAAAAAAA$AAAAAAAA", password);
                Err(AuthError::InvalidCredentials)?
            }
        };
        if !verify_password(user.password_hash(), password) {
            Err(AuthError::InvalidCredentials)?;
        }
        if !user.is_active() {
            Err(AuthError::AccountDeactivated)?;
        }

        let now = UniqueUtc::now_millis();
        let session = Session::new(
            id::id(),
            user.id(),
            id::id(),
            now + Duration::seconds(self.keys.access_expiration_seconds()),
            now + Duration::seconds(self.keys.refresh_expiration_seconds()),
            now,
        );
        sqlx::query(
            r#"
            INSERT INTO sessions
                (id, user_id, refresh_id, access_expires_at, refresh_expires_at, revoked_at, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(session.id())
        .bind(session.user_id())
        .bind(session.refresh_id())
        .bind(session.access_expires_at())
        .bind(session.refresh_expires_at())
        .bind(session.revoked_at())
        .bind(session.created_at())
        .bind(session.updated_at())
        .execute(self.db.writer())
        .await
        .map_err(AuthError::Sql)?;

        self.token_pair(&session)
    }

    /// Rotates the pair within the session: the previous refresh token becomes
    /// unusable the moment the new one is issued.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, MbError> {
        let claims =
            decode_token(&self.keys, refresh_token).map_err(|_| AuthError::InvalidToken)?;
        if claims.us() != TokenUse::Refresh {
            Err(AuthError::InvalidToken)?;
        }
        let session = self.session(claims.jti()).await?;
        if session.is_revoked() {
            Err(AuthError::SessionRevoked)?;
        }
        if claims.rid() != &Some(session.refresh_id()) {
            // a rotated-out refresh token came back: treat the session as stolen
            warn!("Stale refresh token for session {}, revoking", session.id());
            self.revoke_session(session.id()).await?;
            Err(AuthError::InvalidToken)?;
        }

        let now = UniqueUtc::now_millis();
        let refresh_id = id::id();
        let access_expires_at = now + Duration::seconds(self.keys.access_expiration_seconds());
        sqlx::query(
            "UPDATE sessions SET refresh_id = ?1, access_expires_at = ?2, updated_at = ?3 WHERE id = ?4",
        )
        .bind(refresh_id)
        .bind(access_expires_at)
        .bind(now)
        .bind(session.id())
        .execute(self.db.writer())
        .await
        .map_err(AuthError::Sql)?;

        self.token_pair(&self.session(session.id()).await?)
    }

    /// Revokes one session.
    pub async fn logout(&self, session_id: Id) -> Result<(), MbError> {
        self.revoke_session(session_id).await
    }

    /// Revokes every live session of a user. Takes effect for tokens issued
    /// before the revocation as soon as this commits.
    pub async fn revoke_user(&self, user_id: Id) -> Result<u64, MbError> {
        let updated = sqlx::query(
            "UPDATE sessions SET revoked_at = ?1, updated_at = ?1 WHERE user_id = ?2 AND revoked_at IS NULL",
        )
        .bind(UniqueUtc::now_millis())
        .bind(user_id)
        .execute(self.db.writer())
        .await
        .map_err(AuthError::Sql)?;
        Ok(updated.rows_affected())
    }

    /// Resolves a bearer value: an application token secret or a JWT access token.
    pub async fn verify_bearer(
        &self,
        users: &UserService,
        tokens: &crate::tokens::TokenService,
        bearer: &str,
    ) -> Result<Principal, MbError> {
        if apptoken::is_app_token(bearer) {
            let token = tokens
                .verify(bearer)
                .await?
                .ok_or(AuthError::InvalidToken)?;
            return Ok(Principal::AppToken(token));
        }

        let claims = decode_token(&self.keys, bearer).map_err(|_| AuthError::InvalidToken)?;
        if claims.us() != TokenUse::Access {
            Err(AuthError::InvalidToken)?;
        }
        let session = self.session(claims.jti()).await?;
        if session.is_revoked() {
            Err(AuthError::SessionRevoked)?;
        }
        let user = users.get(claims.sub()).await?;
        if !user.is_active() {
            Err(AuthError::AccountDeactivated)?;
        }
        Ok(Principal::User {
            user,
            session_id: session.id(),
        })
    }

    async fn session(&self, id: Id) -> Result<Session, MbError> {
        let session: Option<Session> = sqlx::query_as("SELECT * FROM sessions WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.reader())
            .await
            .map_err(AuthError::Sql)?;
        Ok(session.ok_or(AuthError::SessionNotFound)?)
    }

    async fn revoke_session(&self, session_id: Id) -> Result<(), MbError> {
        sqlx::query(
            "UPDATE sessions SET revoked_at = ?1, updated_at = ?1 WHERE id = ?2 AND revoked_at IS NULL",
        )
        .bind(UniqueUtc::now_millis())
        .bind(session_id)
        .execute(self.db.writer())
        .await
        .map_err(AuthError::Sql)?;
        Ok(())
    }

    fn token_pair(&self, session: &Session) -> Result<TokenPair, MbError> {
        let access = TokenClaims::access(
            session.id(),
            session.user_id(),
            session.access_expires_at().timestamp(),
        );
        let refresh = TokenClaims::refresh(
            session.id(),
            session.user_id(),
            session.refresh_expires_at().timestamp(),
            session.refresh_id(),
        );
        Ok(TokenPair {
            access_token: encode_token(&self.keys, &access)?,
            refresh_token: encode_token(&self.keys, &refresh)?,
            token_type: "bearer".to_string(),
            expires_in: (session.access_expires_at() - Utc::now()).num_seconds(),
        })
    }
}
