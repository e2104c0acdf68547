//
// Copyright 2025 Tabs Data Inc.
//

use mb_common::id::{self, Id};
use mb_common::time::UniqueUtc;
use mb_database::sql::DbPool;
use mb_error::{MbError, mb_error};
use mb_objects::types::token::ApplicationToken;
use mb_security::apptoken::{generate_app_token, hash_app_token};
use chrono::{DateTime, Utc};

#[mb_error]
pub enum TokenError {
    #[error("Application token not found")]
    TokenNotFound = 1000,
    #[error("A revoked token cannot be re-activated")]
    RevokedTokenReuse = 2000,
    #[error("Sql error: {0}")]
    Sql(#[from] sqlx::Error) = 7000,
}

/// Application tokens: long-lived bearer secrets for machine callers. The
/// plaintext secret leaves this service exactly once, at creation.
pub struct TokenService {
    db: DbPool,
}

impl TokenService {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        name: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(ApplicationToken, String), MbError> {
        let (secret, digest) = generate_app_token();
        let token = ApplicationToken::new(
            id::id(),
            name.to_string(),
            digest,
            expires_at,
            UniqueUtc::now_millis(),
        );
        sqlx::query(
            r#"
            INSERT INTO application_tokens
                (id, name, hash, is_active, expires_at, last_used_at, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(token.id())
        .bind(token.name())
        .bind(token.hash())
        .bind(token.is_active())
        .bind(token.expires_at())
        .bind(token.last_used_at())
        .bind(token.created_at())
        .bind(token.updated_at())
        .execute(self.db.writer())
        .await
        .map_err(TokenError::Sql)?;
        Ok((token, secret))
    }

    pub async fn get(&self, id: Id) -> Result<ApplicationToken, MbError> {
        let token: Option<ApplicationToken> =
            sqlx::query_as("SELECT * FROM application_tokens WHERE id = ?1")
                .bind(id)
                .fetch_optional(self.db.reader())
                .await
                .map_err(TokenError::Sql)?;
        Ok(token.ok_or(TokenError::TokenNotFound)?)
    }

    pub async fn list(&self) -> Result<Vec<ApplicationToken>, MbError> {
        let tokens = sqlx::query_as("SELECT * FROM application_tokens ORDER BY name")
            .fetch_all(self.db.reader())
            .await
            .map_err(TokenError::Sql)?;
        Ok(tokens)
    }

    /// Activates or revokes a token. A revoked token is never re-activated with
    /// the same hash; issue a new token instead.
    pub async fn set_active(&self, id: Id, is_active: bool) -> Result<ApplicationToken, MbError> {
        let token = self.get(id).await?;
        if is_active && !token.is_active() {
            Err(TokenError::RevokedTokenReuse)?;
        }
        sqlx::query("UPDATE application_tokens SET is_active = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(is_active)
            .bind(UniqueUtc::now_millis())
            .bind(id)
            .execute(self.db.writer())
            .await
            .map_err(TokenError::Sql)?;
        self.get(id).await
    }

    pub async fn delete(&self, id: Id) -> Result<(), MbError> {
        let deleted = sqlx::query("DELETE FROM application_tokens WHERE id = ?1")
            .bind(id)
            .execute(self.db.writer())
            .await
            .map_err(TokenError::Sql)?;
        if deleted.rows_affected() == 0 {
            Err(TokenError::TokenNotFound)?;
        }
        Ok(())
    }

    /// Replaces every token of the given name with a fresh one. Used for the
    /// server-owned worker token minted on each boot.
    pub async fn recycle(&self, name: &str) -> Result<(ApplicationToken, String), MbError> {
        sqlx::query("DELETE FROM application_tokens WHERE name = ?1")
            .bind(name)
            .execute(self.db.writer())
            .await
            .map_err(TokenError::Sql)?;
        self.create(name, None).await
    }

    /// Resolves a bearer secret to a usable token, stamping `last_used_at`.
    pub async fn verify(&self, secret: &str) -> Result<Option<ApplicationToken>, MbError> {
        let digest = hash_app_token(secret);
        let token: Option<ApplicationToken> =
            sqlx::query_as("SELECT * FROM application_tokens WHERE hash = ?1")
                .bind(&digest)
                .fetch_optional(self.db.reader())
                .await
                .map_err(TokenError::Sql)?;
        let now = UniqueUtc::now_millis();
        match token {
            Some(token) if token.is_usable(now) => {
                sqlx::query(
                    "UPDATE application_tokens SET last_used_at = ?1, updated_at = ?1 WHERE id = ?2",
                )
                .bind(now)
                .bind(token.id())
                .execute(self.db.writer())
                .await
                .map_err(TokenError::Sql)?;
                Ok(Some(token))
            }
            _ => Ok(None),
        }
    }
}
