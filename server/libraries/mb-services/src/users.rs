//
// Copyright 2025 Tabs Data Inc.
//

use mb_common::id::{self, Id};
use mb_common::time::UniqueUtc;
use mb_database::sql::DbPool;
use mb_error::{MbError, mb_error};
use mb_objects::types::user::User;
use mb_security::config::PasswordHashingConfig;
use mb_security::password::{assert_password_policy, create_password_hash};

#[mb_error]
pub enum UserError {
    #[error("User not found")]
    UserNotFound = 1000,
    #[error("Email already registered: {0}")]
    EmailTaken(String) = 2000,
    #[error("Sql error: {0}")]
    Sql(#[from] sqlx::Error) = 7000,
}

/// User account management. Users are deactivated, never deleted, so weak
/// `owner_id` references on records stay resolvable.
pub struct UserService {
    db: DbPool,
    password_config: PasswordHashingConfig,
}

impl UserService {
    pub fn new(db: DbPool) -> Self {
        Self {
            db,
            password_config: PasswordHashingConfig::default(),
        }
    }

    pub async fn create(
        &self,
        email: &str,
        password: &str,
        is_admin: bool,
    ) -> Result<User, MbError> {
        assert_password_policy(password)?;
        if self.find_by_email(email).await?.is_some() {
            Err(UserError::EmailTaken(email.to_string()))?;
        }
        let user = User::new(
            id::id(),
            email.to_string(),
            create_password_hash(&self.password_config, password),
            is_admin,
            UniqueUtc::now_millis(),
        );
        sqlx::query(
            r#"
            INSERT INTO users (id, email, password_hash, is_admin, is_active, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(user.id())
        .bind(user.email())
        .bind(user.password_hash())
        .bind(user.is_admin())
        .bind(user.is_active())
        .bind(user.created_at())
        .bind(user.updated_at())
        .execute(self.db.writer())
        .await
        .map_err(UserError::Sql)?;
        Ok(user)
    }

    pub async fn get(&self, id: Id) -> Result<User, MbError> {
        let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.reader())
            .await
            .map_err(UserError::Sql)?;
        Ok(user.ok_or(UserError::UserNotFound)?)
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>, MbError> {
        let user = sqlx::query_as("SELECT * FROM users WHERE email = ?1")
            .bind(email)
            .fetch_optional(self.db.reader())
            .await
            .map_err(UserError::Sql)?;
        Ok(user)
    }

    pub async fn list(&self) -> Result<Vec<User>, MbError> {
        let users = sqlx::query_as("SELECT * FROM users ORDER BY email")
            .fetch_all(self.db.reader())
            .await
            .map_err(UserError::Sql)?;
        Ok(users)
    }

    /// Activates or deactivates an account. Deactivation leaves owned records in
    /// place; the user simply cannot authenticate anymore.
    pub async fn set_active(&self, id: Id, is_active: bool) -> Result<User, MbError> {
        let updated = sqlx::query("UPDATE users SET is_active = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(is_active)
            .bind(UniqueUtc::now_millis())
            .bind(id)
            .execute(self.db.writer())
            .await
            .map_err(UserError::Sql)?;
        if updated.rows_affected() == 0 {
            Err(UserError::UserNotFound)?;
        }
        self.get(id).await
    }

    /// Whether any admin exists, i.e. whether `init` has run.
    pub async fn any_admin(&self) -> Result<bool, MbError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE is_admin = 1")
            .fetch_one(self.db.reader())
            .await
            .map_err(UserError::Sql)?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn service() -> UserService {
        UserService::new(mb_database::test_utils::db().await.unwrap())
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let users = service().await;
        let user = users.create("a@x.dev", "s3cret-pass", true).await.unwrap();
        assert!(user.is_admin());
        assert!(user.is_active());
        assert!(user.password_hash().starts_with("$argon2id$"));

        let found = users.find_by_email("a@x.dev").await.unwrap().unwrap();
        assert_eq!(found.id(), user.id());
        assert!(users.any_admin().await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_email_is_conflict() {
        let users = service().await;
        users.create("a@x.dev", "s3cret-pass", false).await.unwrap();
        let err = users.create("a@x.dev", "s3cret-pass", false).await.unwrap_err();
        assert!(matches!(
            err.domain_err::<UserError>(),
            UserError::EmailTaken(_)
        ));
    }

    #[tokio::test]
    async fn test_password_policy_enforced() {
        let users = service().await;
        assert!(users.create("a@x.dev", "short", false).await.is_err());
    }

    #[tokio::test]
    async fn test_deactivation() {
        let users = service().await;
        let user = users.create("a@x.dev", "s3cret-pass", false).await.unwrap();
        let user = users.set_active(user.id(), false).await.unwrap();
        assert!(!user.is_active());
    }
}
