//
// Copyright 2025 Tabs Data Inc.
//

//! The counter store: process-wide counters enforcing concurrency caps.
//!
//! Both the execution engine and the scheduler reserve slots here; it is the
//! single authority for concurrency accounting. Tokens carry a wall-clock
//! deadline and expired tokens are swept lazily on access, so a leaked token
//! can not hold a slot forever.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use getset::{CopyGetters, Getters};
use mb_common::id::{self, Id};
use mb_common::time::UniqueUtc;
use mb_error::{MbError, mb_error};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

#[mb_error]
pub enum CounterError {
    #[error("Released token {0} is not held")]
    ReleaseUnknownToken(Id) = 2000,
    #[error("Sql error: {0}")]
    Sql(#[from] sqlx::Error) = 7000,
}

/// Proof of an acquired slot. Exactly one release consumes it; releasing it twice
/// is reported and ignored by callers.
#[derive(Debug, Clone, Getters, CopyGetters)]
pub struct CounterToken {
    #[getset(get_copy = "pub")]
    id: Id,
    #[getset(get = "pub")]
    key: String,
    #[getset(get_copy = "pub")]
    deadline: DateTime<Utc>,
}

/// Backend-neutral counter contract. Callers never branch on the backend.
#[async_trait]
pub trait CounterBackend: Send + Sync {
    /// Acquires a slot under `key` unless the live count would exceed `cap`.
    async fn try_acquire(
        &self,
        key: &str,
        cap: u64,
        ttl: Duration,
    ) -> Result<Option<CounterToken>, MbError>;

    /// Releases an acquired slot. Double release is a logical no-op surfaced as
    /// [`CounterError::ReleaseUnknownToken`].
    async fn release(&self, token: &CounterToken) -> Result<(), MbError>;

    /// Live count under `key`.
    async fn count(&self, key: &str) -> Result<u64, MbError>;

    /// Acquires every `(key, cap)` slot or none of them.
    async fn try_acquire_many(
        &self,
        requests: &[(String, u64)],
        ttl: Duration,
    ) -> Result<Option<Vec<CounterToken>>, MbError> {
        let mut acquired = Vec::with_capacity(requests.len());
        for (key, cap) in requests {
            match self.try_acquire(key, *cap, ttl).await? {
                Some(token) => acquired.push(token),
                None => {
                    for token in &acquired {
                        let _ = self.release(token).await;
                    }
                    return Ok(None);
                }
            }
        }
        Ok(Some(acquired))
    }
}

/// In-process counter backend for single-node deployments.
#[derive(Default)]
pub struct MemoryCounterBackend {
    held: Mutex<HashMap<String, Vec<(Id, DateTime<Utc>)>>>,
}

impl MemoryCounterBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn sweep(entries: &mut Vec<(Id, DateTime<Utc>)>, now: DateTime<Utc>) {
        entries.retain(|(_, deadline)| *deadline > now);
    }
}

#[async_trait]
impl CounterBackend for MemoryCounterBackend {
    async fn try_acquire(
        &self,
        key: &str,
        cap: u64,
        ttl: Duration,
    ) -> Result<Option<CounterToken>, MbError> {
        let now = UniqueUtc::now_millis();
        let mut held = self.held.lock().unwrap();
        let entries = held.entry(key.to_string()).or_default();
        Self::sweep(entries, now);
        if entries.len() as u64 >= cap {
            return Ok(None);
        }
        let token = CounterToken {
            id: id::id(),
            key: key.to_string(),
            deadline: now + ttl,
        };
        entries.push((token.id, token.deadline));
        Ok(Some(token))
    }

    async fn release(&self, token: &CounterToken) -> Result<(), MbError> {
        let mut held = self.held.lock().unwrap();
        let entries = held.entry(token.key().clone()).or_default();
        let before = entries.len();
        entries.retain(|(id, _)| *id != token.id());
        if entries.len() == before {
            Err(CounterError::ReleaseUnknownToken(token.id()))?;
        }
        Ok(())
    }

    async fn count(&self, key: &str) -> Result<u64, MbError> {
        let now = UniqueUtc::now_millis();
        let mut held = self.held.lock().unwrap();
        let entries = held.entry(key.to_string()).or_default();
        Self::sweep(entries, now);
        Ok(entries.len() as u64)
    }
}

/// Shared counter backend over a SQLite file, usable across processes.
pub struct SqliteCounterBackend {
    pool: Pool<Sqlite>,
}

impl SqliteCounterBackend {
    pub async fn new(store_file: &Path) -> Result<Self, MbError> {
        let options = SqliteConnectOptions::new()
            .filename(store_file)
            .create_if_missing(true)
            .busy_timeout(std::time::Duration::from_secs(10))
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(CounterError::Sql)?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS counters
            (
                token_id   TEXT PRIMARY KEY,
                key        TEXT      NOT NULL,
                expires_at TIMESTAMP NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(CounterError::Sql)?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl CounterBackend for SqliteCounterBackend {
    async fn try_acquire(
        &self,
        key: &str,
        cap: u64,
        ttl: Duration,
    ) -> Result<Option<CounterToken>, MbError> {
        let now = UniqueUtc::now_millis();
        let mut tx = self.pool.begin().await.map_err(CounterError::Sql)?;
        sqlx::query("DELETE FROM counters WHERE expires_at <= ?1")
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(CounterError::Sql)?;
        let (live,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM counters WHERE key = ?1")
            .bind(key)
            .fetch_one(&mut *tx)
            .await
            .map_err(CounterError::Sql)?;
        if live as u64 >= cap {
            return Ok(None);
        }
        let token = CounterToken {
            id: id::id(),
            key: key.to_string(),
            deadline: now + ttl,
        };
        sqlx::query("INSERT INTO counters (token_id, key, expires_at) VALUES (?1, ?2, ?3)")
            .bind(token.id())
            .bind(token.key())
            .bind(token.deadline())
            .execute(&mut *tx)
            .await
            .map_err(CounterError::Sql)?;
        tx.commit().await.map_err(CounterError::Sql)?;
        Ok(Some(token))
    }

    async fn release(&self, token: &CounterToken) -> Result<(), MbError> {
        let deleted = sqlx::query("DELETE FROM counters WHERE token_id = ?1")
            .bind(token.id())
            .execute(&self.pool)
            .await
            .map_err(CounterError::Sql)?;
        if deleted.rows_affected() == 0 {
            Err(CounterError::ReleaseUnknownToken(token.id()))?;
        }
        Ok(())
    }

    async fn count(&self, key: &str) -> Result<u64, MbError> {
        let now = UniqueUtc::now_millis();
        sqlx::query("DELETE FROM counters WHERE expires_at <= ?1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(CounterError::Sql)?;
        let (live,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM counters WHERE key = ?1")
            .bind(key)
            .fetch_one(&self.pool)
            .await
            .map_err(CounterError::Sql)?;
        Ok(live as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testdir::testdir;

    fn ttl() -> Duration {
        Duration::seconds(60)
    }

    async fn check_backend(backend: &dyn CounterBackend) {
        // cap enforcement
        let t1 = backend.try_acquire("k", 2, ttl()).await.unwrap().unwrap();
        let t2 = backend.try_acquire("k", 2, ttl()).await.unwrap().unwrap();
        assert!(backend.try_acquire("k", 2, ttl()).await.unwrap().is_none());
        assert_eq!(backend.count("k").await.unwrap(), 2);

        // independent keys
        assert!(backend.try_acquire("other", 1, ttl()).await.unwrap().is_some());

        // release frees a slot
        backend.release(&t1).await.unwrap();
        assert_eq!(backend.count("k").await.unwrap(), 1);
        assert!(backend.try_acquire("k", 2, ttl()).await.unwrap().is_some());

        // double release reports an ignorable error
        let err = backend.release(&t1).await.unwrap_err();
        assert!(matches!(
            err.domain_err::<CounterError>(),
            CounterError::ReleaseUnknownToken(_)
        ));

        backend.release(&t2).await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_backend() {
        check_backend(&MemoryCounterBackend::new()).await;
    }

    #[tokio::test]
    async fn test_sqlite_backend() {
        let backend = SqliteCounterBackend::new(&testdir!().join("counters.db"))
            .await
            .unwrap();
        check_backend(&backend).await;
    }

    #[tokio::test]
    async fn test_expired_tokens_are_swept() {
        let backend = MemoryCounterBackend::new();
        let _expired = backend
            .try_acquire("k", 1, Duration::milliseconds(-1))
            .await
            .unwrap()
            .unwrap();
        // the expired token no longer holds the slot
        assert_eq!(backend.count("k").await.unwrap(), 0);
        assert!(backend.try_acquire("k", 1, ttl()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_acquire_many_all_or_nothing() {
        let backend = MemoryCounterBackend::new();
        let _held = backend.try_acquire("b", 1, ttl()).await.unwrap().unwrap();

        let refused = backend
            .try_acquire_many(
                &[("a".to_string(), 1), ("b".to_string(), 1)],
                ttl(),
            )
            .await
            .unwrap();
        assert!(refused.is_none());
        // the tentative slot under "a" was rolled back
        assert_eq!(backend.count("a").await.unwrap(), 0);

        let granted = backend
            .try_acquire_many(&[("a".to_string(), 1), ("c".to_string(), 1)], ttl())
            .await
            .unwrap();
        assert_eq!(granted.unwrap().len(), 2);
    }
}
