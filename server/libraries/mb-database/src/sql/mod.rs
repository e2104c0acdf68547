//
// Copyright 2025 Tabs Data Inc.
//

use derive_builder::Builder;
use getset::{CopyGetters, Getters};
use mb_error::mb_error;
use serde::{Deserialize, Serialize};
use sqlx::migrate::{MigrateError, Migrator};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{ConnectOptions, Error, FromRow, Pool, Sqlite, Transaction};
use std::time::Duration;
use tracing::log::LevelFilter;

const SLOW_QUERIES_THRESHOLD: u64 = 5000;
const PRAGMA_TEMP_STORE: (&str, &str) = ("temp_store", "MEMORY");

/// Configuration for a SQLite database.
#[derive(Debug, Clone, Serialize, Deserialize, Builder, Getters, CopyGetters)]
#[builder(default)]
#[getset(get_copy = "pub")]
pub struct SqliteConfig {
    /// The Sqlite URI, required.
    #[getset(skip)]
    #[getset(get = "pub")]
    #[builder(setter(into))]
    url: Option<String>,
    /// The minimum number of database connections, defaults to `1`.
    min_connections: u32,
    /// The maximum number of database connections, defaults to `10`.
    max_connections: u32,
    /// The maximum time to wait for a database connection to be acquired, defaults to `30 seconds`.
    #[getset(skip)]
    acquire_timeout: u64,
    /// The maximum lifetime of a database connection, defaults to `60 minutes`.
    #[getset(skip)]
    max_lifetime: u64,
    /// The maximum time a database connection can be idle, defaults to `60 seconds`.
    #[getset(skip)]
    idle_timeout: u64,
    /// Whether to test the connection before acquiring it, defaults to `true`.
    test_before_acquire: bool,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        SqliteConfig {
            url: None,
            min_connections: 1,
            max_connections: 10,
            acquire_timeout: 30,
            max_lifetime: 60 * 60,
            idle_timeout: 60,
            test_before_acquire: true,
        }
    }
}

impl SqliteConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout)
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime)
    }

    /// Pool options for the single-writer pool. SQLite serializes writers, so the
    /// pool holds exactly one connection.
    pub fn rw_pool_options(&self) -> SqlitePoolOptions {
        SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .acquire_timeout(self.acquire_timeout())
            .max_lifetime(self.max_lifetime())
            .idle_timeout(self.idle_timeout())
            .test_before_acquire(self.test_before_acquire)
    }

    /// Pool options for the read-only pool.
    pub fn ro_pool_options(&self) -> SqlitePoolOptions {
        SqlitePoolOptions::new()
            .min_connections(self.min_connections)
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout())
            .max_lifetime(self.max_lifetime())
            .idle_timeout(self.idle_timeout())
            .test_before_acquire(self.test_before_acquire)
    }
}

/// Builds a `?N,?N+1,...` bindings literal for IN clauses.
pub fn create_bindings_literal(offset: usize, bindings: usize) -> String {
    let mut s = String::with_capacity(bindings * 5);
    for i in offset + 1..=offset + bindings {
        //SQL uses base 1
        s.push('?');
        s.push_str(&i.to_string());
        if i < offset + bindings {
            s.push(',');
        }
    }
    s
}

/// A database schema. Alias for Sqlx's [`Migrator`].
pub type DbSchema = Migrator;

#[mb_error]
pub enum DbError {
    #[error("Database location is missing in the given configuration")]
    MissingDatabaseLocation = 7000,
    #[error("Failed to connect to the database: {0}")]
    FailedToConnectToDatabase(#[source] Error) = 7001,
    #[error("Failed to create or update the database schema: {0}")]
    FailedToCreateOrUpdateDatabaseSchema(#[source] MigrateError) = 7002,
    #[error("Sql error: {0}")]
    SqlError(#[source] Error) = 7003,
    #[error("Failed to create database directory {0}: {1}")]
    FailedToCreateDatabaseDir(String, #[source] std::io::Error) = 7004,
}

fn remove_leading_file_protocol(url: &str) -> String {
    url.strip_prefix("file://").unwrap_or(url).to_string()
}

/// Sqlite database connection provider using Sqlx.
///
/// Databases are automatically created and their schema is updated if necessary
/// when the connection is created.
pub struct Db {
    schema: &'static DbSchema,
}

impl Db {
    /// Returns a database connection provider for a database with the given schema.
    pub fn schema(schema: &'static DbSchema) -> Self {
        Db { schema }
    }

    fn db_location_path(config: &SqliteConfig) -> Result<String, DbError> {
        let db_url = config
            .url()
            .as_ref()
            .ok_or(DbError::MissingDatabaseLocation)?
            .to_string();

        let db_url = remove_leading_file_protocol(&db_url);

        if let Some(dir) = std::path::Path::new(&db_url).parent()
            && !dir.as_os_str().is_empty()
            && !dir.exists()
        {
            std::fs::create_dir_all(dir).map_err(|err| {
                DbError::FailedToCreateDatabaseDir(dir.to_string_lossy().to_string(), err)
            })?;
        }
        Ok(db_url)
    }

    async fn connect(
        &self,
        config: &SqliteConfig,
        read_only: bool,
    ) -> Result<Pool<Sqlite>, DbError> {
        let db_location = Self::db_location_path(config)?;

        let pool_options = if read_only {
            config.ro_pool_options()
        } else {
            config.rw_pool_options()
        };

        let db_options = SqliteConnectOptions::new()
            .filename(&db_location)
            .create_if_missing(!read_only)
            .busy_timeout(Duration::from_secs(10))
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .read_only(read_only)
            .log_slow_statements(
                LevelFilter::Warn,
                Duration::from_millis(SLOW_QUERIES_THRESHOLD),
            )
            .log_statements(LevelFilter::Trace)
            .pragma(PRAGMA_TEMP_STORE.0, PRAGMA_TEMP_STORE.1);

        let pool = pool_options
            .connect_with(db_options)
            .await
            .map_err(DbError::FailedToConnectToDatabase)?;
        if !read_only {
            self.schema
                .run(&pool)
                .await
                .map_err(DbError::FailedToCreateOrUpdateDatabaseSchema)?;
        }
        Ok(pool)
    }

    /// Connects to the database specified in the given configuration, if the database does not
    /// exist it creates it, if the schema is out of date, it updates it.
    pub async fn rw_pool(&self, config: &SqliteConfig) -> Result<Pool<Sqlite>, DbError> {
        Self::connect(self, config, false).await
    }

    /// Connects to the database specified in the given configuration, if the database does not
    /// exist it fails.
    pub async fn ro_pool(&self, config: &SqliteConfig) -> Result<Pool<Sqlite>, DbError> {
        Self::connect(self, config, true).await
    }
}

/// Specialized Sqlx Sqlite pool pair, one single-connection pool for read-write
/// operations and one multi-connection pool for read-only operations.
#[derive(Debug, Clone)]
pub struct DbPool {
    ro_pool: Pool<Sqlite>,
    rw_pool: Pool<Sqlite>,
}

impl DbPool {
    /// Creates a new [`DbPool`] with the given configuration.
    ///
    /// The schema is created or updated to match the given [`DbSchema`].
    pub async fn new(config: &SqliteConfig, schema: &'static DbSchema) -> Result<Self, DbError> {
        let rw_pool = Db::schema(schema).rw_pool(config).await?;
        let ro_pool = Db::schema(schema).ro_pool(config).await?;
        Ok(Self { ro_pool, rw_pool })
    }

    /// The read-only pool, for queries.
    pub fn reader(&self) -> &Pool<Sqlite> {
        &self.ro_pool
    }

    /// The read-write pool, for standalone statements.
    pub fn writer(&self) -> &Pool<Sqlite> {
        &self.rw_pool
    }

    /// Acquires a read-only connection.
    pub async fn acquire(&self) -> Result<PoolConnection<Sqlite>, Error> {
        self.ro_pool.acquire().await
    }

    /// Begins a read-write transaction.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, Error> {
        self.rw_pool.begin().await
    }

    /// Returns if the pool is closed.
    pub fn is_closed(&self) -> bool {
        self.ro_pool.is_closed() && self.rw_pool.is_closed()
    }
}

impl From<&DbPool> for DbPool {
    fn from(db_pool: &DbPool) -> Self {
        db_pool.clone()
    }
}

/// Trait for types that can be fetched from a database row.
pub trait DbData: for<'a> FromRow<'a, SqliteRow> + Send + Unpin {}

#[cfg(test)]
mod tests {
    use super::*;
    use testdir::testdir;

    #[test]
    fn test_bindings_literal() {
        assert_eq!(create_bindings_literal(0, 3), "?1,?2,?3");
        assert_eq!(create_bindings_literal(2, 2), "?3,?4");
    }

    #[test]
    fn test_default_config() {
        let config = SqliteConfig::default();
        assert_eq!(config.min_connections(), 1);
        assert_eq!(config.max_connections(), 10);
        assert_eq!(config.acquire_timeout(), Duration::from_secs(30));
        assert!(config.test_before_acquire());
    }

    #[tokio::test]
    async fn test_rw_and_ro_pools() {
        let db_file = testdir!().join("pools.db");
        let config = SqliteConfigBuilder::default()
            .url(db_file.to_str().map(str::to_string))
            .build()
            .unwrap();
        let db = crate::db(&config).await.unwrap();

        sqlx::query("INSERT INTO settings (key, value, value_type, created_at, updated_at) VALUES ('t', '1', 'int', datetime('now'), datetime('now'))")
            .execute(db.writer())
            .await
            .unwrap();

        let (value,): (String,) = sqlx::query_as("SELECT value FROM settings WHERE key = 't'")
            .fetch_one(db.reader())
            .await
            .unwrap();
        assert_eq!(value, "1");

        // the read-only pool rejects writes
        let refused = sqlx::query("DELETE FROM settings WHERE key = 't'")
            .execute(db.reader())
            .await;
        assert!(refused.is_err());
    }
}
