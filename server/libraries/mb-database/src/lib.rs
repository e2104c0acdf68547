//
// Copyright 2025 Tabs Data Inc.
//

use crate::sql::{DbPool, DbSchema, SqliteConfig};

pub mod sql;
pub mod test_utils;

/// Creates a connection pool for the minibase system database.
///
/// If the database does not exist, it is created. Also, if the schema is out of
/// date, it is updated.
pub async fn db(config: &SqliteConfig) -> Result<DbPool, sql::DbError> {
    db_with_schema(config, mb_schema::schema()).await
}

pub async fn db_with_schema(
    config: &SqliteConfig,
    schema: &'static DbSchema,
) -> Result<DbPool, sql::DbError> {
    DbPool::new(config, schema).await
}
