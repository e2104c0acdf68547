//
// Copyright 2025 Tabs Data Inc.
//

use crate::sql::{DbError, DbPool, SqliteConfigBuilder};

/// Creates a throwaway minibase database for tests, backed by a temporary directory
/// that lives until the process exits.
pub async fn db() -> Result<DbPool, DbError> {
    let dir = tempfile::tempdir()
        .expect("cannot create temporary directory")
        .keep();
    let db_file = dir.join("minibase.db");
    let config = SqliteConfigBuilder::default()
        .url(db_file.to_str().map(str::to_string))
        .build()
        .unwrap();
    crate::db(&config).await
}
