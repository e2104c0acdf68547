//
// Copyright 2025 Tabs Data Inc.
//

use sqlx::migrate::Migrator;
use std::sync::LazyLock;

/// Settings key holding the database version. Lives under the reserved `sys.` prefix.
pub const DB_VERSION_KEY: &str = "sys.db_version";

/// Version that the current migrations expect the database to be on.
/// Taken from the latest migration in the live migrations folder.
pub static DB_VERSION_VALUE: LazyLock<usize> = LazyLock::new(|| {
    let migrations = schema();
    let latest = migrations
        .migrations
        .last()
        .expect("No migrations found in the schema");
    let version_str = latest.description.strip_prefix('v').expect(
        r#"
        Latest migration must be a version upgrader with a description starting with
        'v', with the version number following it. It should only upgrade the version number of the
        database. Other schema changes should be contained in inbetween scripts."#,
    );
    version_str.parse::<usize>().unwrap()
});

/// Returns the schema for the minibase system database.
///
/// The schema is defined in the `resources/schemas/minibase/live` directory using Sqlx
/// migration files created with sqlx CLI:
/// `sqlx migrate add --source resources/schemas/minibase/live -r <file_name>`.
pub fn schema() -> &'static Migrator {
    static SCHEMA: Migrator = sqlx::migrate!("resources/schemas/minibase/live");
    &SCHEMA
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_version_matches_latest_migration() {
        assert_eq!(*DB_VERSION_VALUE, 1);
    }

    #[tokio::test]
    async fn test_schema_applies_to_empty_database() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        schema().run(&pool).await.unwrap();

        let (value,): (String,) = sqlx::query_as("SELECT value FROM settings WHERE key = ?1")
            .bind(DB_VERSION_KEY)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(value, "1");
    }
}
