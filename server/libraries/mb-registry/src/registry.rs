//
// Copyright 2025 Tabs Data Inc.
//

//! Versioned storage of function source. Versions are content-addressed over the
//! normalized source; registering an unchanged source returns the existing
//! version. Exactly one version per function is active, enforced inside one
//! transaction per publish.

use crate::source::{content_hash, normalize_source, parse_inline_deps};
use mb_common::id::{self, Id};
use mb_common::time::UniqueUtc;
use mb_database::sql::DbPool;
use mb_error::{MbError, mb_error};
use mb_objects::types::function::{AuthLevel, FunctionDef, FunctionVersion, TagList};
use std::path::PathBuf;
use tracing::{debug, info};

#[mb_error]
pub enum RegistryError {
    #[error("Invalid function name '{0}', must be snake_case")]
    InvalidFunctionName(String) = 0,
    #[error("Function not found: {0}")]
    FunctionNotFound(String) = 1000,
    #[error("Function '{0}' has no active version")]
    NoActiveVersion(String) = 1001,
    #[error("Sql error: {0}")]
    Sql(#[from] sqlx::Error) = 7000,
    #[error("Cannot mirror function source to {0}: {1}")]
    CannotMirrorSource(String, #[source] std::io::Error) = 7001,
}

/// The function registry: definitions plus content-addressed versions, with the
/// source of each function mirrored to one file under the functions directory.
pub struct FunctionRegistry {
    db: DbPool,
    functions_dir: PathBuf,
}

impl FunctionRegistry {
    pub fn new(db: DbPool, functions_dir: PathBuf) -> Self {
        Self { db, functions_dir }
    }

    pub fn functions_dir(&self) -> &PathBuf {
        &self.functions_dir
    }

    /// Path of the mirrored source file of a function.
    pub fn source_path(&self, name: &str) -> PathBuf {
        self.functions_dir.join(format!("{name}.py"))
    }

    pub async fn get_def(&self, name: &str) -> Result<FunctionDef, MbError> {
        let def: Option<FunctionDef> =
            sqlx::query_as("SELECT * FROM function_defs WHERE name = ?1")
                .bind(name)
                .fetch_optional(self.db.reader())
                .await
                .map_err(RegistryError::Sql)?;
        Ok(def.ok_or_else(|| RegistryError::FunctionNotFound(name.to_string()))?)
    }

    pub async fn list_defs(&self) -> Result<Vec<FunctionDef>, MbError> {
        let defs = sqlx::query_as("SELECT * FROM function_defs ORDER BY name")
            .fetch_all(self.db.reader())
            .await
            .map_err(RegistryError::Sql)?;
        Ok(defs)
    }

    /// Updates definition metadata learned from the worker's describe response.
    pub async fn update_def_metadata(
        &self,
        name: &str,
        description: &str,
        auth_level: AuthLevel,
        tags: &[String],
    ) -> Result<(), MbError> {
        let updated = sqlx::query(
            r#"
            UPDATE function_defs SET description = ?1, auth_level = ?2, tags = ?3, updated_at = ?4
            WHERE name = ?5
            "#,
        )
        .bind(description)
        .bind(auth_level)
        .bind(TagList(tags.to_vec()))
        .bind(UniqueUtc::now_millis())
        .bind(name)
        .execute(self.db.writer())
        .await
        .map_err(RegistryError::Sql)?;
        if updated.rows_affected() == 0 {
            Err(RegistryError::FunctionNotFound(name.to_string()))?;
        }
        Ok(())
    }

    /// Registers a source as the active version of a function.
    ///
    /// The source is normalized and hashed; a hash already known for the function
    /// reuses that version (reactivating it when necessary) instead of inserting a
    /// new row. New functions get a definition with default metadata.
    pub async fn put_version(
        &self,
        name: &str,
        source: &str,
        notes: &str,
        actor: Id,
    ) -> Result<FunctionVersion, MbError> {
        if !valid_function_name(name) {
            Err(RegistryError::InvalidFunctionName(name.to_string()))?;
        }
        let normalized = normalize_source(source);
        let hash = content_hash(&normalized);
        let deps = parse_inline_deps(&normalized)?;

        let mut tx = self.db.begin().await.map_err(RegistryError::Sql)?;

        let def: Option<FunctionDef> =
            sqlx::query_as("SELECT * FROM function_defs WHERE name = ?1")
                .bind(name)
                .fetch_optional(&mut *tx)
                .await
                .map_err(RegistryError::Sql)?;
        if def.is_none() {
            let def = FunctionDef::new(id::id(), name.to_string(), UniqueUtc::now_millis())
                .with_module_source(self.source_path(name).to_string_lossy().to_string());
            sqlx::query(
                r#"
                INSERT INTO function_defs (id, name, description, auth_level, tags, module_source, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(def.id())
            .bind(def.name())
            .bind(def.description())
            .bind(def.auth_level())
            .bind(def.tags())
            .bind(def.module_source())
            .bind(def.created_at())
            .bind(def.updated_at())
            .execute(&mut *tx)
            .await
            .map_err(RegistryError::Sql)?;
            info!("Registered new function '{}'", name);
        }

        let existing: Option<FunctionVersion> = sqlx::query_as(
            "SELECT * FROM function_versions WHERE function_name = ?1 AND content_hash = ?2",
        )
        .bind(name)
        .bind(&hash)
        .fetch_optional(&mut *tx)
        .await
        .map_err(RegistryError::Sql)?;

        let version = match existing {
            Some(version) if version.is_active() => {
                // identical to the active version: collapse, record nothing
                tx.commit().await.map_err(RegistryError::Sql)?;
                debug!("Function '{}' source unchanged, keeping version {}", name, version.id());
                return Ok(version);
            }
            Some(version) => {
                // a previously published source comes back: reactivate it
                sqlx::query("UPDATE function_versions SET is_active = 0 WHERE function_name = ?1")
                    .bind(name)
                    .execute(&mut *tx)
                    .await
                    .map_err(RegistryError::Sql)?;
                sqlx::query("UPDATE function_versions SET is_active = 1 WHERE id = ?1")
                    .bind(version.id())
                    .execute(&mut *tx)
                    .await
                    .map_err(RegistryError::Sql)?;
                version
            }
            None => {
                sqlx::query("UPDATE function_versions SET is_active = 0 WHERE function_name = ?1")
                    .bind(name)
                    .execute(&mut *tx)
                    .await
                    .map_err(RegistryError::Sql)?;
                let version = FunctionVersion::new(
                    id::id(),
                    name.to_string(),
                    hash,
                    normalized.clone(),
                    deps,
                    actor,
                    UniqueUtc::now_millis(),
                    notes.to_string(),
                );
                sqlx::query(
                    r#"
                    INSERT INTO function_versions
                        (id, function_name, content_hash, source_text, inline_deps, deployed_by, deployed_at, notes, is_active)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1)
                    "#,
                )
                .bind(version.id())
                .bind(version.function_name())
                .bind(version.content_hash())
                .bind(version.source_text())
                .bind(version.inline_deps())
                .bind(version.deployed_by())
                .bind(version.deployed_at())
                .bind(version.notes())
                .execute(&mut *tx)
                .await
                .map_err(RegistryError::Sql)?;
                info!("Published version {} of function '{}'", version.id(), name);
                version
            }
        };

        tx.commit().await.map_err(RegistryError::Sql)?;
        self.mirror_source(name, &normalized)?;
        Ok(version)
    }

    /// Looks up one version by id.
    pub async fn get_version(&self, id: Id) -> Result<FunctionVersion, MbError> {
        let version: Option<FunctionVersion> =
            sqlx::query_as("SELECT * FROM function_versions WHERE id = ?1")
                .bind(id)
                .fetch_optional(self.db.reader())
                .await
                .map_err(RegistryError::Sql)?;
        Ok(version.ok_or_else(|| RegistryError::FunctionNotFound(id.to_string()))?)
    }

    /// The version invocations of the function resolve to.
    pub async fn active_version(&self, name: &str) -> Result<FunctionVersion, MbError> {
        let version: Option<FunctionVersion> = sqlx::query_as(
            "SELECT * FROM function_versions WHERE function_name = ?1 AND is_active = 1",
        )
        .bind(name)
        .fetch_optional(self.db.reader())
        .await
        .map_err(RegistryError::Sql)?;
        match version {
            Some(version) => Ok(version),
            None => {
                // distinguish an unknown function from one without versions
                self.get_def(name).await?;
                Err(RegistryError::NoActiveVersion(name.to_string()))?
            }
        }
    }

    /// All versions of a function, newest first.
    pub async fn list_versions(&self, name: &str) -> Result<Vec<FunctionVersion>, MbError> {
        self.get_def(name).await?;
        let versions = sqlx::query_as(
            "SELECT * FROM function_versions WHERE function_name = ?1 ORDER BY deployed_at DESC",
        )
        .bind(name)
        .fetch_all(self.db.reader())
        .await
        .map_err(RegistryError::Sql)?;
        Ok(versions)
    }

    /// Re-registers every `*.py` file in the functions directory. Used by
    /// `serve --reload`; unchanged files collapse onto their existing versions.
    pub async fn sync_from_dir(&self, actor: Id) -> Result<usize, MbError> {
        let mut synced = 0;
        let entries = match std::fs::read_dir(&self.functions_dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(0),
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "py") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            if !valid_function_name(name) {
                continue;
            }
            let source = std::fs::read_to_string(&path).map_err(|err| {
                RegistryError::CannotMirrorSource(path.to_string_lossy().to_string(), err)
            })?;
            self.put_version(name, &source, "synced from functions directory", actor)
                .await?;
            synced += 1;
        }
        Ok(synced)
    }

    fn mirror_source(&self, name: &str, normalized: &str) -> Result<(), RegistryError> {
        let path = self.source_path(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| {
                RegistryError::CannotMirrorSource(parent.to_string_lossy().to_string(), err)
            })?;
        }
        std::fs::write(&path, normalized).map_err(|err| {
            RegistryError::CannotMirrorSource(path.to_string_lossy().to_string(), err)
        })
    }
}

/// Function names are snake_case identifiers, like collection and field names.
pub fn valid_function_name(name: &str) -> bool {
    mb_objects::types::collection::valid_collection_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use testdir::testdir;

    async fn registry() -> FunctionRegistry {
        let db = mb_database::test_utils::db().await.unwrap();
        FunctionRegistry::new(db, testdir!())
    }

    const SOURCE_A: &str = "def main(input):\n    return 1\n";
    const SOURCE_B: &str = "def main(input):\n    return 2\n";

    #[tokio::test]
    async fn test_version_collapse() {
        let registry = registry().await;
        let actor = id::id();

        let v1 = registry.put_version("f", SOURCE_A, "", actor).await.unwrap();
        let v1_again = registry.put_version("f", SOURCE_A, "", actor).await.unwrap();
        assert_eq!(v1.id(), v1_again.id());

        let v2 = registry.put_version("f", SOURCE_B, "", actor).await.unwrap();
        assert_ne!(v1.id(), v2.id());

        let active = registry.active_version("f").await.unwrap();
        assert_eq!(active.id(), v2.id());

        let versions = registry.list_versions("f").await.unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions.iter().filter(|v| v.is_active()).count(), 1);
    }

    #[tokio::test]
    async fn test_reactivating_old_source_reuses_version() {
        let registry = registry().await;
        let actor = id::id();

        let v1 = registry.put_version("f", SOURCE_A, "", actor).await.unwrap();
        registry.put_version("f", SOURCE_B, "", actor).await.unwrap();
        let v3 = registry.put_version("f", SOURCE_A, "", actor).await.unwrap();
        assert_eq!(v1.id(), v3.id());

        let versions = registry.list_versions("f").await.unwrap();
        assert_eq!(versions.len(), 2);
        let active = registry.active_version("f").await.unwrap();
        assert_eq!(active.id(), v1.id());
    }

    #[tokio::test]
    async fn test_source_normalization_collapses_line_endings() {
        let registry = registry().await;
        let actor = id::id();

        let v1 = registry
            .put_version("f", "def main(input):\r\n    return 1\r\n", "", actor)
            .await
            .unwrap();
        let v2 = registry.put_version("f", SOURCE_A, "", actor).await.unwrap();
        assert_eq!(v1.id(), v2.id());
    }

    #[tokio::test]
    async fn test_inline_deps_extracted() {
        let registry = registry().await;
        let source = "# /// script\n# dependencies = [\"rich\"]\n# ///\ndef main(input):\n    pass\n";
        let version = registry.put_version("f", source, "", id::id()).await.unwrap();
        assert_eq!(version.inline_deps().0, vec!["rich".to_string()]);
    }

    #[tokio::test]
    async fn test_bad_source_is_rejected() {
        let registry = registry().await;
        let source = "# /// script\n# dependencies = [oops\n# ///\n";
        let err = registry.put_version("f", source, "", id::id()).await.unwrap_err();
        assert!(err.to_string().contains("Invalid inline metadata"));

        // nothing was registered
        assert!(registry.get_def("f").await.is_err());
    }

    #[tokio::test]
    async fn test_source_mirrored_to_functions_dir() {
        let registry = registry().await;
        registry.put_version("f", SOURCE_A, "", id::id()).await.unwrap();
        let mirrored = std::fs::read_to_string(registry.source_path("f")).unwrap();
        assert_eq!(mirrored, SOURCE_A);
    }

    #[tokio::test]
    async fn test_sync_from_dir() {
        let registry = registry().await;
        std::fs::write(registry.functions_dir().join("hello.py"), SOURCE_A).unwrap();
        std::fs::write(registry.functions_dir().join("notes.txt"), "not code").unwrap();

        let synced = registry.sync_from_dir(id::id()).await.unwrap();
        assert_eq!(synced, 1);
        assert!(registry.active_version("hello").await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_function() {
        let registry = registry().await;
        let err = registry.active_version("ghost").await.unwrap_err();
        assert!(matches!(
            err.domain_err::<RegistryError>(),
            RegistryError::FunctionNotFound(_)
        ));
    }
}
