//
// Copyright 2025 Tabs Data Inc.
//

//! The record store: schema-driven CRUD over the shared `records` table with
//! unique-index maintenance, reference integrity and optimistic concurrency.
//! Every mutation runs inside a single read-write transaction; on error the
//! store is left unchanged.

use crate::cache::ValidatorCache;
use crate::schema::{Validator, normalized_key};
use getset::{CopyGetters, Getters};
use mb_common::id::{self, Id};
use mb_common::time::UniqueUtc;
use mb_database::sql::DbPool;
use mb_error::display_vec::DisplayVec;
use mb_error::{MbError, mb_error};
use mb_objects::types::collection::{Collection, FieldList};
use mb_objects::types::record::{Record, RecordData};
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::{Sqlite, Transaction};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

#[mb_error]
pub enum StoreError {
    #[error("Field '{0}': reference does not resolve in collection '{1}'")]
    ReferenceViolation(String, String) = 0,
    #[error("Field '{0}': cannot add a required field without a default to a non-empty collection")]
    RequiredFieldOnNonEmpty(String) = 1,
    #[error("Invalid filter field '{0}'")]
    InvalidFilterField(String) = 2,
    #[error("Collection not found: {0}")]
    CollectionNotFound(String) = 1000,
    #[error("Record not found: {0}")]
    RecordNotFound(String) = 1001,
    #[error("Collection already exists: {0}")]
    CollectionAlreadyExists(String) = 2000,
    #[error("Field '{0}': value already taken")]
    UniqueViolation(String) = 2001,
    #[error("Record changed concurrently, expected version {0}, found {1}")]
    ConcurrencyConflict(i64, i64) = 2002,
    #[error("Field '{0}': cannot enable unique, duplicate values exist: {1}")]
    DuplicateValues(String, DisplayVec<String>) = 2003,
    #[error("Collection '{0}' is referenced by collection '{1}'")]
    ReferencedByCollection(String, String) = 2004,
    #[error("Sql error: {0}")]
    Sql(#[from] sqlx::Error) = 7000,
}

/// One page of records plus the true total.
#[derive(Debug, Clone, Serialize, Getters, CopyGetters)]
pub struct RecordPage {
    #[getset(get = "pub")]
    records: Vec<Record>,
    #[getset(get_copy = "pub")]
    total: u64,
}

/// Admin status of one collection.
#[derive(Debug, Clone, Serialize, Getters, CopyGetters)]
pub struct CollectionStatus {
    #[getset(get = "pub")]
    name: String,
    #[getset(get_copy = "pub")]
    schema_version: i64,
    #[getset(get_copy = "pub")]
    records: u64,
}

/// The collections runtime over the system database.
pub struct CollectionStore {
    db: DbPool,
    cache: ValidatorCache,
}

impl CollectionStore {
    pub fn new(db: DbPool) -> Self {
        Self {
            db,
            cache: ValidatorCache::new(),
        }
    }

    async fn collection_names(&self) -> Result<HashSet<String>, StoreError> {
        let names: Vec<(String,)> = sqlx::query_as("SELECT name FROM collections")
            .fetch_all(self.db.reader())
            .await?;
        Ok(names.into_iter().map(|(name,)| name).collect())
    }

    async fn validator(&self, collection: &Collection) -> Result<Arc<Validator>, MbError> {
        let known = self.collection_names().await?;
        Ok(self.cache.get(collection, &known)?)
    }

    // ---------------------------------------------------------------- collections

    pub async fn create_collection(
        &self,
        name: &str,
        label: &str,
        schema: FieldList,
    ) -> Result<Collection, MbError> {
        let known = self.collection_names().await?;
        if known.contains(name) {
            Err(StoreError::CollectionAlreadyExists(name.to_string()))?;
        }
        // compile fails fast on a malformed schema
        Validator::compile(name, &schema, &known)?;

        let collection = Collection::new(
            id::id(),
            name.to_string(),
            label.to_string(),
            schema,
            UniqueUtc::now_millis(),
        );
        sqlx::query(
            r#"
            INSERT INTO collections (id, name, label, schema, schema_version, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(collection.id())
        .bind(collection.name())
        .bind(collection.label())
        .bind(collection.schema())
        .bind(collection.schema_version())
        .bind(collection.created_at())
        .bind(collection.updated_at())
        .execute(self.db.writer())
        .await
        .map_err(StoreError::Sql)?;
        debug!("Created collection '{}'", name);
        Ok(collection)
    }

    pub async fn get_collection(&self, name: &str) -> Result<Collection, MbError> {
        let collection: Option<Collection> =
            sqlx::query_as("SELECT * FROM collections WHERE name = ?1")
                .bind(name)
                .fetch_optional(self.db.reader())
                .await
                .map_err(StoreError::Sql)?;
        Ok(collection.ok_or_else(|| StoreError::CollectionNotFound(name.to_string()))?)
    }

    pub async fn list_collections(&self) -> Result<Vec<Collection>, MbError> {
        let collections = sqlx::query_as("SELECT * FROM collections ORDER BY name")
            .fetch_all(self.db.reader())
            .await
            .map_err(StoreError::Sql)?;
        Ok(collections)
    }

    pub async fn set_label(&self, name: &str, label: &str) -> Result<Collection, MbError> {
        let updated = sqlx::query("UPDATE collections SET label = ?1, updated_at = ?2 WHERE name = ?3")
            .bind(label)
            .bind(UniqueUtc::now_millis())
            .bind(name)
            .execute(self.db.writer())
            .await
            .map_err(StoreError::Sql)?;
        if updated.rows_affected() == 0 {
            Err(StoreError::CollectionNotFound(name.to_string()))?;
        }
        self.get_collection(name).await
    }

    /// Swaps the schema of a collection, migrating records and unique index
    /// entries in the same transaction.
    pub async fn update_schema(
        &self,
        name: &str,
        new_schema: FieldList,
    ) -> Result<Collection, MbError> {
        let collection = self.get_collection(name).await?;
        let known = self.collection_names().await?;
        // compile fails fast before anything is touched
        Validator::compile(name, &new_schema, &known)?;
        let old_schema = collection.schema();

        let mut tx = self.db.begin().await.map_err(StoreError::Sql)?;

        let (record_count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM records WHERE collection_name = ?1")
                .bind(name)
                .fetch_one(&mut *tx)
                .await
                .map_err(StoreError::Sql)?;

        // adding a required field without a default only works on an empty collection
        for field in new_schema.iter() {
            let added = old_schema.get(&field.name).is_none();
            if added && field.required && field.default.is_none() && record_count > 0 {
                Err(StoreError::RequiredFieldOnNonEmpty(field.name.clone()))?;
            }
        }

        let removed: Vec<String> = old_schema
            .iter()
            .filter(|f| new_schema.get(&f.name).is_none())
            .map(|f| f.name.clone())
            .collect();
        let unique_dropped: Vec<String> = old_schema
            .iter()
            .filter(|f| f.unique)
            .filter(|f| new_schema.get(&f.name).is_none_or(|n| !n.unique))
            .map(|f| f.name.clone())
            .collect();
        let unique_added: Vec<String> = new_schema
            .iter()
            .filter(|f| f.unique)
            .filter(|f| old_schema.get(&f.name).is_none_or(|o| !o.unique))
            .map(|f| f.name.clone())
            .collect();
        let backfill_defaults: Vec<&str> = new_schema
            .iter()
            .filter(|f| f.required && f.default.is_some())
            .filter(|f| old_schema.get(&f.name).is_none())
            .map(|f| f.name.as_str())
            .collect();

        // dropping a field removes its data across records in the same transaction
        if !removed.is_empty() || !backfill_defaults.is_empty() {
            let records: Vec<Record> =
                sqlx::query_as("SELECT * FROM records WHERE collection_name = ?1")
                    .bind(name)
                    .fetch_all(&mut *tx)
                    .await
                    .map_err(StoreError::Sql)?;
            for record in records {
                let mut data = record.data().clone();
                for field in &removed {
                    data.remove(field);
                }
                for field in &backfill_defaults {
                    if data.get(field).is_none() {
                        let default = new_schema.get(field).unwrap().default.clone().unwrap();
                        data.insert(field.to_string(), default);
                    }
                }
                sqlx::query(
                    "UPDATE records SET data = ?1, version = version + 1, updated_at = ?2 WHERE id = ?3",
                )
                .bind(&data)
                .bind(UniqueUtc::now_millis())
                .bind(record.id())
                .execute(&mut *tx)
                .await
                .map_err(StoreError::Sql)?;
            }
        }

        for field in &unique_dropped {
            sqlx::query(
                "DELETE FROM unique_index WHERE collection_name = ?1 AND field_name = ?2",
            )
            .bind(name)
            .bind(field)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::Sql)?;
        }

        // enabling unique backfills the index and errors out on duplicates
        if !unique_added.is_empty() {
            let records: Vec<Record> =
                sqlx::query_as("SELECT * FROM records WHERE collection_name = ?1")
                    .bind(name)
                    .fetch_all(&mut *tx)
                    .await
                    .map_err(StoreError::Sql)?;
            for field in &unique_added {
                let mut seen: HashSet<String> = HashSet::new();
                let mut duplicates: Vec<String> = Vec::new();
                for record in &records {
                    if let Some(value) = record.data().get(field) {
                        let key = normalized_key(value);
                        if !seen.insert(key.clone()) && !duplicates.contains(&key) {
                            duplicates.push(key);
                        }
                    }
                }
                if !duplicates.is_empty() {
                    Err(StoreError::DuplicateValues(
                        field.clone(),
                        duplicates.into(),
                    ))?;
                }
                for record in &records {
                    if let Some(value) = record.data().get(field) {
                        sqlx::query(
                            r#"
                            INSERT INTO unique_index (collection_name, field_name, normalized_value, record_id)
                            VALUES (?1, ?2, ?3, ?4)
                            "#,
                        )
                        .bind(name)
                        .bind(field)
                        .bind(normalized_key(value))
                        .bind(record.id())
                        .execute(&mut *tx)
                        .await
                        .map_err(StoreError::Sql)?;
                    }
                }
            }
        }

        sqlx::query(
            r#"
            UPDATE collections SET schema = ?1, schema_version = schema_version + 1, updated_at = ?2
            WHERE name = ?3
            "#,
        )
        .bind(&new_schema)
        .bind(UniqueUtc::now_millis())
        .bind(name)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::Sql)?;

        tx.commit().await.map_err(StoreError::Sql)?;
        self.cache.invalidate(name);
        debug!("Updated schema of collection '{}'", name);
        self.get_collection(name).await
    }

    /// Drops a collection, cascading its records and index entries.
    pub async fn drop_collection(&self, name: &str) -> Result<(), MbError> {
        let _collection = self.get_collection(name).await?;

        // refuse while another collection holds references into this one
        for other in self.list_collections().await? {
            if other.name() == name {
                continue;
            }
            let referencing = other.schema().iter().any(|f| {
                f.collection.as_deref() == Some(name)
            });
            if referencing {
                Err(StoreError::ReferencedByCollection(
                    name.to_string(),
                    other.name().clone(),
                ))?;
            }
        }

        let mut tx = self.db.begin().await.map_err(StoreError::Sql)?;
        sqlx::query("DELETE FROM unique_index WHERE collection_name = ?1")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::Sql)?;
        sqlx::query("DELETE FROM records WHERE collection_name = ?1")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::Sql)?;
        sqlx::query("DELETE FROM collections WHERE name = ?1")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::Sql)?;
        tx.commit().await.map_err(StoreError::Sql)?;
        self.cache.invalidate(name);
        debug!("Dropped collection '{}'", name);
        Ok(())
    }

    pub async fn status(&self) -> Result<Vec<CollectionStatus>, MbError> {
        let collections = self.list_collections().await?;
        let counts: Vec<(String, i64)> = sqlx::query_as(
            "SELECT collection_name, COUNT(*) FROM records GROUP BY collection_name",
        )
        .fetch_all(self.db.reader())
        .await
        .map_err(StoreError::Sql)?;
        Ok(collections
            .into_iter()
            .map(|c| {
                let records = counts
                    .iter()
                    .find(|(name, _)| name == c.name())
                    .map(|(_, count)| *count as u64)
                    .unwrap_or(0);
                CollectionStatus {
                    name: c.name().clone(),
                    schema_version: c.schema_version(),
                    records,
                }
            })
            .collect())
    }

    // ------------------------------------------------------------------- records

    pub async fn create_record(
        &self,
        collection_name: &str,
        data: &Map<String, Value>,
        owner_id: Option<Id>,
    ) -> Result<Record, MbError> {
        let collection = self.get_collection(collection_name).await?;
        let validator = self.validator(&collection).await?;
        let normalized = validator.validate(data)?;

        let mut tx = self.db.begin().await.map_err(StoreError::Sql)?;
        Self::check_references(&mut tx, &validator, &normalized).await?;

        let record = Record::new(
            id::id(),
            collection_name.to_string(),
            owner_id,
            normalized,
            UniqueUtc::now_millis(),
        );

        for field in validator.unique_fields() {
            if let Some(value) = record.data().get(field) {
                Self::claim_unique(&mut tx, collection_name, field, value, record.id()).await?;
            }
        }

        sqlx::query(
            r#"
            INSERT INTO records (id, collection_name, owner_id, data, version, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(record.id())
        .bind(record.collection_name())
        .bind(record.owner_id())
        .bind(record.data())
        .bind(record.version())
        .bind(record.created_at())
        .bind(record.updated_at())
        .execute(&mut *tx)
        .await
        .map_err(StoreError::Sql)?;

        tx.commit().await.map_err(StoreError::Sql)?;
        Ok(record)
    }

    pub async fn get_record(&self, collection_name: &str, id: Id) -> Result<Record, MbError> {
        // resolving the collection first keeps NotFound errors distinguishable
        let _ = self.get_collection(collection_name).await?;
        let record: Option<Record> =
            sqlx::query_as("SELECT * FROM records WHERE collection_name = ?1 AND id = ?2")
                .bind(collection_name)
                .bind(id)
                .fetch_optional(self.db.reader())
                .await
                .map_err(StoreError::Sql)?;
        Ok(record.ok_or_else(|| StoreError::RecordNotFound(id.to_string()))?)
    }

    /// Lists a page of records. Offsets beyond the total return an empty page with
    /// the true total. Filters are equality checks on schema fields.
    pub async fn list_records(
        &self,
        collection_name: &str,
        limit: u64,
        offset: u64,
        filter: Option<&Map<String, Value>>,
    ) -> Result<RecordPage, MbError> {
        let collection = self.get_collection(collection_name).await?;

        let mut where_clause = String::from("collection_name = ?1");
        let mut filters: Vec<(&String, &Value)> = Vec::new();
        if let Some(filter) = filter {
            for (field, value) in filter {
                if collection.schema().get(field).is_none() {
                    Err(StoreError::InvalidFilterField(field.clone()))?;
                }
                // field names are schema-checked snake_case identifiers
                where_clause.push_str(&format!(
                    " AND json_extract(data, '$.{}') = ?{}",
                    field,
                    filters.len() + 2
                ));
                filters.push((field, value));
            }
        }

        let count_sql = format!("SELECT COUNT(*) FROM records WHERE {where_clause}");
        let mut count_query = sqlx::query_as::<_, (i64,)>(&count_sql).bind(collection_name);
        for (_, value) in &filters {
            count_query = bind_filter_value(count_query, *value);
        }

        let page_sql = format!(
            "SELECT * FROM records WHERE {where_clause} ORDER BY id LIMIT ?{} OFFSET ?{}",
            filters.len() + 2,
            filters.len() + 3
        );
        let mut page_query = sqlx::query_as::<_, Record>(&page_sql).bind(collection_name);
        for (_, value) in &filters {
            page_query = bind_filter_value_record(page_query, *value);
        }
        let page_query = page_query.bind(limit as i64).bind(offset as i64);

        // both reads go to the read-only pool; run them together
        let ((total,), records) = futures::try_join!(
            count_query.fetch_one(self.db.reader()),
            page_query.fetch_all(self.db.reader()),
        )
        .map_err(StoreError::Sql)?;

        Ok(RecordPage {
            records,
            total: total as u64,
        })
    }

    /// Applies a partial update. When `expected_version` is given and the record has
    /// moved past it, the update fails with a concurrency conflict.
    pub async fn update_record(
        &self,
        collection_name: &str,
        id: Id,
        patch: &Map<String, Value>,
        expected_version: Option<i64>,
    ) -> Result<Record, MbError> {
        let collection = self.get_collection(collection_name).await?;
        let validator = self.validator(&collection).await?;

        let mut tx = self.db.begin().await.map_err(StoreError::Sql)?;
        let record: Option<Record> =
            sqlx::query_as("SELECT * FROM records WHERE collection_name = ?1 AND id = ?2")
                .bind(collection_name)
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(StoreError::Sql)?;
        let record = record.ok_or_else(|| StoreError::RecordNotFound(id.to_string()))?;

        if let Some(expected) = expected_version
            && expected != record.version()
        {
            Err(StoreError::ConcurrencyConflict(expected, record.version()))?;
        }

        let normalized = validator.validate_patch(record.data(), patch)?;
        Self::check_references(&mut tx, &validator, &normalized).await?;

        // recompute unique index entries only for changed fields
        for field in validator.unique_fields() {
            let old_value = record.data().get(field).map(normalized_key);
            let new_value = normalized.get(field).map(normalized_key);
            if old_value == new_value {
                continue;
            }
            if let Some(old_key) = old_value {
                sqlx::query(
                    r#"
                    DELETE FROM unique_index
                    WHERE collection_name = ?1 AND field_name = ?2 AND normalized_value = ?3
                    "#,
                )
                .bind(collection_name)
                .bind(field)
                .bind(old_key)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::Sql)?;
            }
            if let Some(value) = normalized.get(field) {
                Self::claim_unique(&mut tx, collection_name, field, value, record.id()).await?;
            }
        }

        let now = UniqueUtc::now_millis();
        sqlx::query(
            "UPDATE records SET data = ?1, version = version + 1, updated_at = ?2 WHERE id = ?3",
        )
        .bind(&normalized)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::Sql)?;
        tx.commit().await.map_err(StoreError::Sql)?;

        self.get_record(collection_name, id).await
    }

    pub async fn delete_record(&self, collection_name: &str, id: Id) -> Result<(), MbError> {
        let _ = self.get_collection(collection_name).await?;

        let mut tx = self.db.begin().await.map_err(StoreError::Sql)?;
        let deleted = sqlx::query("DELETE FROM records WHERE collection_name = ?1 AND id = ?2")
            .bind(collection_name)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::Sql)?;
        if deleted.rows_affected() == 0 {
            Err(StoreError::RecordNotFound(id.to_string()))?;
        }
        sqlx::query("DELETE FROM unique_index WHERE record_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::Sql)?;
        tx.commit().await.map_err(StoreError::Sql)?;
        Ok(())
    }

    // ------------------------------------------------------------------- helpers

    async fn check_references(
        tx: &mut Transaction<'static, Sqlite>,
        validator: &Validator,
        data: &RecordData,
    ) -> Result<(), StoreError> {
        for (field, target) in validator.reference_fields() {
            if let Some(Value::String(target_id)) = data.get(field) {
                let (count,): (i64,) = sqlx::query_as(
                    "SELECT COUNT(*) FROM records WHERE collection_name = ?1 AND id = ?2",
                )
                .bind(target)
                .bind(target_id)
                .fetch_one(&mut **tx)
                .await?;
                if count == 0 {
                    return Err(StoreError::ReferenceViolation(
                        field.to_string(),
                        target.to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    async fn claim_unique(
        tx: &mut Transaction<'static, Sqlite>,
        collection_name: &str,
        field: &str,
        value: &Value,
        record_id: Id,
    ) -> Result<(), StoreError> {
        let key = normalized_key(value);
        let (taken,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM unique_index
            WHERE collection_name = ?1 AND field_name = ?2 AND normalized_value = ?3
            "#,
        )
        .bind(collection_name)
        .bind(field)
        .bind(&key)
        .fetch_one(&mut **tx)
        .await?;
        if taken > 0 {
            return Err(StoreError::UniqueViolation(field.to_string()));
        }
        sqlx::query(
            r#"
            INSERT INTO unique_index (collection_name, field_name, normalized_value, record_id)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(collection_name)
        .bind(field)
        .bind(key)
        .bind(record_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

type SqliteQueryAs<'q, O> =
    sqlx::query::QueryAs<'q, Sqlite, O, sqlx::sqlite::SqliteArguments<'q>>;

fn bind_filter_value<'q>(
    query: SqliteQueryAs<'q, (i64,)>,
    value: &'q Value,
) -> SqliteQueryAs<'q, (i64,)> {
    bind_value(query, value)
}

fn bind_filter_value_record<'q>(
    query: SqliteQueryAs<'q, Record>,
    value: &'q Value,
) -> SqliteQueryAs<'q, Record> {
    bind_value(query, value)
}

fn bind_value<'q, O>(query: SqliteQueryAs<'q, O>, value: &'q Value) -> SqliteQueryAs<'q, O> {
    match value {
        Value::String(s) => query.bind(s.as_str()),
        Value::Bool(b) => query.bind(*b as i64),
        Value::Number(n) if n.is_i64() => query.bind(n.as_i64().unwrap()),
        Value::Number(n) => query.bind(n.as_f64().unwrap_or(f64::NAN)),
        other => query.bind(other.to_string()),
    }
}

#[cfg(test)]
mod tests;
