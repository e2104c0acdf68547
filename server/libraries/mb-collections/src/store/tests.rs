//
// Copyright 2025 Tabs Data Inc.
//

use super::*;
use mb_objects::types::collection::{FieldDef, FieldType};
use serde_json::json;

async fn store() -> CollectionStore {
    let db = mb_database::test_utils::db().await.unwrap();
    CollectionStore::new(db)
}

fn obj(value: Value) -> Map<String, Value> {
    value.as_object().unwrap().clone()
}

fn users_schema() -> FieldList {
    FieldList(vec![
        FieldDef::new("email", FieldType::String).required().unique(),
        FieldDef::new("age", FieldType::Integer),
    ])
}

#[tokio::test]
async fn test_create_then_get_roundtrip() {
    let store = store().await;
    store
        .create_collection("users", "Users", users_schema())
        .await
        .unwrap();

    let created = store
        .create_record("users", &obj(json!({"email": "a@x", "age": 30})), None)
        .await
        .unwrap();
    let fetched = store.get_record("users", created.id()).await.unwrap();
    assert_eq!(fetched.data(), created.data());
    assert_eq!(fetched.data().get("email"), Some(&json!("a@x")));
    assert_eq!(fetched.version(), 1);
}

#[tokio::test]
async fn test_unique_violation_names_field_and_leaves_store_unchanged() {
    let store = store().await;
    store
        .create_collection("users", "Users", users_schema())
        .await
        .unwrap();

    store
        .create_record("users", &obj(json!({"email": "a@x"})), None)
        .await
        .unwrap();
    let err = store
        .create_record("users", &obj(json!({"email": "a@x"})), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err.domain_err::<StoreError>(),
        StoreError::UniqueViolation(field) if field == "email"
    ));

    let page = store.list_records("users", 10, 0, None).await.unwrap();
    assert_eq!(page.total(), 1);
}

#[tokio::test]
async fn test_validation_rejects_unknown_field_without_partial_write() {
    let store = store().await;
    store
        .create_collection("users", "Users", users_schema())
        .await
        .unwrap();

    let err = store
        .create_record("users", &obj(json!({"email": "a@x", "nickname": "a"})), None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("nickname"));

    let page = store.list_records("users", 10, 0, None).await.unwrap();
    assert_eq!(page.total(), 0);
}

#[tokio::test]
async fn test_reference_integrity() {
    let store = store().await;
    store
        .create_collection(
            "teams",
            "Teams",
            FieldList(vec![FieldDef::new("name", FieldType::String).required()]),
        )
        .await
        .unwrap();
    store
        .create_collection(
            "players",
            "Players",
            FieldList(vec![
                FieldDef::new("name", FieldType::String).required(),
                FieldDef::new("team", FieldType::Reference).referencing("teams"),
            ]),
        )
        .await
        .unwrap();

    let team = store
        .create_record("teams", &obj(json!({"name": "reds"})), None)
        .await
        .unwrap();

    // resolvable reference
    store
        .create_record(
            "players",
            &obj(json!({"name": "p1", "team": team.id().to_string()})),
            None,
        )
        .await
        .unwrap();

    // dangling reference
    let missing = mb_common::id::id().to_string();
    let err = store
        .create_record("players", &obj(json!({"name": "p2", "team": missing})), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err.domain_err::<StoreError>(),
        StoreError::ReferenceViolation(field, target) if field == "team" && target == "teams"
    ));

    // dropping a referenced collection is refused
    let err = store.drop_collection("teams").await.unwrap_err();
    assert!(matches!(
        err.domain_err::<StoreError>(),
        StoreError::ReferencedByCollection(_, _)
    ));
}

#[tokio::test]
async fn test_pagination_beyond_total_returns_empty_page_with_true_total() {
    let store = store().await;
    store
        .create_collection("users", "Users", users_schema())
        .await
        .unwrap();
    for i in 0..3 {
        store
            .create_record("users", &obj(json!({"email": format!("u{i}@x")})), None)
            .await
            .unwrap();
    }

    let page = store.list_records("users", 10, 100, None).await.unwrap();
    assert!(page.records().is_empty());
    assert_eq!(page.total(), 3);

    let page = store.list_records("users", 2, 0, None).await.unwrap();
    assert_eq!(page.records().len(), 2);
    assert_eq!(page.total(), 3);
}

#[tokio::test]
async fn test_list_with_filter() {
    let store = store().await;
    store
        .create_collection("users", "Users", users_schema())
        .await
        .unwrap();
    store
        .create_record("users", &obj(json!({"email": "a@x", "age": 30})), None)
        .await
        .unwrap();
    store
        .create_record("users", &obj(json!({"email": "b@x", "age": 40})), None)
        .await
        .unwrap();

    let page = store
        .list_records("users", 10, 0, Some(&obj(json!({"age": 40}))))
        .await
        .unwrap();
    assert_eq!(page.total(), 1);
    assert_eq!(page.records()[0].data().get("email"), Some(&json!("b@x")));

    let err = store
        .list_records("users", 10, 0, Some(&obj(json!({"nope": 1}))))
        .await
        .unwrap_err();
    assert!(matches!(
        err.domain_err::<StoreError>(),
        StoreError::InvalidFilterField(_)
    ));
}

#[tokio::test]
async fn test_update_with_stale_version_conflicts() {
    let store = store().await;
    store
        .create_collection("users", "Users", users_schema())
        .await
        .unwrap();
    let record = store
        .create_record("users", &obj(json!({"email": "a@x"})), None)
        .await
        .unwrap();

    let updated = store
        .update_record("users", record.id(), &obj(json!({"age": 1})), Some(1))
        .await
        .unwrap();
    assert_eq!(updated.version(), 2);

    let err = store
        .update_record("users", record.id(), &obj(json!({"age": 2})), Some(1))
        .await
        .unwrap_err();
    assert!(matches!(
        err.domain_err::<StoreError>(),
        StoreError::ConcurrencyConflict(1, 2)
    ));
}

#[tokio::test]
async fn test_update_moves_unique_index_entry() {
    let store = store().await;
    store
        .create_collection("users", "Users", users_schema())
        .await
        .unwrap();
    let record = store
        .create_record("users", &obj(json!({"email": "a@x"})), None)
        .await
        .unwrap();

    store
        .update_record("users", record.id(), &obj(json!({"email": "b@x"})), None)
        .await
        .unwrap();

    // the old value is free again, the new one is taken
    store
        .create_record("users", &obj(json!({"email": "a@x"})), None)
        .await
        .unwrap();
    let err = store
        .create_record("users", &obj(json!({"email": "b@x"})), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err.domain_err::<StoreError>(),
        StoreError::UniqueViolation(_)
    ));
}

#[tokio::test]
async fn test_delete_frees_unique_value() {
    let store = store().await;
    store
        .create_collection("users", "Users", users_schema())
        .await
        .unwrap();
    let record = store
        .create_record("users", &obj(json!({"email": "a@x"})), None)
        .await
        .unwrap();
    store.delete_record("users", record.id()).await.unwrap();

    store
        .create_record("users", &obj(json!({"email": "a@x"})), None)
        .await
        .unwrap();

    let err = store.get_record("users", record.id()).await.unwrap_err();
    assert!(matches!(
        err.domain_err::<StoreError>(),
        StoreError::RecordNotFound(_)
    ));
}

#[tokio::test]
async fn test_schema_evolution_required_needs_default_on_non_empty() {
    let store = store().await;
    store
        .create_collection("users", "Users", users_schema())
        .await
        .unwrap();
    store
        .create_record("users", &obj(json!({"email": "a@x"})), None)
        .await
        .unwrap();

    let mut fields = users_schema().0;
    fields.push(FieldDef::new("role", FieldType::String).required());
    let err = store
        .update_schema("users", FieldList(fields))
        .await
        .unwrap_err();
    assert!(matches!(
        err.domain_err::<StoreError>(),
        StoreError::RequiredFieldOnNonEmpty(field) if field == "role"
    ));

    // with a default the field is backfilled into existing records
    let mut fields = users_schema().0;
    fields.push(
        FieldDef::new("role", FieldType::String)
            .required()
            .with_default(json!("member")),
    );
    store.update_schema("users", FieldList(fields)).await.unwrap();

    let page = store.list_records("users", 10, 0, None).await.unwrap();
    assert_eq!(page.records()[0].data().get("role"), Some(&json!("member")));
}

#[tokio::test]
async fn test_schema_evolution_unique_backfill_reports_duplicates() {
    let store = store().await;
    store
        .create_collection(
            "users",
            "Users",
            FieldList(vec![FieldDef::new("email", FieldType::String).required()]),
        )
        .await
        .unwrap();
    store
        .create_record("users", &obj(json!({"email": "a@x"})), None)
        .await
        .unwrap();
    store
        .create_record("users", &obj(json!({"email": "a@x"})), None)
        .await
        .unwrap();

    let err = store
        .update_schema(
            "users",
            FieldList(vec![FieldDef::new("email", FieldType::String).required().unique()]),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err.domain_err::<StoreError>(),
        StoreError::DuplicateValues(field, values) if field == "email" && values.len() == 1
    ));

    // the failed swap left the schema untouched
    let collection = store.get_collection("users").await.unwrap();
    assert!(!collection.schema().get("email").unwrap().unique);
    assert_eq!(collection.schema_version(), 1);
}

#[tokio::test]
async fn test_schema_evolution_unique_backfill_then_enforced() {
    let store = store().await;
    store
        .create_collection(
            "users",
            "Users",
            FieldList(vec![FieldDef::new("email", FieldType::String).required()]),
        )
        .await
        .unwrap();
    store
        .create_record("users", &obj(json!({"email": "a@x"})), None)
        .await
        .unwrap();

    let collection = store
        .update_schema(
            "users",
            FieldList(vec![FieldDef::new("email", FieldType::String).required().unique()]),
        )
        .await
        .unwrap();
    assert_eq!(collection.schema_version(), 2);

    let err = store
        .create_record("users", &obj(json!({"email": "a@x"})), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err.domain_err::<StoreError>(),
        StoreError::UniqueViolation(_)
    ));
}

#[tokio::test]
async fn test_schema_evolution_removed_field_drops_data() {
    let store = store().await;
    store
        .create_collection("users", "Users", users_schema())
        .await
        .unwrap();
    let record = store
        .create_record("users", &obj(json!({"email": "a@x", "age": 30})), None)
        .await
        .unwrap();

    store
        .update_schema(
            "users",
            FieldList(vec![FieldDef::new("email", FieldType::String).required().unique()]),
        )
        .await
        .unwrap();

    let fetched = store.get_record("users", record.id()).await.unwrap();
    assert!(fetched.data().get("age").is_none());
}

#[tokio::test]
async fn test_status_counts() {
    let store = store().await;
    store
        .create_collection("users", "Users", users_schema())
        .await
        .unwrap();
    store
        .create_record("users", &obj(json!({"email": "a@x"})), None)
        .await
        .unwrap();

    let status = store.status().await.unwrap();
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].name(), "users");
    assert_eq!(status[0].records(), 1);
    assert_eq!(status[0].schema_version(), 1);
}

#[tokio::test]
async fn test_collection_name_conflicts_and_not_found() {
    let store = store().await;
    store
        .create_collection("users", "Users", users_schema())
        .await
        .unwrap();

    let err = store
        .create_collection("users", "Users", users_schema())
        .await
        .unwrap_err();
    assert!(matches!(
        err.domain_err::<StoreError>(),
        StoreError::CollectionAlreadyExists(_)
    ));

    let err = store.get_collection("ghosts").await.unwrap_err();
    assert!(matches!(
        err.domain_err::<StoreError>(),
        StoreError::CollectionNotFound(_)
    ));
}
