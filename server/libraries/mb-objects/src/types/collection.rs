//
// Copyright 2025 Tabs Data Inc.
//

use chrono::{DateTime, Utc};
use getset::{CopyGetters, Getters};
use mb_common::id::Id;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Field kinds supported by collection schemas.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Date,
    Reference,
}

/// A field definition inside a collection schema.
///
/// `name` must be snake_case and unique within the collection. Constraint fields
/// not applicable to the type are ignored by the validator compiler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Getters, CopyGetters)]
pub struct FieldDef {
    #[getset(get = "pub")]
    pub name: String,
    #[serde(rename = "type")]
    #[getset(get_copy = "pub")]
    pub field_type: FieldType,
    #[serde(default)]
    #[getset(skip)]
    pub required: bool,
    #[serde(default)]
    #[getset(skip)]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[getset(get = "pub")]
    pub default: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[getset(get_copy = "pub")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[getset(get_copy = "pub")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[getset(get_copy = "pub")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[getset(get_copy = "pub")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[getset(get = "pub")]
    pub pattern: Option<String>,
    /// Target collection of a `reference` field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[getset(get = "pub")]
    pub collection: Option<String>,
}

impl FieldDef {
    /// A plain optional field of the given type.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            unique: false,
            default: None,
            min: None,
            max: None,
            min_length: None,
            max_length: None,
            pattern: None,
            collection: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn referencing(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }
}

/// Ordered field schema of a collection, stored as a JSON TEXT column.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FieldList(pub Vec<FieldDef>);

impl FieldList {
    pub fn iter(&self) -> std::slice::Iter<'_, FieldDef> {
        self.0.iter()
    }

    pub fn get(&self, name: &str) -> Option<&FieldDef> {
        self.0.iter().find(|f| f.name == name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<FieldDef>> for FieldList {
    fn from(fields: Vec<FieldDef>) -> Self {
        Self(fields)
    }
}

sqlx_json_codec!(FieldList);

/// A record collection with its field schema.
#[derive(Debug, Clone, Serialize, Deserialize, Getters, CopyGetters, sqlx::FromRow)]
pub struct Collection {
    #[getset(get_copy = "pub")]
    id: Id,
    #[getset(get = "pub")]
    name: String,
    #[getset(get = "pub")]
    label: String,
    #[getset(get = "pub")]
    schema: FieldList,
    /// Bumped on every schema swap; keys the compiled validator cache.
    #[getset(get_copy = "pub")]
    schema_version: i64,
    #[getset(get_copy = "pub")]
    created_at: DateTime<Utc>,
    #[getset(get_copy = "pub")]
    updated_at: DateTime<Utc>,
}

impl Collection {
    pub fn new(
        id: Id,
        name: String,
        label: String,
        schema: FieldList,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name,
            label,
            schema,
            schema_version: 1,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Collection names are snake_case identifiers.
pub fn valid_collection_name(name: &str) -> bool {
    valid_snake_case(name)
}

/// Field names are snake_case identifiers.
pub fn valid_field_name(name: &str) -> bool {
    valid_snake_case(name)
}

fn valid_snake_case(name: &str) -> bool {
    !name.is_empty()
        && name.chars().next().is_some_and(|c| c.is_ascii_lowercase())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
