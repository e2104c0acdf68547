//
// Copyright 2025 Tabs Data Inc.
//

use chrono::{DateTime, Utc};
use getset::{CopyGetters, Getters};
use mb_common::id::Id;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Normalized record data: field name to JSON value, as produced by the schema
/// validator. Stored as a JSON TEXT column.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RecordData(pub Map<String, Value>);

impl RecordData {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: String, value: Value) {
        self.0.insert(field, value);
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    pub fn iter(&self) -> serde_json::map::Iter<'_> {
        self.0.iter()
    }
}

impl From<Map<String, Value>> for RecordData {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

sqlx_json_codec!(RecordData);

/// A record in a collection.
#[derive(Debug, Clone, Serialize, Deserialize, Getters, CopyGetters, sqlx::FromRow)]
pub struct Record {
    #[getset(get_copy = "pub")]
    id: Id,
    #[getset(get = "pub")]
    collection_name: String,
    #[getset(get_copy = "pub")]
    owner_id: Option<Id>,
    #[getset(get = "pub")]
    data: RecordData,
    /// Optimistic concurrency counter, incremented on every update.
    #[getset(get_copy = "pub")]
    version: i64,
    #[getset(get_copy = "pub")]
    created_at: DateTime<Utc>,
    #[getset(get_copy = "pub")]
    updated_at: DateTime<Utc>,
}

impl Record {
    pub fn new(
        id: Id,
        collection_name: String,
        owner_id: Option<Id>,
        data: RecordData,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            collection_name,
            owner_id,
            data,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_data_roundtrip() {
        let mut data = RecordData::default();
        data.insert("email".to_string(), json!("a@x"));
        data.insert("age".to_string(), json!(42));
        let json = serde_json::to_string(&data).unwrap();
        let parsed: RecordData = serde_json::from_str(&json).unwrap();
        assert_eq!(data, parsed);
        assert_eq!(parsed.get("age"), Some(&json!(42)));
    }
}
