//
// Copyright 2025 Tabs Data Inc.
//

//! Schema compilation: a [`FieldList`] becomes a pure [`Validator`] value at
//! schema-write time. Validation normalizes incoming JSON to the canonical form
//! stored on records (dates to epoch millis, integral numbers to integers,
//! defaults applied, unknown fields rejected).

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use mb_common::id::Id;
use mb_error::display_vec::DisplayVec;
use mb_error::mb_error;
use mb_objects::types::collection::{
    FieldDef, FieldList, FieldType, valid_collection_name, valid_field_name,
};
use mb_objects::types::record::RecordData;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashSet;

#[mb_error]
pub enum SchemaError {
    #[error("Invalid collection name '{0}', must be snake_case")]
    InvalidCollectionName(String) = 0,
    #[error("Invalid field name '{0}', must be snake_case")]
    InvalidFieldName(String) = 1,
    #[error("Duplicate field '{0}'")]
    DuplicateField(String) = 2,
    #[error("Field '{0}': reference fields must name a target collection")]
    MissingReferenceCollection(String) = 3,
    #[error("Field '{0}': reference to unknown collection '{1}'")]
    UnknownReferenceCollection(String, String) = 4,
    #[error("Field '{0}': invalid pattern: {1}")]
    InvalidPattern(String, regex::Error) = 5,
    #[error("Field '{0}': default value does not conform to the field type: {1}")]
    InvalidDefault(String, DisplayVec<String>) = 6,
    #[error("Field '{0}': unique is not supported for '{1}' fields")]
    UniqueNotSupported(String, FieldType) = 7,
}

#[mb_error]
pub enum ValidationError {
    #[error("Record validation failed: {0}")]
    Invalid(DisplayVec<String>) = 0,
}

/// One compiled field: its definition plus pre-built constraint machinery.
#[derive(Debug)]
struct CompiledField {
    def: FieldDef,
    pattern: Option<Regex>,
}

/// A compiled, pure record validator for one collection schema.
///
/// Compilation fails fast on a malformed schema; validation never touches the
/// database (reference existence is enforced by the store at write time).
#[derive(Debug)]
pub struct Validator {
    collection: String,
    fields: Vec<CompiledField>,
}

impl Validator {
    /// Compiles a field schema. `known_collections` holds the names reference
    /// fields may target; the collection under compilation may reference itself.
    pub fn compile(
        collection: &str,
        schema: &FieldList,
        known_collections: &HashSet<String>,
    ) -> Result<Validator, SchemaError> {
        if !valid_collection_name(collection) {
            return Err(SchemaError::InvalidCollectionName(collection.to_string()));
        }

        let mut seen = HashSet::new();
        let mut fields = Vec::with_capacity(schema.len());
        for def in schema.iter() {
            if !valid_field_name(&def.name) {
                return Err(SchemaError::InvalidFieldName(def.name.clone()));
            }
            if !seen.insert(def.name.clone()) {
                return Err(SchemaError::DuplicateField(def.name.clone()));
            }
            if def.field_type == FieldType::Reference {
                let target = def
                    .collection
                    .as_ref()
                    .ok_or_else(|| SchemaError::MissingReferenceCollection(def.name.clone()))?;
                if target != collection && !known_collections.contains(target) {
                    return Err(SchemaError::UnknownReferenceCollection(
                        def.name.clone(),
                        target.clone(),
                    ));
                }
            }
            if def.unique && matches!(def.field_type, FieldType::Array | FieldType::Object) {
                return Err(SchemaError::UniqueNotSupported(
                    def.name.clone(),
                    def.field_type,
                ));
            }
            let pattern = match &def.pattern {
                Some(pattern) if def.field_type == FieldType::String => Some(
                    Regex::new(pattern)
                        .map_err(|err| SchemaError::InvalidPattern(def.name.clone(), err))?,
                ),
                _ => None,
            };
            let compiled = CompiledField {
                def: def.clone(),
                pattern,
            };
            if let Some(default) = &compiled.def.default {
                let mut errors = Vec::new();
                if coerce(&compiled, default, &mut errors).is_none() {
                    return Err(SchemaError::InvalidDefault(
                        compiled.def.name.clone(),
                        errors.into(),
                    ));
                }
            }
            fields.push(compiled);
        }

        Ok(Validator {
            collection: collection.to_string(),
            fields,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Validates and normalizes an input object into canonical record data.
    ///
    /// Returns every violation at once, each message prefixed with the field path.
    pub fn validate(&self, input: &Map<String, Value>) -> Result<RecordData, ValidationError> {
        let mut errors = Vec::new();

        for key in input.keys() {
            if !self.fields.iter().any(|f| f.def.name == *key) {
                errors.push(format!("{key}: unknown field"));
            }
        }

        let mut normalized = RecordData::default();
        for field in &self.fields {
            let name = &field.def.name;
            match input.get(name) {
                None | Some(Value::Null) => {
                    if let Some(default) = &field.def.default {
                        // defaults were checked at compile time
                        if let Some(value) = coerce(field, default, &mut Vec::new()) {
                            normalized.insert(name.clone(), value);
                        }
                    } else if field.def.required {
                        errors.push(format!("{name}: required"));
                    }
                }
                Some(value) => {
                    if let Some(value) = coerce(field, value, &mut errors) {
                        normalized.insert(name.clone(), value);
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(normalized)
        } else {
            Err(ValidationError::Invalid(errors.into()))
        }
    }

    /// Validates a partial update merged over existing data.
    pub fn validate_patch(
        &self,
        existing: &RecordData,
        patch: &Map<String, Value>,
    ) -> Result<RecordData, ValidationError> {
        let mut merged = existing.0.clone();
        for (key, value) in patch {
            if value.is_null() {
                merged.remove(key);
            } else {
                merged.insert(key.clone(), value.clone());
            }
        }
        self.validate(&merged)
    }

    /// Names of the unique fields of this schema.
    pub fn unique_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|f| f.def.unique)
            .map(|f| f.def.name.as_str())
    }

    /// Names and targets of the reference fields of this schema.
    pub fn reference_fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .filter(|f| f.def.field_type == FieldType::Reference)
            .filter_map(|f| {
                f.def
                    .collection
                    .as_deref()
                    .map(|target| (f.def.name.as_str(), target))
            })
    }
}

/// Index key of a normalized value: its canonical JSON encoding.
pub fn normalized_key(value: &Value) -> String {
    value.to_string()
}

fn coerce(field: &CompiledField, value: &Value, errors: &mut Vec<String>) -> Option<Value> {
    let name = &field.def.name;
    match field.def.field_type {
        FieldType::String => match value {
            Value::String(s) => {
                if let Some(min) = field.def.min_length
                    && s.chars().count() < min
                {
                    errors.push(format!("{name}: shorter than {min} characters"));
                    return None;
                }
                if let Some(max) = field.def.max_length
                    && s.chars().count() > max
                {
                    errors.push(format!("{name}: longer than {max} characters"));
                    return None;
                }
                if let Some(pattern) = &field.pattern
                    && !pattern.is_match(s)
                {
                    errors.push(format!("{name}: does not match pattern"));
                    return None;
                }
                Some(value.clone())
            }
            _ => {
                errors.push(format!("{name}: not a string"));
                None
            }
        },
        FieldType::Number => match value.as_f64() {
            Some(n) => check_range(field, n, errors).then(|| value.clone()),
            None => {
                errors.push(format!("{name}: not a number"));
                None
            }
        },
        FieldType::Integer => match integral(value) {
            Some(i) => check_range(field, i as f64, errors).then(|| Value::from(i)),
            None => {
                errors.push(format!("{name}: not an integer"));
                None
            }
        },
        FieldType::Boolean => match value {
            Value::Bool(_) => Some(value.clone()),
            _ => {
                errors.push(format!("{name}: not a boolean"));
                None
            }
        },
        FieldType::Array => match value {
            Value::Array(items) => {
                if let Some(min) = field.def.min_length
                    && items.len() < min
                {
                    errors.push(format!("{name}: fewer than {min} items"));
                    return None;
                }
                if let Some(max) = field.def.max_length
                    && items.len() > max
                {
                    errors.push(format!("{name}: more than {max} items"));
                    return None;
                }
                Some(value.clone())
            }
            _ => {
                errors.push(format!("{name}: not an array"));
                None
            }
        },
        FieldType::Object => match value {
            Value::Object(_) => Some(value.clone()),
            _ => {
                errors.push(format!("{name}: not an object"));
                None
            }
        },
        FieldType::Date => match parse_date_millis(value) {
            Some(millis) => Some(Value::from(millis)),
            None => {
                errors.push(format!("{name}: not an ISO-8601 date"));
                None
            }
        },
        FieldType::Reference => match value {
            Value::String(s) if Id::try_from(s.as_str()).is_ok() => Some(value.clone()),
            _ => {
                errors.push(format!("{name}: not a record id"));
                None
            }
        },
    }
}

fn check_range(field: &CompiledField, n: f64, errors: &mut Vec<String>) -> bool {
    let name = &field.def.name;
    if let Some(min) = field.def.min
        && n < min
    {
        errors.push(format!("{name}: below minimum {min}"));
        return false;
    }
    if let Some(max) = field.def.max
        && n > max
    {
        errors.push(format!("{name}: above maximum {max}"));
        return false;
    }
    true
}

fn integral(value: &Value) -> Option<i64> {
    if let Some(i) = value.as_i64() {
        return Some(i);
    }
    // numeric literals without a fractional part are accepted as integers
    if let Some(f) = value.as_f64()
        && f.fract() == 0.0
        && f >= i64::MIN as f64
        && f <= i64::MAX as f64
    {
        return Some(f as i64);
    }
    None
}

/// Parses a date value to epoch millis: RFC 3339 strings, naive datetimes taken
/// as UTC, plain dates taken as UTC midnight, or an already-converted integer.
fn parse_date_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Number(_) => value.as_i64(),
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.timestamp_millis());
            }
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
                return Some(dt.and_utc().timestamp_millis());
            }
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
                return Some(dt.and_utc().timestamp_millis());
            }
            if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                return Some(date.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp_millis());
            }
            None
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mb_objects::types::collection::FieldDef;
    use serde_json::json;

    fn known() -> HashSet<String> {
        ["teams".to_string()].into_iter().collect()
    }

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_compile_rejects_duplicate_fields() {
        let schema = FieldList(vec![
            FieldDef::new("a", FieldType::String),
            FieldDef::new("a", FieldType::Integer),
        ]);
        assert!(matches!(
            Validator::compile("c", &schema, &known()),
            Err(SchemaError::DuplicateField(_))
        ));
    }

    #[test]
    fn test_compile_rejects_unknown_reference() {
        let schema = FieldList(vec![FieldDef::new("t", FieldType::Reference).referencing("nope")]);
        assert!(matches!(
            Validator::compile("c", &schema, &known()),
            Err(SchemaError::UnknownReferenceCollection(_, _))
        ));
    }

    #[test]
    fn test_compile_allows_self_reference() {
        let schema =
            FieldList(vec![FieldDef::new("parent", FieldType::Reference).referencing("nodes")]);
        assert!(Validator::compile("nodes", &schema, &HashSet::new()).is_ok());
    }

    #[test]
    fn test_compile_rejects_bad_pattern() {
        let mut def = FieldDef::new("code", FieldType::String);
        def.pattern = Some("[".to_string());
        let schema = FieldList(vec![def]);
        assert!(matches!(
            Validator::compile("c", &schema, &known()),
            Err(SchemaError::InvalidPattern(_, _))
        ));
    }

    #[test]
    fn test_compile_rejects_bad_default() {
        let def = FieldDef::new("age", FieldType::Integer).with_default(json!("ten"));
        let schema = FieldList(vec![def]);
        assert!(matches!(
            Validator::compile("c", &schema, &known()),
            Err(SchemaError::InvalidDefault(_, _))
        ));
    }

    #[test]
    fn test_validate_unknown_field_named() {
        let schema = FieldList(vec![FieldDef::new("a", FieldType::String)]);
        let validator = Validator::compile("c", &schema, &known()).unwrap();
        let err = validator
            .validate(&obj(json!({"a": "x", "mystery": 1})))
            .unwrap_err();
        let ValidationError::Invalid(errors) = err;
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("mystery:"));
    }

    #[test]
    fn test_validate_required_and_defaults() {
        let schema = FieldList(vec![
            FieldDef::new("name", FieldType::String).required(),
            FieldDef::new("level", FieldType::Integer).with_default(json!(1)),
        ]);
        let validator = Validator::compile("c", &schema, &known()).unwrap();

        let data = validator.validate(&obj(json!({"name": "n"}))).unwrap();
        assert_eq!(data.get("level"), Some(&json!(1)));

        let err = validator.validate(&obj(json!({}))).unwrap_err();
        let ValidationError::Invalid(errors) = err;
        assert!(errors.iter().any(|e| e == "name: required"));
    }

    #[test]
    fn test_validate_integer_coercion() {
        let schema = FieldList(vec![FieldDef::new("n", FieldType::Integer)]);
        let validator = Validator::compile("c", &schema, &known()).unwrap();

        let data = validator.validate(&obj(json!({"n": 5.0}))).unwrap();
        assert_eq!(data.get("n"), Some(&json!(5)));

        assert!(validator.validate(&obj(json!({"n": 5.5}))).is_err());
    }

    #[test]
    fn test_validate_date_normalization() {
        let schema = FieldList(vec![FieldDef::new("at", FieldType::Date)]);
        let validator = Validator::compile("c", &schema, &known()).unwrap();

        let data = validator
            .validate(&obj(json!({"at": "2026-03-01T12:00:00Z"})))
            .unwrap();
        assert_eq!(data.get("at"), Some(&json!(1772366400000i64)));

        let data = validator.validate(&obj(json!({"at": "2026-03-01"}))).unwrap();
        assert_eq!(data.get("at"), Some(&json!(1772323200000i64)));

        assert!(validator.validate(&obj(json!({"at": "yesterday"}))).is_err());
    }

    #[test]
    fn test_validate_string_constraints() {
        let mut def = FieldDef::new("code", FieldType::String);
        def.min_length = Some(2);
        def.max_length = Some(4);
        def.pattern = Some("^[a-z]+$".to_string());
        let schema = FieldList(vec![def]);
        let validator = Validator::compile("c", &schema, &known()).unwrap();

        assert!(validator.validate(&obj(json!({"code": "ab"}))).is_ok());
        assert!(validator.validate(&obj(json!({"code": "a"}))).is_err());
        assert!(validator.validate(&obj(json!({"code": "abcde"}))).is_err());
        assert!(validator.validate(&obj(json!({"code": "AB"}))).is_err());
    }

    #[test]
    fn test_validate_patch_merges() {
        let schema = FieldList(vec![
            FieldDef::new("name", FieldType::String).required(),
            FieldDef::new("age", FieldType::Integer),
        ]);
        let validator = Validator::compile("c", &schema, &known()).unwrap();
        let existing = validator
            .validate(&obj(json!({"name": "n", "age": 4})))
            .unwrap();

        let merged = validator
            .validate_patch(&existing, &obj(json!({"age": 5})))
            .unwrap();
        assert_eq!(merged.get("name"), Some(&json!("n")));
        assert_eq!(merged.get("age"), Some(&json!(5)));

        // null removes, which violates required
        assert!(
            validator
                .validate_patch(&existing, &obj(json!({"name": null})))
                .is_err()
        );
    }

    #[test]
    fn test_normalized_key() {
        assert_eq!(normalized_key(&json!("a@x")), "\"a@x\"");
        assert_eq!(normalized_key(&json!(42)), "42");
        assert_eq!(normalized_key(&json!(true)), "true");
    }
}
