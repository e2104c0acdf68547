//
// Copyright 2025 Tabs Data Inc.
//

use chrono::{DateTime, Utc};
use getset::{CopyGetters, Getters};
use mb_common::id::Id;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Authorization level required to invoke a function.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    AsRefStr,
    Display,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuthLevel {
    Public,
    Auth,
    Admin,
}

sqlx_str_codec!(AuthLevel);

/// Tags attached to a function definition, stored as a JSON TEXT column.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TagList(pub Vec<String>);

sqlx_json_codec!(TagList);

/// A function in the catalog. The executable source lives in [`FunctionVersion`]
/// rows; the definition carries the metadata used for listing and authorization.
#[derive(Debug, Clone, Serialize, Deserialize, Getters, CopyGetters, sqlx::FromRow)]
pub struct FunctionDef {
    #[getset(get_copy = "pub")]
    id: Id,
    #[getset(get = "pub")]
    name: String,
    #[getset(get = "pub")]
    description: String,
    #[getset(get_copy = "pub")]
    auth_level: AuthLevel,
    #[getset(get = "pub")]
    tags: TagList,
    /// Canonical path of the mirrored source file under the functions directory.
    #[getset(get = "pub")]
    module_source: String,
    #[getset(get_copy = "pub")]
    created_at: DateTime<Utc>,
    #[getset(get_copy = "pub")]
    updated_at: DateTime<Utc>,
}

impl FunctionDef {
    pub fn new(id: Id, name: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name,
            description: String::new(),
            auth_level: AuthLevel::Admin,
            tags: TagList::default(),
            module_source: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_auth_level(mut self, auth_level: AuthLevel) -> Self {
        self.auth_level = auth_level;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = TagList(tags);
        self
    }

    pub fn with_module_source(mut self, module_source: impl Into<String>) -> Self {
        self.module_source = module_source.into();
        self
    }
}

/// Inline dependency specs extracted from a function source header, stored as a
/// JSON TEXT column.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DepList(pub Vec<String>);

sqlx_json_codec!(DepList);

/// One immutable version of a function's source.
///
/// Exactly one version per function is active. Versions are content-addressed:
/// registering a source identical to the active version returns it unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, Getters, CopyGetters, sqlx::FromRow)]
pub struct FunctionVersion {
    #[getset(get_copy = "pub")]
    id: Id,
    #[getset(get = "pub")]
    function_name: String,
    #[getset(get = "pub")]
    content_hash: String,
    #[getset(get = "pub")]
    source_text: String,
    #[getset(get = "pub")]
    inline_deps: DepList,
    #[getset(get_copy = "pub")]
    deployed_by: Id,
    #[getset(get_copy = "pub")]
    deployed_at: DateTime<Utc>,
    #[getset(get = "pub")]
    notes: String,
    #[getset(get_copy = "pub")]
    is_active: bool,
}

impl FunctionVersion {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: Id,
        function_name: String,
        content_hash: String,
        source_text: String,
        inline_deps: Vec<String>,
        deployed_by: Id,
        deployed_at: DateTime<Utc>,
        notes: String,
    ) -> Self {
        Self {
            id,
            function_name,
            content_hash,
            source_text,
            inline_deps: DepList(inline_deps),
            deployed_by,
            deployed_at,
            notes,
            is_active: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_level_order() {
        assert!(AuthLevel::Public < AuthLevel::Auth);
        assert!(AuthLevel::Auth < AuthLevel::Admin);
    }

    #[test]
    fn test_auth_level_string_forms() {
        assert_eq!(AuthLevel::Public.to_string(), "public");
        assert_eq!("admin".parse::<AuthLevel>().unwrap(), AuthLevel::Admin);
        assert!("root".parse::<AuthLevel>().is_err());
    }
}
