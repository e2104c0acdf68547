//
// Copyright 2025 Tabs Data Inc.
//

use chrono::{DateTime, Utc};
use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Reserved prefix of core setting keys.
pub const CORE_SETTING_PREFIX: &str = "sys.";

/// Prefix of extension-owned setting keys (`ext.<name>.*`).
pub const EXT_SETTING_PREFIX: &str = "ext.";

/// Declared value type of a runtime setting.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SettingType {
    String,
    Int,
    Float,
    Bool,
    Json,
}

impl SettingType {
    /// Validates a raw value against the declared type.
    pub fn validates(&self, value: &str) -> bool {
        match self {
            SettingType::String => true,
            SettingType::Int => value.parse::<i64>().is_ok(),
            SettingType::Float => value.parse::<f64>().is_ok(),
            SettingType::Bool => value.parse::<bool>().is_ok(),
            SettingType::Json => serde_json::from_str::<serde_json::Value>(value).is_ok(),
        }
    }
}

sqlx_str_codec!(SettingType);

/// A runtime setting row.
#[derive(Debug, Clone, Serialize, Deserialize, Getters, CopyGetters, sqlx::FromRow)]
pub struct Setting {
    #[getset(get = "pub")]
    key: String,
    #[getset(get = "pub")]
    value: String,
    #[getset(get_copy = "pub")]
    value_type: SettingType,
    #[getset(get_copy = "pub")]
    created_at: DateTime<Utc>,
    #[getset(get_copy = "pub")]
    updated_at: DateTime<Utc>,
}

impl Setting {
    pub fn new(key: String, value: String, value_type: SettingType, now: DateTime<Utc>) -> Self {
        Self {
            key,
            value,
            value_type,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_core(&self) -> bool {
        self.key.starts_with(CORE_SETTING_PREFIX)
    }

    pub fn is_extension(&self) -> bool {
        self.key.starts_with(EXT_SETTING_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_validation() {
        assert!(SettingType::Int.validates("42"));
        assert!(!SettingType::Int.validates("4.2"));
        assert!(SettingType::Float.validates("4.2"));
        assert!(SettingType::Bool.validates("true"));
        assert!(!SettingType::Bool.validates("yes"));
        assert!(SettingType::Json.validates(r#"{"a": 1}"#));
        assert!(!SettingType::Json.validates("{"));
        assert!(SettingType::String.validates("anything"));
    }

    #[test]
    fn test_prefixes() {
        let now = chrono::Utc::now();
        let core = Setting::new(
            "sys.db_version".to_string(),
            "1".to_string(),
            SettingType::Int,
            now,
        );
        assert!(core.is_core());
        let ext = Setting::new(
            "ext.mailer.retries".to_string(),
            "3".to_string(),
            SettingType::Int,
            now,
        );
        assert!(ext.is_extension());
        assert!(!ext.is_core());
    }
}
