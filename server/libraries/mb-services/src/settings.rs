//
// Copyright 2025 Tabs Data Inc.
//

//! Runtime settings: the database-backed layer over the static configuration.
//! A read returns the stored value when present, else the built-in default.
//! Core keys live under the reserved `sys.` prefix with declared types;
//! extension keys live under `ext.<name>.*` and declare their type on first
//! write.

use async_trait::async_trait;
use mb_database::sql::DbPool;
use mb_error::{MbError, mb_error};
use mb_execution::engine::{EngineLimits, LimitsSource};
use mb_objects::types::setting::{CORE_SETTING_PREFIX, EXT_SETTING_PREFIX, Setting, SettingType};
use mb_common::time::UniqueUtc;
use mb_scheduler::scheduler::SchedulerLimitsSource;
use std::time::Duration;

/// Core runtime settings: key, declared type, default.
pub const CORE_SETTINGS: &[(&str, SettingType, &str)] = &[
    (keys::INSTANCE_NAME, SettingType::String, "minibase"),
    (keys::MAX_SCHEDULES_PER_TICK, SettingType::Int, "32"),
    (keys::MAX_CONCURRENT_EXECUTIONS, SettingType::Int, "32"),
    (keys::MAX_CONCURRENT_FUNCTIONS_PER_USER, SettingType::Int, "4"),
    (keys::FUNCTION_TIMEOUT_SECONDS, SettingType::Int, "30"),
    (keys::POOL_SIZE, SettingType::Int, "2"),
    (keys::COLD_START_TTL_SECONDS, SettingType::Int, "300"),
    (keys::SPAWN_CAP, SettingType::Int, "16"),
    (keys::STORAGE_ENABLED, SettingType::Bool, "false"),
    (keys::JOBS_ENABLED, SettingType::Bool, "true"),
    (keys::AUTH_PORTAL_THEME, SettingType::String, "default"),
];

pub mod keys {
    pub const INSTANCE_NAME: &str = "sys.instance_name";
    pub const MAX_SCHEDULES_PER_TICK: &str = "sys.max_schedules_per_tick";
    pub const MAX_CONCURRENT_EXECUTIONS: &str = "sys.max_concurrent_executions";
    pub const MAX_CONCURRENT_FUNCTIONS_PER_USER: &str = "sys.max_concurrent_functions_per_user";
    pub const FUNCTION_TIMEOUT_SECONDS: &str = "sys.function_timeout_seconds";
    pub const POOL_SIZE: &str = "sys.pool_size";
    pub const COLD_START_TTL_SECONDS: &str = "sys.cold_start_ttl_seconds";
    pub const SPAWN_CAP: &str = "sys.spawn_cap";
    pub const STORAGE_ENABLED: &str = "sys.storage_enabled";
    pub const JOBS_ENABLED: &str = "sys.jobs_enabled";
    pub const AUTH_PORTAL_THEME: &str = "sys.auth_portal_theme";
}

#[mb_error]
pub enum SettingsError {
    #[error("Unknown core setting: {0}")]
    UnknownCoreKey(String) = 0,
    #[error("Setting '{0}' is read-only")]
    ReadOnlyKey(String) = 1,
    #[error("Value '{1}' does not conform to type {2} of setting '{0}'")]
    TypeMismatch(String, String, SettingType) = 2,
    #[error("Setting keys must live under '{0}' or '{1}': {2}")]
    InvalidKeyPrefix(&'static str, &'static str, String) = 3,
    #[error("Sql error: {0}")]
    Sql(#[from] sqlx::Error) = 7000,
}

#[derive(Clone)]
pub struct SettingsService {
    db: DbPool,
}

impl SettingsService {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Raw stored value of a key, if any.
    pub async fn get(&self, key: &str) -> Result<Option<Setting>, MbError> {
        let setting = sqlx::query_as("SELECT * FROM settings WHERE key = ?1")
            .bind(key)
            .fetch_optional(self.db.reader())
            .await
            .map_err(SettingsError::Sql)?;
        Ok(setting)
    }

    pub async fn list(&self) -> Result<Vec<Setting>, MbError> {
        let settings = sqlx::query_as("SELECT * FROM settings ORDER BY key")
            .fetch_all(self.db.reader())
            .await
            .map_err(SettingsError::Sql)?;
        Ok(settings)
    }

    /// Effective value of a core key: the stored value, else the default.
    pub async fn effective(&self, key: &str) -> Result<String, MbError> {
        if let Some(setting) = self.get(key).await? {
            return Ok(setting.value().clone());
        }
        let default = CORE_SETTINGS
            .iter()
            .find(|(core_key, _, _)| *core_key == key)
            .map(|(_, _, default)| default.to_string())
            .ok_or_else(|| SettingsError::UnknownCoreKey(key.to_string()))?;
        Ok(default)
    }

    /// Writes a setting. Core keys must exist in the registry and match their
    /// declared type; extension keys declare their type on first write.
    pub async fn set(
        &self,
        key: &str,
        value: &str,
        ext_type: Option<SettingType>,
    ) -> Result<Setting, MbError> {
        let value_type = if key.starts_with(CORE_SETTING_PREFIX) {
            if key == mb_schema::DB_VERSION_KEY {
                Err(SettingsError::ReadOnlyKey(key.to_string()))?;
            }
            CORE_SETTINGS
                .iter()
                .find(|(core_key, _, _)| *core_key == key)
                .map(|(_, value_type, _)| *value_type)
                .ok_or_else(|| SettingsError::UnknownCoreKey(key.to_string()))?
        } else if key.starts_with(EXT_SETTING_PREFIX) {
            match self.get(key).await? {
                Some(existing) => existing.value_type(),
                None => ext_type.unwrap_or(SettingType::String),
            }
        } else {
            Err(SettingsError::InvalidKeyPrefix(
                CORE_SETTING_PREFIX,
                EXT_SETTING_PREFIX,
                key.to_string(),
            ))?
        };

        if !value_type.validates(value) {
            Err(SettingsError::TypeMismatch(
                key.to_string(),
                value.to_string(),
                value_type,
            ))?;
        }

        let now = UniqueUtc::now_millis();
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, value_type, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ON CONFLICT (key) DO UPDATE SET value = ?2, updated_at = ?4
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(value_type)
        .bind(now)
        .execute(self.db.writer())
        .await
        .map_err(SettingsError::Sql)?;
        Ok(self.get(key).await?.expect("setting was just written"))
    }

    // ------------------------------------------------------------ typed access

    pub async fn instance_name(&self) -> Result<String, MbError> {
        self.effective(keys::INSTANCE_NAME).await
    }

    pub async fn storage_enabled(&self) -> Result<bool, MbError> {
        Ok(self.effective(keys::STORAGE_ENABLED).await? == "true")
    }

    pub async fn jobs_enabled(&self) -> Result<bool, MbError> {
        Ok(self.effective(keys::JOBS_ENABLED).await? == "true")
    }

    async fn int(&self, key: &str) -> Result<i64, MbError> {
        // stored values were validated on write; defaults are well-formed
        Ok(self.effective(key).await?.parse::<i64>().unwrap_or(0))
    }

    pub async fn pool_size(&self) -> Result<usize, MbError> {
        Ok(self.int(keys::POOL_SIZE).await? as usize)
    }

    pub async fn cold_start_ttl(&self) -> Result<Duration, MbError> {
        Ok(Duration::from_secs(
            self.int(keys::COLD_START_TTL_SECONDS).await? as u64,
        ))
    }

    pub async fn spawn_cap(&self) -> Result<usize, MbError> {
        Ok(self.int(keys::SPAWN_CAP).await? as usize)
    }
}

#[async_trait]
impl LimitsSource for SettingsService {
    async fn limits(&self) -> Result<EngineLimits, MbError> {
        Ok(EngineLimits {
            max_concurrent_executions: self.int(keys::MAX_CONCURRENT_EXECUTIONS).await? as u64,
            max_concurrent_functions_per_user: self
                .int(keys::MAX_CONCURRENT_FUNCTIONS_PER_USER)
                .await? as u64,
            function_timeout: Duration::from_secs(
                self.int(keys::FUNCTION_TIMEOUT_SECONDS).await? as u64,
            ),
        })
    }
}

#[async_trait]
impl SchedulerLimitsSource for SettingsService {
    async fn max_schedules_per_tick(&self) -> Result<u64, MbError> {
        Ok(self.int(keys::MAX_SCHEDULES_PER_TICK).await? as u64)
    }
}
