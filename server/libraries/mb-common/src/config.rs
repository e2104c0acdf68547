//
// Copyright 2025 Tabs Data Inc.
//

use crate::env::MB_ENV_PREFIX;
use crate::instance::Instance;
use config::{Config, Environment, File, FileFormat};
use getset::{CopyGetters, Getters};
use mb_error::mb_error;
use serde::Deserialize;
use std::path::PathBuf;

/// Default static configuration, embedded in the binary. Everything in
/// `minibase.toml` and the `MB_*` environment overrides it.
pub const DEFAULT_CONFIG: &str =
    include_str!("../../../binaries/mb-server/resources/config/minibase.toml");

/// Separator between section and key in environment overrides
/// (`MB_SERVER__BIND`, `MB_DATABASE__URL`, ...).
const ENV_SEPARATOR: &str = "__";

#[mb_error]
pub enum ConfigError {
    #[error("Cannot load static configuration: {0}")]
    CannotLoad(#[source] config::ConfigError) = 0,
    #[error("Invalid static configuration: {0}")]
    Invalid(#[source] config::ConfigError) = 1,
}

/// Static configuration of the server, loaded once at start. Runtime settings live
/// in the database and are served by the settings service.
#[derive(Debug, Clone, Deserialize, Getters)]
#[getset(get = "pub")]
pub struct ServerConfig {
    server: NetworkConfig,
    database: DatabaseConfig,
    jwt: JwtConfig,
    functions: FunctionsConfig,
    extensions: ExtensionsConfig,
    envs: EnvsConfig,
    scheduler: SchedulerConfig,
    rate_limit: RateLimitConfig,
    cors: CorsConfig,
    storage: StorageConfig,
    assets: AssetsConfig,
    email: EmailConfig,
}

impl ServerConfig {
    /// Loads the static configuration: embedded defaults, then the instance
    /// `minibase.toml` when present, then `MB_*` environment variables.
    pub fn load(instance: &Instance) -> Result<ServerConfig, ConfigError> {
        let config_file = instance.config_file();
        let config = Config::builder()
            .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
            .add_source(File::from(config_file).required(false))
            .add_source(Environment::with_prefix(MB_ENV_PREFIX).separator(ENV_SEPARATOR))
            .build()
            .map_err(ConfigError::CannotLoad)?;
        config.try_deserialize().map_err(ConfigError::Invalid)
    }

    /// The database file, resolved against the instance directory when not configured.
    pub fn database_file(&self, instance: &Instance) -> PathBuf {
        if self.database.url.is_empty() {
            instance.database_file()
        } else {
            PathBuf::from(&self.database.url)
        }
    }

    /// The functions directory, resolved against the instance directory.
    pub fn functions_dir(&self, instance: &Instance) -> PathBuf {
        resolve_dir(instance, &self.functions.dir)
    }

    /// The extensions directory, resolved against the instance directory.
    pub fn extensions_dir(&self, instance: &Instance) -> PathBuf {
        resolve_dir(instance, &self.extensions.dir)
    }

    /// The worker environments directory, resolved against the instance directory.
    pub fn envs_dir(&self, instance: &Instance) -> PathBuf {
        resolve_dir(instance, &self.envs.dir)
    }

    /// The file storage directory, resolved against the instance directory.
    pub fn storage_dir(&self, instance: &Instance) -> PathBuf {
        resolve_dir(instance, &self.storage.dir)
    }
}

fn resolve_dir(instance: &Instance, dir: &str) -> PathBuf {
    let path = PathBuf::from(dir);
    if path.is_absolute() {
        path
    } else {
        instance.root().join(path)
    }
}

#[derive(Debug, Clone, Deserialize, Getters)]
#[getset(get = "pub")]
pub struct NetworkConfig {
    bind: String,
}

#[derive(Debug, Clone, Deserialize, Getters, CopyGetters)]
pub struct DatabaseConfig {
    #[getset(get = "pub")]
    url: String,
    #[getset(get_copy = "pub")]
    min_connections: u32,
    #[getset(get_copy = "pub")]
    max_connections: u32,
}

#[derive(Debug, Clone, Deserialize, Getters, CopyGetters)]
pub struct JwtConfig {
    #[getset(get = "pub")]
    secret: String,
    #[getset(get_copy = "pub")]
    access_token_expiration_seconds: i64,
    #[getset(get_copy = "pub")]
    refresh_token_expiration_seconds: i64,
}

#[derive(Debug, Clone, Deserialize, Getters)]
#[getset(get = "pub")]
pub struct FunctionsConfig {
    dir: String,
}

#[derive(Debug, Clone, Deserialize, Getters)]
#[getset(get = "pub")]
pub struct ExtensionsConfig {
    dir: String,
}

#[derive(Debug, Clone, Deserialize, Getters)]
#[getset(get = "pub")]
pub struct EnvsConfig {
    dir: String,
    uv_program: String,
    python_program: String,
}

#[derive(Debug, Clone, Deserialize, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct SchedulerConfig {
    tick_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Getters)]
#[getset(get = "pub")]
pub struct RateLimitConfig {
    backend: String,
    store: String,
}

#[derive(Debug, Clone, Deserialize, Getters)]
#[getset(get = "pub")]
pub struct CorsConfig {
    origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Getters)]
#[getset(get = "pub")]
pub struct StorageConfig {
    dir: String,
}

#[derive(Debug, Clone, Deserialize, Getters)]
#[getset(get = "pub")]
pub struct AssetsConfig {
    public_dir: String,
    admin_dir: String,
}

#[derive(Debug, Clone, Deserialize, Getters)]
#[getset(get = "pub")]
pub struct EmailConfig {
    backend: String,
    from_address: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use testdir::testdir;

    #[test]
    fn test_defaults() {
        let instance = Instance::new(testdir!());
        let config = ServerConfig::load(&instance).unwrap();
        assert_eq!(config.server().bind(), "127.0.0.1:8090");
        assert_eq!(config.scheduler().tick_seconds(), 5);
        assert_eq!(config.rate_limit().backend(), "memory");
        assert!(config.jwt().secret().is_empty());
        assert_eq!(
            config.database_file(&instance),
            instance.root().join("minibase.db")
        );
    }

    #[test]
    fn test_instance_file_overrides_defaults() {
        let dir = testdir!();
        let instance = Instance::new(&dir);
        instance.create_dirs().unwrap();
        std::fs::write(
            instance.config_file(),
            r#"
            [server]
            bind = "0.0.0.0:9000"

            [scheduler]
            tick_seconds = 1
            "#,
        )
        .unwrap();
        let config = ServerConfig::load(&instance).unwrap();
        assert_eq!(config.server().bind(), "0.0.0.0:9000");
        assert_eq!(config.scheduler().tick_seconds(), 1);
        // untouched sections keep their defaults
        assert_eq!(config.database().max_connections(), 10);
    }

    #[test]
    fn test_resolved_dirs() {
        let dir = testdir!();
        let instance = Instance::new(&dir);
        let config = ServerConfig::load(&instance).unwrap();
        assert_eq!(config.functions_dir(&instance), dir.join("functions"));
        assert_eq!(config.envs_dir(&instance), dir.join("envs"));
        assert_eq!(config.storage_dir(&instance), dir.join("storage"));
    }
}
