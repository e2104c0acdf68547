//
// Copyright 2025 Tabs Data Inc.
//

use mb_error::mb_error;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the static configuration file inside the instance directory.
pub const CONFIG_FILE: &str = "minibase.toml";

/// Name of the system database file inside the instance directory.
pub const DATABASE_FILE: &str = "minibase.db";

/// Name of the file persisting the generated JWT secret.
pub const SECRET_FILE: &str = ".jwt_secret";

/// Name of the rate limit backend store file.
pub const RATE_LIMIT_FILE: &str = "rate_limits.db";

pub const FUNCTIONS_DIR: &str = "functions";
pub const EXTENSIONS_DIR: &str = "extensions";
pub const ENVS_DIR: &str = "envs";
pub const STORAGE_DIR: &str = "storage";
pub const LOG_DIR: &str = "log";

#[mb_error]
pub enum InstanceError {
    #[error("Cannot create instance directory {0}: {1}")]
    CannotCreateDir(String, #[source] std::io::Error) = 7000,
    #[error("Cannot write instance file {0}: {1}")]
    CannotWriteFile(String, #[source] std::io::Error) = 7001,
}

/// Filesystem layout of a minibase instance.
///
/// All server state lives under a single instance directory: the system database,
/// the functions and extensions directories, prepared worker environments, file
/// storage and logs.
#[derive(Debug, Clone)]
pub struct Instance {
    root: PathBuf,
}

impl Instance {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn database_file(&self) -> PathBuf {
        self.root.join(DATABASE_FILE)
    }

    pub fn secret_file(&self) -> PathBuf {
        self.root.join(SECRET_FILE)
    }

    pub fn rate_limit_file(&self) -> PathBuf {
        self.root.join(RATE_LIMIT_FILE)
    }

    pub fn functions_dir(&self) -> PathBuf {
        self.root.join(FUNCTIONS_DIR)
    }

    pub fn extensions_dir(&self) -> PathBuf {
        self.root.join(EXTENSIONS_DIR)
    }

    pub fn envs_dir(&self) -> PathBuf {
        self.root.join(ENVS_DIR)
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.root.join(STORAGE_DIR)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join(LOG_DIR)
    }

    /// Returns whether the instance has been initialized (the instance directory
    /// exists and contains the system database).
    pub fn initialized(&self) -> bool {
        self.database_file().exists()
    }

    /// Creates the instance directory tree. Existing directories are left untouched.
    pub fn create_dirs(&self) -> Result<(), InstanceError> {
        for dir in [
            self.root.clone(),
            self.functions_dir(),
            self.extensions_dir(),
            self.envs_dir(),
            self.storage_dir(),
            self.log_dir(),
        ] {
            fs::create_dir_all(&dir).map_err(|err| {
                InstanceError::CannotCreateDir(dir.to_string_lossy().to_string(), err)
            })?;
        }
        Ok(())
    }

    /// Writes a file inside the instance directory, creating parents as needed.
    pub fn write_file(&self, relative: &Path, content: &str) -> Result<PathBuf, InstanceError> {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                InstanceError::CannotCreateDir(parent.to_string_lossy().to_string(), err)
            })?;
        }
        fs::write(&path, content).map_err(|err| {
            InstanceError::CannotWriteFile(path.to_string_lossy().to_string(), err)
        })?;
        Ok(path)
    }
}
