//
// Copyright 2025 Tabs Data Inc.
//

//! Worker environment preparation and process launching.
//!
//! The resolver turns an inline dependency list into a prepared environment
//! directory, caching by the hash of the list. The default implementation shells
//! out to `uv`; a script without dependencies shares one base environment.
//! Workers stay oblivious to HTTP and the database: they get input on stdin and
//! reach back only through the endpoint and token injected via environment
//! variables at spawn.

use async_trait::async_trait;
use data_encoding::HEXLOWER;
use mb_error::{MbError, mb_error};
use mb_objects::types::function::FunctionVersion;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// The runner shim written into every prepared environment.
pub const RUNNER_SOURCE: &str = include_str!("../resources/runner.py");

/// File name of the runner shim inside an environment.
pub const RUNNER_FILE: &str = "runner.py";

/// Marker file flagging a fully prepared environment.
const READY_MARKER: &str = ".ready";

#[cfg(not(target_os = "windows"))]
pub const PYTHON_BIN_FOLDER: &str = "bin";
#[cfg(not(target_os = "windows"))]
pub const PYTHON_BIN_FILE: &str = "python";

#[cfg(target_os = "windows")]
pub const PYTHON_BIN_FOLDER: &str = "Scripts";
#[cfg(target_os = "windows")]
pub const PYTHON_BIN_FILE: &str = "python.exe";

/// Environment variables injected into workers.
pub const ENV_SERVER_URL: &str = "MB_SERVER_URL";
pub const ENV_SERVER_TOKEN: &str = "MB_SERVER_TOKEN";

#[mb_error]
pub enum ResolverError {
    #[error("Cannot prepare environment directory {0}: {1}")]
    CannotCreateEnvDir(String, #[source] std::io::Error) = 7000,
    #[error("Cannot run '{0}': {1}")]
    CannotRunProgram(String, #[source] std::io::Error) = 7001,
    #[error("Environment preparation failed: {0}")]
    PreparationFailed(String) = 7002,
    #[error("Cannot stage worker script {0}: {1}")]
    CannotStageScript(String, #[source] std::io::Error) = 7003,
}

/// Produces a prepared environment directory for a dependency list.
#[async_trait]
pub trait EnvResolver: Send + Sync {
    async fn prepare(&self, deps: &[String]) -> Result<PathBuf, MbError>;
}

/// Resolver shelling out to `uv` for environment creation and installs.
pub struct UvResolver {
    envs_dir: PathBuf,
    uv_program: String,
    python_program: String,
}

impl UvResolver {
    pub fn new(envs_dir: PathBuf, uv_program: String, python_program: String) -> Self {
        Self {
            envs_dir,
            uv_program,
            python_program,
        }
    }

    /// The interpreter inside a prepared environment.
    pub fn interpreter(env_path: &Path) -> PathBuf {
        env_path.join(PYTHON_BIN_FOLDER).join(PYTHON_BIN_FILE)
    }

    fn env_path(&self, deps: &[String]) -> PathBuf {
        let mut hasher = Sha256::new();
        for dep in deps {
            hasher.update(dep.as_bytes());
            hasher.update(b"\n");
        }
        let digest = HEXLOWER.encode(&hasher.finalize());
        self.envs_dir.join(format!("env-{}", &digest[..12]))
    }

    async fn run(&self, program: &str, args: &[String]) -> Result<(), MbError> {
        debug!("Running '{}' {:?}", program, args);
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|err| ResolverError::CannotRunProgram(program.to_string(), err))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(ResolverError::PreparationFailed(
                stderr.lines().last().unwrap_or("unknown error").to_string(),
            ))?;
        }
        Ok(())
    }
}

#[async_trait]
impl EnvResolver for UvResolver {
    async fn prepare(&self, deps: &[String]) -> Result<PathBuf, MbError> {
        let env_path = self.env_path(deps);
        if env_path.join(READY_MARKER).exists() {
            return Ok(env_path);
        }

        std::fs::create_dir_all(&self.envs_dir).map_err(|err| {
            ResolverError::CannotCreateEnvDir(self.envs_dir.to_string_lossy().to_string(), err)
        })?;

        self.run(
            &self.uv_program,
            &[
                "venv".to_string(),
                "--python".to_string(),
                self.python_program.clone(),
                env_path.to_string_lossy().to_string(),
            ],
        )
        .await?;

        if !deps.is_empty() {
            let mut args = vec![
                "pip".to_string(),
                "install".to_string(),
                "--python".to_string(),
                Self::interpreter(&env_path).to_string_lossy().to_string(),
            ];
            args.extend(deps.iter().cloned());
            self.run(&self.uv_program, &args).await?;
        }

        std::fs::write(env_path.join(RUNNER_FILE), RUNNER_SOURCE).map_err(|err| {
            ResolverError::CannotCreateEnvDir(env_path.to_string_lossy().to_string(), err)
        })?;
        std::fs::write(env_path.join(READY_MARKER), "").map_err(|err| {
            ResolverError::CannotCreateEnvDir(env_path.to_string_lossy().to_string(), err)
        })?;
        info!("Prepared environment {:?} ({} dependencies)", env_path, deps.len());
        Ok(env_path)
    }
}

/// Builds the command a worker process is spawned from. The pool owns the
/// process lifecycle; launchers only decide what to run.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self, version: &FunctionVersion) -> Result<Command, MbError>;
}

/// Launcher running function versions on a prepared Python environment.
pub struct PythonLauncher {
    resolver: Box<dyn EnvResolver>,
    scripts_dir: PathBuf,
    server_url: String,
    server_token: String,
}

impl PythonLauncher {
    pub fn new(
        resolver: Box<dyn EnvResolver>,
        scripts_dir: PathBuf,
        server_url: String,
        server_token: String,
    ) -> Self {
        Self {
            resolver,
            scripts_dir,
            server_url,
            server_token,
        }
    }

    /// Stages the immutable source of a version as the script file workers of
    /// that version run.
    fn stage_script(&self, version: &FunctionVersion) -> Result<PathBuf, MbError> {
        let path = self
            .scripts_dir
            .join(format!("{}-{}.py", version.function_name(), version.id()));
        if !path.exists() {
            std::fs::create_dir_all(&self.scripts_dir).map_err(|err| {
                ResolverError::CannotStageScript(
                    self.scripts_dir.to_string_lossy().to_string(),
                    err,
                )
            })?;
            std::fs::write(&path, version.source_text()).map_err(|err| {
                ResolverError::CannotStageScript(path.to_string_lossy().to_string(), err)
            })?;
        }
        Ok(path)
    }
}

#[async_trait]
impl WorkerLauncher for PythonLauncher {
    async fn launch(&self, version: &FunctionVersion) -> Result<Command, MbError> {
        let env_path = self.resolver.prepare(&version.inline_deps().0).await?;
        let script = self.stage_script(version)?;

        let mut command = Command::new(UvResolver::interpreter(&env_path));
        command
            .arg(env_path.join(RUNNER_FILE))
            .arg(script)
            .env(ENV_SERVER_URL, &self.server_url)
            .env(ENV_SERVER_TOKEN, &self.server_token);
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testdir::testdir;

    #[test]
    fn test_env_path_is_stable_per_dep_list() {
        let resolver = UvResolver::new(testdir!(), "uv".to_string(), "python3".to_string());
        let a = resolver.env_path(&["requests>=2".to_string()]);
        let b = resolver.env_path(&["requests>=2".to_string()]);
        let c = resolver.env_path(&[]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_runner_resource_is_embedded() {
        assert!(RUNNER_SOURCE.contains("def main()"));
        assert!(RUNNER_SOURCE.contains("struct.pack(\">I\""));
    }
}
