//
// Copyright 2025 Tabs Data Inc.
//

//! Assembly of a running server from an instance directory: static config,
//! database, services, execution engine, scheduler and API server. All wiring
//! is explicit; the only global is the tracing subscriber.

use mb_apiserver::apiserver::ApiServer;
use mb_apiserver::context::{Api, ApiContext};
use mb_collections::store::CollectionStore;
use mb_common::config::ServerConfig;
use mb_common::id;
use mb_common::instance::Instance;
use mb_database::sql::{DbPool, SqliteConfigBuilder};
use mb_error::MbError;
use mb_execution::calls::CallStore;
use mb_execution::counter::{CounterBackend, MemoryCounterBackend, SqliteCounterBackend};
use mb_execution::engine::ExecutionEngine;
use mb_execution::pool::{PoolConfig, ProcessPool};
use mb_execution::resolver::{PythonLauncher, UvResolver};
use mb_registry::registry::FunctionRegistry;
use mb_scheduler::scheduler::Scheduler;
use mb_scheduler::store::ScheduleStore;
use mb_security::jwt::JwtKeys;
use mb_services::auth::AuthService;
use mb_services::files::FileStore;
use mb_services::settings::SettingsService;
use mb_services::tokens::TokenService;
use mb_services::users::UserService;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Name of the server-owned application token injected into workers.
const WORKER_TOKEN_NAME: &str = "worker";

/// Grace period for in-flight work on shutdown.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Everything a running server is made of.
pub struct Server {
    pub api: Api,
    pub apiserver: ApiServer,
    pub scheduler: Scheduler,
}

/// Opens the system database of an instance.
pub async fn open_db(config: &ServerConfig, instance: &Instance) -> Result<DbPool, MbError> {
    let db_config = SqliteConfigBuilder::default()
        .url(config.database_file(instance).to_str().map(str::to_string))
        .min_connections(config.database().min_connections())
        .max_connections(config.database().max_connections())
        .build()
        .map_err(|err| {
            mb_error::api_error!(mb_error::ApiError::InternalError, "invalid database config: {err}")
        })?;
    Ok(mb_database::db(&db_config).await?)
}

/// The JWT secret: configured, or generated once and persisted in the instance.
pub fn jwt_secret(config: &ServerConfig, instance: &Instance) -> Result<String, MbError> {
    if !config.jwt().secret().is_empty() {
        return Ok(config.jwt().secret().clone());
    }
    let secret_file = instance.secret_file();
    if let Ok(secret) = std::fs::read_to_string(&secret_file) {
        let secret = secret.trim().to_string();
        if !secret.is_empty() {
            return Ok(secret);
        }
    }
    let secret = mb_security::generate_secret();
    instance.write_file(std::path::Path::new(mb_common::instance::SECRET_FILE), &secret)?;
    info!("Generated JWT secret into {:?}", secret_file);
    Ok(secret)
}

/// Builds the full server. The pool is sized from runtime settings read once at
/// boot; concurrency caps and timeouts are re-read on every invocation.
pub async fn build(config: &ServerConfig, instance: &Instance) -> Result<Server, MbError> {
    let db = open_db(config, instance).await?;

    let keys = JwtKeys::new(
        &jwt_secret(config, instance)?,
        config.jwt().access_token_expiration_seconds(),
        config.jwt().refresh_token_expiration_seconds(),
    );

    let users = UserService::new(db.clone());
    let auth = AuthService::new(db.clone(), keys);
    let tokens = TokenService::new(db.clone());
    let settings = SettingsService::new(db.clone());
    let files = FileStore::new(config.storage_dir(instance));
    let collections = CollectionStore::new(db.clone());
    let registry = Arc::new(FunctionRegistry::new(
        db.clone(),
        config.functions_dir(instance),
    ));
    let schedules = ScheduleStore::new(db.clone());

    let counters: Arc<dyn CounterBackend> = match config.rate_limit().backend().as_str() {
        "sqlite" => {
            let store_file = instance.root().join(config.rate_limit().store());
            Arc::new(SqliteCounterBackend::new(&store_file).await?)
        }
        other => {
            if other != "memory" {
                warn!("Unknown rate limit backend '{}', using memory", other);
            }
            Arc::new(MemoryCounterBackend::new())
        }
    };

    let (_, worker_token) = tokens.recycle(WORKER_TOKEN_NAME).await?;
    let envs_dir = config.envs_dir(instance);
    let resolver = UvResolver::new(
        envs_dir.clone(),
        config.envs().uv_program().clone(),
        config.envs().python_program().clone(),
    );
    let launcher = PythonLauncher::new(
        Box::new(resolver),
        envs_dir.join("scripts"),
        format!("http://{}", config.server().bind()),
        worker_token,
    );

    let pool_config = PoolConfig {
        pool_size: settings.pool_size().await?,
        cold_start_ttl: settings.cold_start_ttl().await?,
        spawn_cap: settings.spawn_cap().await?,
    };
    let pool = Arc::new(ProcessPool::new(pool_config, Box::new(launcher)));

    let engine = ExecutionEngine::new(
        CallStore::new(db.clone()),
        Arc::clone(&registry),
        pool,
        counters,
        Arc::new(settings.clone()),
    );

    let scheduler = Scheduler::new(
        schedules.clone(),
        engine.clone(),
        Arc::new(settings.clone()),
        Duration::from_secs(config.scheduler().tick_seconds().max(1)),
    );

    let api: Api = Arc::new(ApiContext {
        db,
        auth,
        users,
        tokens,
        settings,
        files,
        collections,
        registry,
        engine,
        schedules,
    });

    let apiserver = ApiServer::new(
        Arc::clone(&api),
        config.server().bind().clone(),
        config.cors().origins().clone(),
    );

    Ok(Server {
        api,
        apiserver,
        scheduler,
    })
}

/// Runs the server until a termination signal: recovery sweep, scheduler task,
/// API server, then a bounded drain.
pub async fn serve(server: Server, reload: bool) -> Result<(), MbError> {
    let recovered = server.api.engine.recover().await?;
    if recovered > 0 {
        warn!("Recovered {} abandoned function calls", recovered);
    }
    if reload {
        let synced = server.api.registry.sync_from_dir(id::system_id()).await?;
        info!("Synced {} function sources from the functions directory", synced);
    }

    let shutdown = CancellationToken::new();

    let scheduler = server.scheduler;
    let scheduler_shutdown = shutdown.clone();
    let scheduler_task = tokio::spawn(async move {
        scheduler.run(scheduler_shutdown).await;
    });

    let apiserver_shutdown = shutdown.clone();
    let apiserver_task = tokio::spawn(server.apiserver.run(apiserver_shutdown));

    let _ = mb_common::signal::terminate().await;
    info!("Shutting down");
    shutdown.cancel();

    // bounded drain of the scheduler and the HTTP server
    let drain = async {
        let _ = scheduler_task.await;
        let _ = apiserver_task.await;
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!("Drain exceeded {:?}, exiting anyway", SHUTDOWN_GRACE);
    }
    Ok(())
}
