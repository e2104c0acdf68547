//
// Copyright 2025 Tabs Data Inc.
//

use mb_collections::store::CollectionStore;
use mb_database::sql::DbPool;
use mb_execution::engine::ExecutionEngine;
use mb_registry::registry::FunctionRegistry;
use mb_scheduler::store::ScheduleStore;
use mb_services::auth::AuthService;
use mb_services::files::FileStore;
use mb_services::settings::SettingsService;
use mb_services::tokens::TokenService;
use mb_services::users::UserService;
use std::sync::Arc;

/// Shared state of every request handler. One instance per server process,
/// passed around behind an [`Arc`]; no module-level globals.
pub struct ApiContext {
    pub db: DbPool,
    pub auth: AuthService,
    pub users: UserService,
    pub tokens: TokenService,
    pub settings: SettingsService,
    pub files: FileStore,
    pub collections: CollectionStore,
    pub registry: Arc<FunctionRegistry>,
    pub engine: ExecutionEngine,
    pub schedules: ScheduleStore,
}

/// The axum state type.
pub type Api = Arc<ApiContext>;
