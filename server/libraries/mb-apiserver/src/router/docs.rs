//
// Copyright 2025 Tabs Data Inc.
//

use crate::context::Api;
use crate::router::{auth, calls, collections, files, functions, records, schedules, settings, tokens};
use crate::status::ErrorBody;
use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

/// The OpenAPI document of the REST surface, served as plain JSON. The admin UI
/// consumes it; there is no embedded UI in the server.
#[derive(OpenApi)]
#[openapi(
    info(title = "minibase", description = "Self-hosted backend service"),
    components(schemas(
        ErrorBody,
        auth::Login,
        auth::Refresh,
        auth::SetupStatus,
        collections::CreateCollection,
        collections::UpdateCollection,
        records::RecordPageBody,
        records::UpdateRecord,
        functions::InvokeResponse,
        functions::UploadFunction,
        functions::UploadResponse,
        functions::FunctionSchema,
        schedules::CreateSchedule,
        schedules::UpdateSchedule,
        calls::CallPage,
        settings::SettingView,
        settings::SettingWrite,
        tokens::CreateToken,
        tokens::CreatedToken,
        tokens::UpdateToken,
        files::UploadedFile,
    ))
)]
pub struct ApiDocs;

pub fn routes() -> Router<Api> {
    Router::new().route("/api/docs/openapi.json", get(openapi))
}

async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDocs::openapi())
}
