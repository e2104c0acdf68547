//
// Copyright 2025 Tabs Data Inc.
//

use crate::context::Api;
use crate::layers::auth::{AdminUser, CurrentUser, MaybeUser, caller_of};
use crate::status::ApiResult;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use mb_objects::types::call::{CallStatus, FunctionCall, TriggerType, error_types};
use mb_objects::types::function::{FunctionDef, FunctionVersion};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use utoipa::ToSchema;

pub fn routes() -> Router<Api> {
    Router::new()
        .route("/api/functions", get(list))
        .route("/api/functions/{name}", post(invoke))
        .route("/api/admin/functions", post(upload))
        .route("/api/admin/functions/{name}/schema", get(schema))
        .route("/api/admin/functions/{name}/versions", get(versions))
}

async fn list(State(api): State<Api>, _user: CurrentUser) -> ApiResult<Json<Vec<FunctionDef>>> {
    Ok(Json(api.registry.list_defs().await?))
}

/// The invocation response body.
#[derive(Debug, Serialize, ToSchema)]
pub struct InvokeResponse {
    pub call_id: String,
    pub status: String,
    #[schema(value_type = Option<Object>)]
    pub result: Option<Value>,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: Option<i64>,
    pub version_hash: Option<String>,
}

impl InvokeResponse {
    fn of(call: &FunctionCall, version_hash: Option<String>) -> Self {
        Self {
            call_id: call.id().to_string(),
            status: call.status().to_string(),
            result: call.output().as_ref().map(|payload| payload.0.clone()),
            error_type: call.error_type().clone(),
            error_message: call.error_message().clone(),
            duration_ms: call.duration_ms(),
            version_hash,
        }
    }
}

async fn invoke(
    State(api): State<Api>,
    MaybeUser(principal): MaybeUser,
    Path(name): Path<String>,
    Json(input): Json<Value>,
) -> ApiResult<(StatusCode, Json<InvokeResponse>)> {
    let caller = caller_of(&principal);
    let call = api
        .engine
        .invoke(&name, input, caller, TriggerType::Api)
        .await?;

    let version_hash = match call.version_id() {
        Some(version_id) => api
            .registry
            .get_version(version_id)
            .await
            .ok()
            .map(|version| version.content_hash().clone()),
        None => None,
    };

    // client faults and infrastructure timeouts keep their status codes; calls
    // that failed inside user code are complete requests and return 200
    let status = if call.error_type().as_deref() == Some(error_types::RATE_LIMITED) {
        StatusCode::TOO_MANY_REQUESTS
    } else if call.status() == CallStatus::TimedOut {
        StatusCode::GATEWAY_TIMEOUT
    } else {
        StatusCode::OK
    };
    Ok((status, Json(InvokeResponse::of(&call, version_hash))))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UploadFunction {
    pub name: String,
    pub source: String,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UploadResponse {
    #[schema(value_type = Object)]
    pub version: FunctionVersion,
    /// Whether the worker's describe response refreshed the definition metadata.
    pub described: bool,
}

async fn upload(
    State(api): State<Api>,
    AdminUser(principal): AdminUser,
    Json(request): Json<UploadFunction>,
) -> ApiResult<Json<UploadResponse>> {
    let version = api
        .registry
        .put_version(&request.name, &request.source, &request.notes, principal.id())
        .await?;

    // metadata comes from the worker's describe response, not from parsing the
    // script; a worker that cannot start yet is not an upload failure
    let described = match api.engine.describe(&request.name).await {
        Ok(_) => true,
        Err(err) => {
            warn!("Describe of '{}' failed: {}", request.name, err);
            false
        }
    };
    Ok(Json(UploadResponse { version, described }))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FunctionSchema {
    #[schema(value_type = Object)]
    pub definition: FunctionDef,
    pub active_version_id: Option<String>,
    pub active_content_hash: Option<String>,
    pub inline_deps: Vec<String>,
}

async fn schema(
    State(api): State<Api>,
    _admin: AdminUser,
    Path(name): Path<String>,
) -> ApiResult<Json<FunctionSchema>> {
    let definition = api.registry.get_def(&name).await?;
    let active = api.registry.active_version(&name).await.ok();
    Ok(Json(FunctionSchema {
        definition,
        active_version_id: active.as_ref().map(|v| v.id().to_string()),
        active_content_hash: active.as_ref().map(|v| v.content_hash().clone()),
        inline_deps: active.map(|v| v.inline_deps().0.clone()).unwrap_or_default(),
    }))
}

async fn versions(
    State(api): State<Api>,
    _admin: AdminUser,
    Path(name): Path<String>,
) -> ApiResult<Json<Vec<FunctionVersion>>> {
    Ok(Json(api.registry.list_versions(&name).await?))
}
