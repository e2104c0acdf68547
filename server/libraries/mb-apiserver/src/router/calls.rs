//
// Copyright 2025 Tabs Data Inc.
//

use crate::context::Api;
use crate::layers::auth::AdminUser;
use crate::status::{ApiResult, ErrorStatus};
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use mb_common::id::Id;
use mb_execution::calls::CallFilter;
use mb_objects::types::call::{CallStatus, FunctionCall, TriggerType};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub fn routes() -> Router<Api> {
    Router::new()
        .route("/api/admin/function-calls", get(list))
        .route("/api/admin/function-calls/{id}/cancel", post(cancel))
}

const DEFAULT_LIMIT: u64 = 50;
const MAX_LIMIT: u64 = 500;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub function_name: Option<String>,
    pub status: Option<CallStatus>,
    pub trigger_type: Option<TriggerType>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CallPage {
    #[schema(value_type = Vec<Object>)]
    pub calls: Vec<FunctionCall>,
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
}

async fn list(
    State(api): State<Api>,
    _admin: AdminUser,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<CallPage>> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let offset = params.offset.unwrap_or(0);
    let filter = CallFilter {
        function_name: params.function_name,
        status: params.status,
        trigger_type: params.trigger_type,
    };
    let (calls, total) = api.engine.calls().list(&filter, limit, offset).await?;
    Ok(Json(CallPage {
        calls,
        total,
        limit,
        offset,
    }))
}

async fn cancel(
    State(api): State<Api>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> ApiResult<Json<FunctionCall>> {
    let id = Id::try_from(id.as_str()).map_err(|err| ErrorStatus(err.into()))?;
    Ok(Json(api.engine.cancel(id).await?))
}
