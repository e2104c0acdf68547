//
// Copyright 2025 Tabs Data Inc.
//

use crate::context::Api;
use crate::layers::auth::AdminUser;
use crate::status::{ApiResult, ErrorStatus};
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use mb_common::id::Id;
use mb_objects::types::schedule::{FunctionSchedule, ScheduleSpec};
use mb_scheduler::store::SchedulePatch;
use serde::Deserialize;
use serde_json::Value;
use utoipa::ToSchema;

pub fn routes() -> Router<Api> {
    Router::new()
        .route("/api/admin/schedules", get(list).post(create))
        .route(
            "/api/admin/schedules/{id}",
            get(read).patch(update).delete(delete),
        )
}

fn parse_id(id: &str) -> Result<Id, ErrorStatus> {
    Id::try_from(id).map_err(|err| ErrorStatus(err.into()))
}

async fn list(
    State(api): State<Api>,
    _admin: AdminUser,
) -> ApiResult<Json<Vec<FunctionSchedule>>> {
    Ok(Json(api.schedules.list().await?))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateSchedule {
    pub name: String,
    pub function_name: String,
    #[schema(value_type = Object)]
    pub schedule: ScheduleSpec,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub input: Option<Value>,
}

async fn create(
    State(api): State<Api>,
    _admin: AdminUser,
    Json(request): Json<CreateSchedule>,
) -> ApiResult<Json<FunctionSchedule>> {
    // the function must exist before it can be scheduled
    api.registry.get_def(&request.function_name).await?;
    let schedule = api
        .schedules
        .create(
            &request.name,
            &request.function_name,
            request.schedule,
            request.input.unwrap_or(Value::Null),
        )
        .await?;
    Ok(Json(schedule))
}

async fn read(
    State(api): State<Api>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> ApiResult<Json<FunctionSchedule>> {
    Ok(Json(api.schedules.get(parse_id(&id)?).await?))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateSchedule {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub schedule: Option<ScheduleSpec>,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub input: Option<Value>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

async fn update(
    State(api): State<Api>,
    _admin: AdminUser,
    Path(id): Path<String>,
    Json(request): Json<UpdateSchedule>,
) -> ApiResult<Json<FunctionSchedule>> {
    let patch = SchedulePatch {
        name: request.name,
        spec: request.schedule,
        input: request.input,
        is_active: request.is_active,
    };
    Ok(Json(api.schedules.update(parse_id(&id)?, patch).await?))
}

async fn delete(
    State(api): State<Api>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> ApiResult<()> {
    Ok(api.schedules.delete(parse_id(&id)?).await?)
}
