//
// Copyright 2025 Tabs Data Inc.
//

use crate::context::Api;
use crate::layers::auth::CurrentUser;
use crate::status::{ApiResult, ErrorStatus};
use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use mb_common::id::Id;
use mb_error::{ApiError, api_error};
use mb_objects::types::record::Record;
use mb_services::auth::Principal;
use serde::Deserialize;
use serde_json::{Map, Value};
use utoipa::ToSchema;

pub fn routes() -> Router<Api> {
    Router::new()
        .route(
            "/api/collections/{name}/records",
            get(list).post(create),
        )
        .route(
            "/api/collections/{name}/records/{id}",
            get(read).patch(update).delete(delete),
        )
}

const DEFAULT_LIMIT: u64 = 50;
const MAX_LIMIT: u64 = 500;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// JSON object of field equality filters.
    pub filter: Option<String>,
}

#[derive(Debug, serde::Serialize, ToSchema)]
pub struct RecordPageBody {
    #[schema(value_type = Vec<Object>)]
    pub records: Vec<Record>,
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
}

fn parse_id(id: &str) -> Result<Id, ErrorStatus> {
    Id::try_from(id).map_err(|err| ErrorStatus(err.into()))
}

fn parse_filter(filter: &Option<String>) -> Result<Option<Map<String, Value>>, ErrorStatus> {
    match filter {
        None => Ok(None),
        Some(raw) => {
            let value: Value = serde_json::from_str(raw).map_err(|err| {
                ErrorStatus(api_error!(ApiError::InputError, "invalid filter: {err}"))
            })?;
            match value {
                Value::Object(map) => Ok(Some(map)),
                _ => Err(ErrorStatus(api_error!(
                    ApiError::InputError,
                    "filter must be a JSON object"
                ))),
            }
        }
    }
}

fn body_object(body: Value) -> Result<Map<String, Value>, ErrorStatus> {
    match body {
        Value::Object(map) => Ok(map),
        _ => Err(ErrorStatus(api_error!(
            ApiError::InputError,
            "record body must be a JSON object"
        ))),
    }
}

async fn list(
    State(api): State<Api>,
    _user: CurrentUser,
    Path(name): Path<String>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<RecordPageBody>> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let offset = params.offset.unwrap_or(0);
    let filter = parse_filter(&params.filter)?;
    let page = api
        .collections
        .list_records(&name, limit, offset, filter.as_ref())
        .await?;
    Ok(Json(RecordPageBody {
        total: page.total(),
        records: page.records().clone(),
        limit,
        offset,
    }))
}

async fn create(
    State(api): State<Api>,
    CurrentUser(principal): CurrentUser,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Record>> {
    let data = body_object(body)?;
    let owner = match &principal {
        Principal::User { user, .. } => Some(user.id()),
        Principal::AppToken(_) => None,
    };
    let record = api.collections.create_record(&name, &data, owner).await?;
    Ok(Json(record))
}

async fn read(
    State(api): State<Api>,
    _user: CurrentUser,
    Path((name, id)): Path<(String, String)>,
) -> ApiResult<Json<Record>> {
    let record = api.collections.get_record(&name, parse_id(&id)?).await?;
    Ok(Json(record))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateRecord {
    #[schema(value_type = Object)]
    pub data: Value,
    /// The record version last read; a stale version is a conflict.
    #[serde(default)]
    pub version: Option<i64>,
}

async fn update(
    State(api): State<Api>,
    _user: CurrentUser,
    Path((name, id)): Path<(String, String)>,
    Json(request): Json<UpdateRecord>,
) -> ApiResult<Json<Record>> {
    let patch = body_object(request.data)?;
    let record = api
        .collections
        .update_record(&name, parse_id(&id)?, &patch, request.version)
        .await?;
    Ok(Json(record))
}

async fn delete(
    State(api): State<Api>,
    _user: CurrentUser,
    Path((name, id)): Path<(String, String)>,
) -> ApiResult<()> {
    Ok(api.collections.delete_record(&name, parse_id(&id)?).await?)
}
