//
// Copyright 2025 Tabs Data Inc.
//

use crate::context::Api;
use crate::layers::auth::{AdminUser, CurrentUser};
use crate::status::ApiResult;
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use mb_collections::store::CollectionStatus;
use mb_objects::types::collection::{Collection, FieldDef, FieldList};
use serde::Deserialize;
use utoipa::ToSchema;

pub fn routes() -> Router<Api> {
    Router::new()
        .route("/api/collections", get(list).post(create))
        .route(
            "/api/collections/{name}",
            get(read).patch(update).delete(delete),
        )
        .route("/api/admin/collections/status", get(status))
}

async fn list(State(api): State<Api>, _user: CurrentUser) -> ApiResult<Json<Vec<Collection>>> {
    Ok(Json(api.collections.list_collections().await?))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateCollection {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[schema(value_type = Vec<Object>)]
    pub schema: Vec<FieldDef>,
}

async fn create(
    State(api): State<Api>,
    _admin: AdminUser,
    Json(request): Json<CreateCollection>,
) -> ApiResult<Json<Collection>> {
    let label = request.label.unwrap_or_else(|| request.name.clone());
    let collection = api
        .collections
        .create_collection(&request.name, &label, FieldList(request.schema))
        .await?;
    Ok(Json(collection))
}

async fn read(
    State(api): State<Api>,
    _user: CurrentUser,
    Path(name): Path<String>,
) -> ApiResult<Json<Collection>> {
    Ok(Json(api.collections.get_collection(&name).await?))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateCollection {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<Vec<Object>>)]
    pub schema: Option<Vec<FieldDef>>,
}

async fn update(
    State(api): State<Api>,
    _admin: AdminUser,
    Path(name): Path<String>,
    Json(request): Json<UpdateCollection>,
) -> ApiResult<Json<Collection>> {
    if let Some(label) = &request.label {
        api.collections.set_label(&name, label).await?;
    }
    if let Some(schema) = request.schema {
        api.collections
            .update_schema(&name, FieldList(schema))
            .await?;
    }
    Ok(Json(api.collections.get_collection(&name).await?))
}

async fn delete(
    State(api): State<Api>,
    _admin: AdminUser,
    Path(name): Path<String>,
) -> ApiResult<()> {
    Ok(api.collections.drop_collection(&name).await?)
}

async fn status(
    State(api): State<Api>,
    _admin: AdminUser,
) -> ApiResult<Json<Vec<CollectionStatus>>> {
    Ok(Json(api.collections.status().await?))
}
