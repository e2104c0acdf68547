//
// Copyright 2025 Tabs Data Inc.
//

use crate::context::Api;
use crate::layers::auth::AdminUser;
use crate::status::{ApiResult, ErrorStatus};
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use mb_common::id::Id;
use mb_objects::types::token::ApplicationToken;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub fn routes() -> Router<Api> {
    Router::new()
        .route("/api/admin/application-tokens", get(list).post(create))
        .route(
            "/api/admin/application-tokens/{id}",
            axum::routing::patch(update).delete(delete),
        )
}

fn parse_id(id: &str) -> Result<Id, ErrorStatus> {
    Id::try_from(id).map_err(|err| ErrorStatus(err.into()))
}

async fn list(
    State(api): State<Api>,
    _admin: AdminUser,
) -> ApiResult<Json<Vec<ApplicationToken>>> {
    Ok(Json(api.tokens.list().await?))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateToken {
    pub name: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreatedToken {
    #[schema(value_type = Object)]
    pub token: ApplicationToken,
    /// The plaintext secret; shown exactly once.
    pub secret: String,
}

async fn create(
    State(api): State<Api>,
    _admin: AdminUser,
    Json(request): Json<CreateToken>,
) -> ApiResult<Json<CreatedToken>> {
    let (token, secret) = api.tokens.create(&request.name, request.expires_at).await?;
    Ok(Json(CreatedToken { token, secret }))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateToken {
    pub is_active: bool,
}

async fn update(
    State(api): State<Api>,
    _admin: AdminUser,
    Path(id): Path<String>,
    Json(request): Json<UpdateToken>,
) -> ApiResult<Json<ApplicationToken>> {
    Ok(Json(
        api.tokens
            .set_active(parse_id(&id)?, request.is_active)
            .await?,
    ))
}

async fn delete(
    State(api): State<Api>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> ApiResult<()> {
    Ok(api.tokens.delete(parse_id(&id)?).await?)
}
