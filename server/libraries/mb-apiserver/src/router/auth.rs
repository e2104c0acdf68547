//
// Copyright 2025 Tabs Data Inc.
//

use crate::context::Api;
use crate::layers::auth::CurrentUser;
use crate::status::ApiResult;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use mb_services::auth::{Principal, TokenPair};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub fn routes() -> Router<Api> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/setup-status", get(setup_status))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct Login {
    pub email: String,
    pub password: String,
}

async fn login(State(api): State<Api>, Json(request): Json<Login>) -> ApiResult<Json<TokenPair>> {
    let pair = api
        .auth
        .login(&api.users, &request.email, &request.password)
        .await?;
    Ok(Json(pair))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct Refresh {
    pub refresh_token: String,
}

async fn refresh(
    State(api): State<Api>,
    Json(request): Json<Refresh>,
) -> ApiResult<Json<TokenPair>> {
    Ok(Json(api.auth.refresh(&request.refresh_token).await?))
}

async fn logout(State(api): State<Api>, CurrentUser(principal): CurrentUser) -> ApiResult<()> {
    if let Principal::User { session_id, .. } = principal {
        api.auth.logout(session_id).await?;
    }
    Ok(())
}


#[derive(Debug, Serialize, ToSchema)]
pub struct SetupStatus {
    pub initialized: bool,
}

async fn setup_status(State(api): State<Api>) -> ApiResult<Json<SetupStatus>> {
    Ok(Json(SetupStatus {
        initialized: api.users.any_admin().await?,
    }))
}
