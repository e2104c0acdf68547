//
// Copyright 2025 Tabs Data Inc.
//

//! Bearer authentication extractors. A bearer value is either a JWT access
//! token or an application token secret; route groups pick the extractor
//! matching their required level.

use crate::context::Api;
use crate::status::ErrorStatus;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use mb_error::mb_error;
use mb_execution::engine::Caller;
use mb_services::auth::Principal;

#[mb_error]
pub enum BearerError {
    #[error("Missing bearer token")]
    MissingBearer = 4000,
    #[error("Admin access required")]
    AdminRequired = 3000,
}

fn bearer_value(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|value| value.to_string())
}

async fn resolve(parts: &Parts, api: &Api) -> Result<Option<Principal>, ErrorStatus> {
    match bearer_value(parts) {
        None => Ok(None),
        Some(bearer) => {
            let principal = api
                .auth
                .verify_bearer(&api.users, &api.tokens, &bearer)
                .await?;
            Ok(Some(principal))
        }
    }
}

/// The authenticated principal; requests without a valid bearer are rejected.
pub struct CurrentUser(pub Principal);

impl FromRequestParts<Api> for CurrentUser {
    type Rejection = ErrorStatus;

    async fn from_request_parts(parts: &mut Parts, api: &Api) -> Result<Self, Self::Rejection> {
        match resolve(parts, api).await? {
            Some(principal) => Ok(CurrentUser(principal)),
            None => Err(ErrorStatus(BearerError::MissingBearer.into())),
        }
    }
}

/// An authenticated admin principal.
pub struct AdminUser(pub Principal);

impl FromRequestParts<Api> for AdminUser {
    type Rejection = ErrorStatus;

    async fn from_request_parts(parts: &mut Parts, api: &Api) -> Result<Self, Self::Rejection> {
        let CurrentUser(principal) = CurrentUser::from_request_parts(parts, api).await?;
        if !principal.is_admin() {
            return Err(ErrorStatus(BearerError::AdminRequired.into()));
        }
        Ok(AdminUser(principal))
    }
}

/// An optional principal, for endpoints whose authorization depends on the
/// target (function invocation).
pub struct MaybeUser(pub Option<Principal>);

impl FromRequestParts<Api> for MaybeUser {
    type Rejection = ErrorStatus;

    async fn from_request_parts(parts: &mut Parts, api: &Api) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(resolve(parts, api).await?))
    }
}

/// Maps a resolved principal onto the engine's caller model.
pub fn caller_of(principal: &Option<Principal>) -> Caller {
    match principal {
        None => Caller::Anonymous,
        Some(Principal::User { user, .. }) => Caller::User {
            id: user.id(),
            is_admin: user.is_admin(),
        },
        Some(Principal::AppToken(token)) => Caller::AppToken { id: token.id() },
    }
}
