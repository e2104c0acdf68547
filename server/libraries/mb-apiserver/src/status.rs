//
// Copyright 2025 Tabs Data Inc.
//

//! Error-to-HTTP mapping. Every handler returns `Result<T, ErrorStatus>`; the
//! conversion from [`MbError`] keeps the stable error code in the body and maps
//! the error class onto the status code.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use mb_error::{ApiError, MbError};
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

/// Handler result alias.
pub type ApiResult<T> = Result<T, ErrorStatus>;

/// The error body returned by every failed request.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Stable code, `Domain::NNNN`.
    pub code: String,
    /// Error class name.
    pub error: String,
    /// Human-readable message.
    pub message: String,
}

/// An [`MbError`] on its way out of a handler.
#[derive(Debug)]
pub struct ErrorStatus(pub MbError);

impl From<MbError> for ErrorStatus {
    fn from(error: MbError) -> Self {
        Self(error)
    }
}

pub fn status_code(api_error: ApiError) -> StatusCode {
    match api_error {
        ApiError::InputError => StatusCode::BAD_REQUEST,
        ApiError::NotFound => StatusCode::NOT_FOUND,
        ApiError::Conflict => StatusCode::CONFLICT,
        ApiError::Forbidden => StatusCode::FORBIDDEN,
        ApiError::NotAuthorized => StatusCode::UNAUTHORIZED,
        ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ApiError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ApiError::InternalError | ApiError::Unexpected => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ErrorStatus {
    fn into_response(self) -> Response {
        let status = status_code(self.0.api_error());
        let body = if status.is_server_error() {
            // internal detail stays in the log, correlated by the error code
            error!("{}", self.0);
            ErrorBody {
                code: self.0.code().to_string(),
                error: self.0.api_error().to_string(),
                message: "internal error".to_string(),
            }
        } else {
            ErrorBody {
                code: self.0.code().to_string(),
                error: self.0.api_error().to_string(),
                message: self.0.to_string(),
            }
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(status_code(ApiError::InputError), StatusCode::BAD_REQUEST);
        assert_eq!(status_code(ApiError::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_code(ApiError::Conflict), StatusCode::CONFLICT);
        assert_eq!(status_code(ApiError::Forbidden), StatusCode::FORBIDDEN);
        assert_eq!(status_code(ApiError::NotAuthorized), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_code(ApiError::RateLimited),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(status_code(ApiError::Timeout), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            status_code(ApiError::InternalError),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
