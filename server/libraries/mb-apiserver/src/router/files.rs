//
// Copyright 2025 Tabs Data Inc.
//

use crate::context::Api;
use crate::layers::auth::CurrentUser;
use crate::status::{ApiResult, ErrorStatus};
use axum::extract::{Multipart, Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{delete as delete_route, get, post};
use axum::{Json, Router};
use mb_error::{ApiError, api_error};
use mb_services::files::{FileError, StorageStatus};
use serde::Serialize;
use utoipa::ToSchema;

pub fn routes() -> Router<Api> {
    Router::new()
        .route("/api/files/upload", post(upload))
        .route("/api/files/download/{*key}", get(download))
        .route("/api/files/{*key}", delete_route(delete))
        .route("/api/files/status", get(status))
}

async fn ensure_enabled(api: &Api) -> Result<(), ErrorStatus> {
    if !api.settings.storage_enabled().await? {
        Err(ErrorStatus(FileError::StorageDisabled.into()))?;
    }
    Ok(())
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UploadedFile {
    pub key: String,
    pub bytes: u64,
}

async fn upload(
    State(api): State<Api>,
    _user: CurrentUser,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadedFile>> {
    ensure_enabled(&api).await?;

    let mut key: Option<String> = None;
    let mut content: Option<Vec<u8>> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ErrorStatus(api_error!(ApiError::InputError, "invalid multipart: {err}")))?
    {
        match field.name() {
            Some("key") => {
                key = Some(field.text().await.map_err(|err| {
                    ErrorStatus(api_error!(ApiError::InputError, "invalid key field: {err}"))
                })?);
            }
            Some("file") => {
                let filename = field.file_name().map(|name| name.to_string());
                let bytes = field.bytes().await.map_err(|err| {
                    ErrorStatus(api_error!(ApiError::InputError, "invalid file field: {err}"))
                })?;
                if key.is_none() {
                    key = filename;
                }
                content = Some(bytes.to_vec());
            }
            _ => {}
        }
    }

    let key = key.ok_or_else(|| {
        ErrorStatus(api_error!(ApiError::InputError, "missing file key"))
    })?;
    let content = content.ok_or_else(|| {
        ErrorStatus(api_error!(ApiError::InputError, "missing file field"))
    })?;

    api.files.put(&key, &content).await?;
    Ok(Json(UploadedFile {
        bytes: content.len() as u64,
        key,
    }))
}

async fn download(
    State(api): State<Api>,
    _user: CurrentUser,
    Path(key): Path<String>,
) -> ApiResult<impl IntoResponse> {
    ensure_enabled(&api).await?;
    let content = api.files.get(&key).await?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        content,
    ))
}

async fn delete(
    State(api): State<Api>,
    _user: CurrentUser,
    Path(key): Path<String>,
) -> ApiResult<()> {
    ensure_enabled(&api).await?;
    Ok(api.files.delete(&key).await?)
}

async fn status(State(api): State<Api>, _user: CurrentUser) -> ApiResult<Json<StorageStatus>> {
    let enabled = api.settings.storage_enabled().await?;
    Ok(Json(api.files.status(enabled).await?))
}
