//
// Copyright 2025 Tabs Data Inc.
//

use crate::context::Api;
use crate::layers::auth::AdminUser;
use crate::status::ApiResult;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use mb_objects::types::setting::SettingType;
use mb_services::settings::CORE_SETTINGS;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

pub fn routes() -> Router<Api> {
    Router::new().route("/api/admin/settings", get(list).patch(patch))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SettingView {
    pub key: String,
    pub value: String,
    pub value_type: String,
    /// Whether the value comes from the database or is the built-in default.
    pub stored: bool,
}

async fn list(State(api): State<Api>, _admin: AdminUser) -> ApiResult<Json<Vec<SettingView>>> {
    let stored: HashMap<String, (String, SettingType)> = api
        .settings
        .list()
        .await?
        .into_iter()
        .map(|s| (s.key().clone(), (s.value().clone(), s.value_type())))
        .collect();

    let mut views = Vec::new();
    for (key, value_type, default) in CORE_SETTINGS {
        let (value, is_stored) = match stored.get(*key) {
            Some((value, _)) => (value.clone(), true),
            None => (default.to_string(), false),
        };
        views.push(SettingView {
            key: key.to_string(),
            value,
            value_type: value_type.to_string(),
            stored: is_stored,
        });
    }
    // extension settings only exist once stored
    for (key, (value, value_type)) in &stored {
        if key.starts_with(mb_objects::types::setting::EXT_SETTING_PREFIX) {
            views.push(SettingView {
                key: key.clone(),
                value: value.clone(),
                value_type: value_type.to_string(),
                stored: true,
            });
        }
    }
    views.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(Json(views))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SettingWrite {
    pub key: String,
    pub value: String,
    /// Declared type for a new extension key; ignored for core keys.
    #[serde(default)]
    pub value_type: Option<String>,
}

async fn patch(
    State(api): State<Api>,
    _admin: AdminUser,
    Json(writes): Json<Vec<SettingWrite>>,
) -> ApiResult<Json<Vec<SettingView>>> {
    let mut views = Vec::with_capacity(writes.len());
    for write in writes {
        let ext_type = write
            .value_type
            .as_deref()
            .and_then(|t| t.parse::<SettingType>().ok());
        let setting = api.settings.set(&write.key, &write.value, ext_type).await?;
        views.push(SettingView {
            key: setting.key().clone(),
            value: setting.value().clone(),
            value_type: setting.value_type().to_string(),
            stored: true,
        });
    }
    Ok(Json(views))
}
