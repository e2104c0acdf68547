//
// Copyright 2025 Tabs Data Inc.
//

//! The REST surface, one module per concern.

use crate::context::Api;
use axum::Router;
use axum::http::{HeaderValue, Method};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

pub mod auth;
pub mod calls;
pub mod collections;
pub mod docs;
pub mod files;
pub mod functions;
pub mod records;
pub mod schedules;
pub mod settings;
pub mod tokens;

/// Builds the full application router.
pub fn router(api: Api, cors_origins: &[String]) -> Router {
    Router::new()
        .merge(auth::routes())
        .merge(collections::routes())
        .merge(records::routes())
        .merge(functions::routes())
        .merge(schedules::routes())
        .merge(calls::routes())
        .merge(settings::routes())
        .merge(tokens::routes())
        .merge(files::routes())
        .merge(docs::routes())
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(api)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers(Any);
    if origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(parsed))
}
