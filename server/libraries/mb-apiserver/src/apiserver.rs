//
// Copyright 2025 Tabs Data Inc.
//

use crate::context::Api;
use crate::router;
use mb_error::{MbError, mb_error};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[mb_error]
pub enum ApiServerError {
    #[error("Cannot bind to {0}: {1}")]
    CannotBind(String, #[source] std::io::Error) = 2,
    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error) = 7000,
}

/// The HTTP server. Serves until the shutdown token fires, then drains
/// gracefully.
pub struct ApiServer {
    api: Api,
    bind: String,
    cors_origins: Vec<String>,
}

impl ApiServer {
    pub fn new(api: Api, bind: String, cors_origins: Vec<String>) -> Self {
        Self {
            api,
            bind,
            cors_origins,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<(), MbError> {
        let listener = TcpListener::bind(&self.bind)
            .await
            .map_err(|err| ApiServerError::CannotBind(self.bind.clone(), err))?;
        info!("API server listening on {}", self.bind);

        let app = router::router(self.api, &self.cors_origins);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(ApiServerError::Serve)?;
        info!("API server stopped");
        Ok(())
    }
}
