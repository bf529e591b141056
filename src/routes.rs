use std::sync::Arc;

use axum::{routing::get, Extension, Router};

use crate::services::AppServices;
use crate::{audit_api, byok_api, gateway_api, keys_api};

async fn root() -> &'static str {
    "Gateway Credentials API"
}

async fn health() -> &'static str {
    "ok"
}

pub fn api_routes() -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(keys_api::routes())
        .merge(byok_api::routes())
        .merge(gateway_api::routes())
        .merge(audit_api::routes())
}

/// Full application minus the metrics layer, which the binary installs once
/// per process.
pub fn app(services: Arc<AppServices>) -> Router {
    Router::new()
        .route("/", get(root))
        .merge(api_routes())
        .layer(Extension(services))
}
