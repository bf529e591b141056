use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::extractor::{AdminAuth, GatewayKey};
use crate::services::AppServices;

/// key: gateway-api
/// Hot-path endpoints used by the gateway: authorize a presented key, then
/// report what the call cost.
pub fn routes() -> Router {
    Router::new()
        .route("/api/gateway/authorize", post(authorize))
        .route("/api/gateway/usage", post(record_usage))
}

#[derive(Serialize)]
pub struct AuthorizeResponse {
    pub key_id: String,
    pub owner_id: String,
    pub scopes: Vec<String>,
}

#[derive(Deserialize)]
pub struct UsageReport {
    pub key_id: String,
    #[serde(default)]
    pub cost_minor: i64,
}

async fn authorize(GatewayKey(record): GatewayKey) -> Json<AuthorizeResponse> {
    Json(AuthorizeResponse {
        key_id: record.key_id,
        owner_id: record.owner_id,
        scopes: record.scopes,
    })
}

async fn record_usage(
    _admin: AdminAuth,
    Extension(services): Extension<Arc<AppServices>>,
    Json(report): Json<UsageReport>,
) -> AppResult<StatusCode> {
    services
        .verifier
        .record_usage(&report.key_id, report.cost_minor)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
