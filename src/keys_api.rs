use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    routing::{get, patch, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::extractor::AdminAuth;
use crate::keys::{GatewayApiKey, IssueKeyRequest, IssuedKey, KeyUpdate, LimitsUpdate, RevokeOutcome};
use crate::services::AppServices;

/// key: gateway-keys-api
/// Operator endpoints for gateway key lifecycle.
pub fn routes() -> Router {
    Router::new()
        .route("/api/owners/:owner_id/keys", get(list_keys).post(issue_key))
        .route("/api/keys/:key_id", patch(update_key))
        .route("/api/keys/:key_id/rotate", post(rotate_key))
        .route("/api/keys/:key_id/limits", put(update_limits))
        .route("/api/keys/:key_id/revoke", post(revoke_key))
}

/// Returned exactly once per secret: on issuance and on rotation.
#[derive(Serialize)]
pub struct IssuedKeyResponse {
    pub key_id: String,
    pub secret: String,
    pub bearer_token: String,
    pub display_prefix: String,
    pub key: GatewayApiKey,
}

impl From<IssuedKey> for IssuedKeyResponse {
    fn from(issued: IssuedKey) -> Self {
        let bearer_token = issued.bearer_token().to_string();
        Self {
            secret: issued.secret.expose().to_string(),
            key_id: issued.key_id,
            bearer_token,
            display_prefix: issued.display_prefix,
            key: issued.record,
        }
    }
}

#[derive(Deserialize, Default)]
pub struct RevokeRequest {
    pub confirmation_name: Option<String>,
}

#[derive(Serialize)]
pub struct RevokeResponse {
    pub key: GatewayApiKey,
    pub already_revoked: bool,
}

async fn issue_key(
    _admin: AdminAuth,
    Extension(services): Extension<Arc<AppServices>>,
    Path(owner_id): Path<String>,
    Json(payload): Json<IssueKeyRequest>,
) -> AppResult<(StatusCode, Json<IssuedKeyResponse>)> {
    let issued = services.issuer.issue(&owner_id, payload).await?;
    Ok((StatusCode::CREATED, Json(issued.into())))
}

async fn list_keys(
    _admin: AdminAuth,
    Extension(services): Extension<Arc<AppServices>>,
    Path(owner_id): Path<String>,
) -> AppResult<Json<Vec<GatewayApiKey>>> {
    Ok(Json(services.issuer.list(&owner_id).await?))
}

async fn update_key(
    _admin: AdminAuth,
    Extension(services): Extension<Arc<AppServices>>,
    Path(key_id): Path<String>,
    Json(payload): Json<KeyUpdate>,
) -> AppResult<Json<GatewayApiKey>> {
    Ok(Json(services.issuer.update(&key_id, payload).await?))
}

async fn rotate_key(
    _admin: AdminAuth,
    Extension(services): Extension<Arc<AppServices>>,
    Path(key_id): Path<String>,
) -> AppResult<Json<IssuedKeyResponse>> {
    let issued = services.issuer.rotate_secret(&key_id).await?;
    Ok(Json(issued.into()))
}

async fn update_limits(
    _admin: AdminAuth,
    Extension(services): Extension<Arc<AppServices>>,
    Path(key_id): Path<String>,
    Json(payload): Json<LimitsUpdate>,
) -> AppResult<Json<GatewayApiKey>> {
    Ok(Json(services.issuer.update_limits(&key_id, payload).await?))
}

async fn revoke_key(
    _admin: AdminAuth,
    Extension(services): Extension<Arc<AppServices>>,
    Path(key_id): Path<String>,
    payload: Option<Json<RevokeRequest>>,
) -> AppResult<Json<RevokeResponse>> {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let outcome = services
        .issuer
        .revoke(&key_id, request.confirmation_name.as_deref())
        .await?;
    let already_revoked = matches!(outcome, RevokeOutcome::AlreadyRevoked(_));
    let key = match outcome {
        RevokeOutcome::Revoked(key) | RevokeOutcome::AlreadyRevoked(key) => key,
    };
    Ok(Json(RevokeResponse {
        key,
        already_revoked,
    }))
}
