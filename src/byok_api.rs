use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::byok::{
    CredentialFlagsUpdate, ProviderCredentialView, RewrapReport, SubmitCredential,
    VerificationStatus,
};
use crate::error::AppResult;
use crate::extractor::AdminAuth;
use crate::services::AppServices;

/// key: provider-credentials-api
/// Operator endpoints for bring-your-own-key credentials. Responses carry
/// display fragments only.
pub fn routes() -> Router {
    Router::new()
        .route(
            "/api/owners/:owner_id/provider-credentials",
            get(list_credentials).post(submit_credential),
        )
        .route(
            "/api/owners/:owner_id/provider-credentials/:credential_id",
            put(rotate_credential)
                .patch(update_flags)
                .delete(remove_credential),
        )
        .route(
            "/api/owners/:owner_id/provider-credentials/:credential_id/verification",
            post(record_verification),
        )
        .route("/api/provider-credentials/rewrap", post(rewrap_retired))
}

#[derive(Deserialize)]
pub struct RotateCredentialRequest {
    pub secret: String,
}

#[derive(Deserialize)]
pub struct VerificationRequest {
    pub status: VerificationStatus,
    pub error_message: Option<String>,
}

async fn list_credentials(
    _admin: AdminAuth,
    Extension(services): Extension<Arc<AppServices>>,
    Path(owner_id): Path<String>,
) -> AppResult<Json<Vec<ProviderCredentialView>>> {
    Ok(Json(services.credentials.list(&owner_id).await?))
}

async fn submit_credential(
    _admin: AdminAuth,
    Extension(services): Extension<Arc<AppServices>>,
    Path(owner_id): Path<String>,
    Json(payload): Json<SubmitCredential>,
) -> AppResult<(StatusCode, Json<ProviderCredentialView>)> {
    let view = services.credentials.submit(&owner_id, payload).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn rotate_credential(
    _admin: AdminAuth,
    Extension(services): Extension<Arc<AppServices>>,
    Path((owner_id, credential_id)): Path<(String, Uuid)>,
    Json(payload): Json<RotateCredentialRequest>,
) -> AppResult<Json<ProviderCredentialView>> {
    let secret = Zeroizing::new(payload.secret);
    let view = services
        .credentials
        .rotate(&owner_id, credential_id, &secret)
        .await?;
    Ok(Json(view))
}

async fn update_flags(
    _admin: AdminAuth,
    Extension(services): Extension<Arc<AppServices>>,
    Path((owner_id, credential_id)): Path<(String, Uuid)>,
    Json(payload): Json<CredentialFlagsUpdate>,
) -> AppResult<Json<ProviderCredentialView>> {
    Ok(Json(
        services
            .credentials
            .set_flags(&owner_id, credential_id, payload)
            .await?,
    ))
}

async fn record_verification(
    _admin: AdminAuth,
    Extension(services): Extension<Arc<AppServices>>,
    Path((owner_id, credential_id)): Path<(String, Uuid)>,
    Json(payload): Json<VerificationRequest>,
) -> AppResult<Json<ProviderCredentialView>> {
    Ok(Json(
        services
            .credentials
            .record_verification(
                &owner_id,
                credential_id,
                payload.status,
                payload.error_message.as_deref(),
            )
            .await?,
    ))
}

async fn remove_credential(
    _admin: AdminAuth,
    Extension(services): Extension<Arc<AppServices>>,
    Path((owner_id, credential_id)): Path<(String, Uuid)>,
) -> AppResult<StatusCode> {
    services.credentials.remove(&owner_id, credential_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn rewrap_retired(
    _admin: AdminAuth,
    Extension(services): Extension<Arc<AppServices>>,
) -> AppResult<Json<RewrapReport>> {
    Ok(Json(services.credentials.rewrap_retired().await?))
}
