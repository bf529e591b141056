use std::sync::Arc;

use axum::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::{error, warn};

use crate::error::AppError;
use crate::keys::GatewayApiKey;
use crate::services::AppServices;

fn services(parts: &Parts) -> Result<Arc<AppServices>, AppError> {
    parts
        .extensions
        .get::<Arc<AppServices>>()
        .cloned()
        .ok_or_else(|| {
            error!("application services missing from request extensions");
            AppError::Internal
        })
}

fn authorization(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
}

/// Operator presenting `Authorization: Bearer <ADMIN_TOKEN>`.
pub struct AdminAuth;

#[async_trait]
impl<S> FromRequestParts<S> for AdminAuth
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let services = services(parts)?;
        let token = authorization(parts)
            .and_then(|header| header.strip_prefix("Bearer "))
            .map(str::trim)
            .ok_or(AppError::Unauthorized)?;
        if !services.admin_token.matches(token) {
            warn!("admin token rejected");
            return Err(AppError::Unauthorized);
        }
        Ok(AdminAuth)
    }
}

/// Caller authenticated with a gateway key, limits included.
pub struct GatewayKey(pub GatewayApiKey);

#[async_trait]
impl<S> FromRequestParts<S> for GatewayKey
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let services = services(parts)?;
        let header = authorization(parts).ok_or(AppError::Unauthorized)?;
        let record = services.verifier.verify_bearer(header).await?;
        Ok(GatewayKey(record))
    }
}
