use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::audit::{AuditEvent, AuditFilter, AuditSubject};
use crate::error::AppResult;
use crate::extractor::AdminAuth;
use crate::services::AppServices;

/// key: audit-api
/// Operator read access to the credential audit trail, one owner at a time.
pub fn routes() -> Router {
    Router::new().route("/api/owners/:owner_id/audit", get(list_events))
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    #[serde(default)]
    pub subject: Option<AuditSubject>,
    #[serde(default)]
    pub subject_id: Option<String>,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: Option<i64>,
}

async fn list_events(
    _admin: AdminAuth,
    Extension(services): Extension<Arc<AppServices>>,
    Path(owner_id): Path<String>,
    Query(query): Query<AuditQuery>,
) -> AppResult<Json<Vec<AuditEvent>>> {
    let filter = AuditFilter {
        owner_id,
        subject: query.subject,
        subject_id: query.subject_id,
        start: query.start,
        end: query.end,
        limit: query.limit,
    };
    Ok(Json(services.audit.query(&filter).await?))
}
