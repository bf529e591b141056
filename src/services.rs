use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tokio::time::sleep;
use tracing::error;

use crate::audit::{AuditLog, PgAuditLog};
use crate::byok::{ProviderCredentialService, ProviderCredentialStore};
use crate::config::{AdminToken, KeyMaterial};
use crate::crypto::SecretCipher;
use crate::db::{PgApiKeyStore, PgProviderCredentialStore, PgUsageStore};
use crate::keys::{ApiKeyStore, KeyIssuer, KeyVerifier};
use crate::memory::{MemoryApiKeyStore, MemoryAuditLog, MemoryProviderCredentialStore, MemoryUsageStore};
use crate::usage::UsageStore;

const USAGE_PRUNE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// key: app-services
/// Everything the HTTP layer needs, wired once at startup and shared through
/// an `Extension`.
pub struct AppServices {
    pub issuer: KeyIssuer,
    pub verifier: KeyVerifier,
    pub credentials: ProviderCredentialService,
    pub audit: Arc<dyn AuditLog>,
    pub admin_token: AdminToken,
}

impl AppServices {
    /// The stores write their own audit events; `audit` is the read side of
    /// the same trail.
    pub fn new(
        material: &KeyMaterial,
        admin_token: AdminToken,
        keys: Arc<dyn ApiKeyStore>,
        credentials: Arc<dyn ProviderCredentialStore>,
        usage: Arc<dyn UsageStore>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        let issuer = KeyIssuer::new(keys.clone(), material.pepper.clone());
        let verifier = KeyVerifier::new(keys, usage, material.pepper.clone());
        let credentials =
            ProviderCredentialService::new(credentials, SecretCipher::new(material.ring.clone()));
        Self {
            issuer,
            verifier,
            credentials,
            audit,
            admin_token,
        }
    }

    /// Process-local stores; state is lost on restart.
    pub fn in_memory(material: &KeyMaterial, admin_token: AdminToken) -> Self {
        let audit = Arc::new(MemoryAuditLog::default());
        Self::new(
            material,
            admin_token,
            Arc::new(MemoryApiKeyStore::new(audit.clone())),
            Arc::new(MemoryProviderCredentialStore::new(audit.clone())),
            Arc::new(MemoryUsageStore::default()),
            audit,
        )
    }

    pub fn postgres(pool: PgPool, material: &KeyMaterial, admin_token: AdminToken) -> Self {
        Self::new(
            material,
            admin_token,
            Arc::new(PgApiKeyStore::new(pool.clone())),
            Arc::new(PgProviderCredentialStore::new(pool.clone())),
            Arc::new(PgUsageStore::new(pool.clone())),
            Arc::new(PgAuditLog::new(pool)),
        )
    }
}

/// Periodically deletes usage counters for windows that have closed.
pub fn spawn_usage_pruner(services: Arc<AppServices>) {
    tokio::spawn(async move {
        loop {
            if let Err(err) = services.verifier.prune_usage(Utc::now()).await {
                error!(reason = err.reason_code(), "usage pruning failed");
            }
            sleep(USAGE_PRUNE_INTERVAL).await;
        }
    });
}
