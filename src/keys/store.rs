use async_trait::async_trait;

use super::models::{GatewayApiKey, KeyStatus, LimitsUpdate};
use crate::audit::{AuditEvent, AuditFn};
use crate::error::CredentialResult;

#[derive(Clone, Debug)]
pub enum RevokeOutcome {
    Revoked(GatewayApiKey),
    AlreadyRevoked(GatewayApiKey),
}

impl RevokeOutcome {
    pub fn record(&self) -> &GatewayApiKey {
        match self {
            RevokeOutcome::Revoked(record) | RevokeOutcome::AlreadyRevoked(record) => record,
        }
    }

    pub fn changed(&self) -> bool {
        matches!(self, RevokeOutcome::Revoked(_))
    }
}

/// key: gateway-keys-store
/// Persistence for gateway keys. Each mutation checks, writes, and appends its
/// audit events as one unit: if the events cannot be stored the mutation does
/// not happen either.
///
/// Mutations on a missing key fail with `NotFound`; mutations other than
/// revocation on a revoked key fail with `KeyInactive`.
#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn insert_key(&self, record: &GatewayApiKey, events: &[AuditEvent]) -> CredentialResult<()>;

    async fn find_key(&self, key_id: &str) -> CredentialResult<Option<GatewayApiKey>>;

    async fn list_keys(&self, owner_id: &str) -> CredentialResult<Vec<GatewayApiKey>>;

    async fn update_profile(
        &self,
        key_id: &str,
        name: Option<&str>,
        status: Option<KeyStatus>,
        audit: AuditFn<'_, GatewayApiKey>,
    ) -> CredentialResult<GatewayApiKey>;

    async fn replace_secret_hash(
        &self,
        key_id: &str,
        secret_hash: &str,
        display_prefix: &str,
        audit: AuditFn<'_, GatewayApiKey>,
    ) -> CredentialResult<GatewayApiKey>;

    async fn update_limits(
        &self,
        key_id: &str,
        update: &LimitsUpdate,
        audit: AuditFn<'_, GatewayApiKey>,
    ) -> CredentialResult<GatewayApiKey>;

    /// Revokes unless `confirmation` is given and differs from the stored name,
    /// in which case nothing is written and `ConfirmationMismatch` is returned.
    /// `audit` runs only when the status actually changes.
    async fn revoke_key(
        &self,
        key_id: &str,
        confirmation: Option<&str>,
        audit: AuditFn<'_, GatewayApiKey>,
    ) -> CredentialResult<RevokeOutcome>;
}
