use async_trait::async_trait;
use uuid::Uuid;

use super::models::{CredentialFlagsUpdate, ProviderCredential, VerificationStatus};
use crate::audit::{AuditEvent, AuditFn};
use crate::crypto::EncryptedSecret;
use crate::error::CredentialResult;

/// key: provider-credential-store
/// Persistence for BYOK credentials. `(owner_id, fingerprint)` is unique and
/// enforced by the store itself; violating inserts or replacements fail with
/// `DuplicateSecret`. Lookups are always scoped by owner; a row belonging to
/// someone else is reported as `NotFound`.
///
/// Every mutation stores its audit events in the same unit of work. When they
/// cannot be stored the row is left as it was.
#[async_trait]
pub trait ProviderCredentialStore: Send + Sync {
    async fn insert_credential(
        &self,
        record: &ProviderCredential,
        events: &[AuditEvent],
    ) -> CredentialResult<()>;

    async fn get_credential(
        &self,
        owner_id: &str,
        id: Uuid,
    ) -> CredentialResult<Option<ProviderCredential>>;

    /// Newest first.
    async fn list_credentials(&self, owner_id: &str) -> CredentialResult<Vec<ProviderCredential>>;

    /// Swaps every encrypted field in one write. When `previous_nonce` is
    /// given the swap only happens if the stored nonce still equals it;
    /// otherwise `Ok(None)` is returned and nothing changes.
    async fn replace_secret(
        &self,
        owner_id: &str,
        id: Uuid,
        secret: &EncryptedSecret,
        previous_nonce: Option<&[u8]>,
        reset_verification: bool,
        audit: AuditFn<'_, ProviderCredential>,
    ) -> CredentialResult<Option<ProviderCredential>>;

    async fn update_flags(
        &self,
        owner_id: &str,
        id: Uuid,
        flags: &CredentialFlagsUpdate,
        audit: AuditFn<'_, ProviderCredential>,
    ) -> CredentialResult<ProviderCredential>;

    async fn record_verification(
        &self,
        owner_id: &str,
        id: Uuid,
        status: VerificationStatus,
        error_message: Option<&str>,
        audit: AuditFn<'_, ProviderCredential>,
    ) -> CredentialResult<ProviderCredential>;

    /// `audit` receives the removed row as both arguments.
    async fn delete_credential(
        &self,
        owner_id: &str,
        id: Uuid,
        audit: AuditFn<'_, ProviderCredential>,
    ) -> CredentialResult<ProviderCredential>;

    /// Rows encrypted under any version other than `active_version`, ordered
    /// by id and starting after the `after` cursor.
    async fn list_stale_versions(
        &self,
        active_version: i32,
        after: Option<Uuid>,
        limit: i64,
    ) -> CredentialResult<Vec<ProviderCredential>>;
}
