use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use super::models::{
    CredentialFlagsUpdate, ProviderCredential, ProviderCredentialView, SubmitCredential,
    VerificationStatus,
};
use super::store::ProviderCredentialStore;
use crate::audit::{AuditEvent, AuditEventType, AuditSubject};
use crate::crypto::{RevealedSecret, SecretCipher};
use crate::error::{CredentialError, CredentialResult};

const DEFAULT_REWRAP_PAGE: i64 = 500;

/// Decrypted credential handed to the upstream call site.
#[derive(Debug)]
pub struct UpstreamCredential {
    pub credential_id: Uuid,
    pub provider: String,
    pub secret: RevealedSecret,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct RewrapReport {
    pub active_version: i32,
    pub rewrapped: Vec<Uuid>,
    /// Rows changed concurrently between read and write; picked up by the next sweep.
    pub skipped: Vec<Uuid>,
    pub failed: Vec<Uuid>,
}

/// key: provider-credential-service
/// BYOK lifecycle over the secret cipher. Plaintext enters through `submit` and
/// `rotate` and leaves only through `reveal_for_upstream`.
#[derive(Clone)]
pub struct ProviderCredentialService {
    store: Arc<dyn ProviderCredentialStore>,
    cipher: SecretCipher,
}

impl ProviderCredentialService {
    pub fn new(store: Arc<dyn ProviderCredentialStore>, cipher: SecretCipher) -> Self {
        Self { store, cipher }
    }

    pub async fn submit(
        &self,
        owner_id: &str,
        submission: SubmitCredential,
    ) -> CredentialResult<ProviderCredentialView> {
        let provider = normalize_provider(&submission.provider)?;
        if owner_id.trim().is_empty() {
            return Err(CredentialError::InvalidInput("owner required".into()));
        }
        let plaintext = Zeroizing::new(submission.secret);
        let secret = self.cipher.encrypt(&plaintext, None)?;
        drop(plaintext);

        let now = Utc::now();
        let record = ProviderCredential {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            provider,
            secret,
            enabled: submission.enabled,
            always_use: submission.always_use,
            verification_status: VerificationStatus::Unverified,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        let submitted = credential_event(
            &record,
            AuditEventType::CredentialSubmitted,
            json!({
                "provider": record.provider,
                "display_prefix": record.secret.display_prefix,
                "display_suffix": record.secret.display_suffix,
                "key_version": record.secret.key_version,
            }),
        );
        if let Err(err) = self.store.insert_credential(&record, &[submitted]).await {
            if matches!(err, CredentialError::DuplicateSecret) {
                warn!(owner_id = %owner_id, provider = %record.provider, "duplicate provider credential rejected");
            }
            return Err(err);
        }

        info!(credential_id = %record.id, owner_id = %owner_id, provider = %record.provider, "provider credential stored");
        Ok(ProviderCredentialView::from(&record))
    }

    pub async fn get(&self, owner_id: &str, id: Uuid) -> CredentialResult<ProviderCredentialView> {
        let record = self.fetch(owner_id, id).await?;
        Ok(ProviderCredentialView::from(&record))
    }

    pub async fn list(&self, owner_id: &str) -> CredentialResult<Vec<ProviderCredentialView>> {
        let records = self.store.list_credentials(owner_id).await?;
        Ok(records.iter().map(ProviderCredentialView::from).collect())
    }

    /// Replaces the stored secret in one write. Verification resets to
    /// `unverified` because the new value has never been checked upstream.
    pub async fn rotate(
        &self,
        owner_id: &str,
        id: Uuid,
        new_plaintext: &str,
    ) -> CredentialResult<ProviderCredentialView> {
        let current = self.fetch(owner_id, id).await?;
        let replacement = self.cipher.rotate(&current.secret, new_plaintext, None)?;
        let updated = self
            .store
            .replace_secret(
                owner_id,
                id,
                &replacement,
                None,
                true,
                &|previous: &ProviderCredential, updated: &ProviderCredential| {
                    vec![credential_event(
                        updated,
                        AuditEventType::CredentialRotated,
                        json!({
                            "previous_display_suffix": previous.secret.display_suffix,
                            "display_prefix": updated.secret.display_prefix,
                            "display_suffix": updated.secret.display_suffix,
                            "key_version": updated.secret.key_version,
                        }),
                    )]
                },
            )
            .await?
            .ok_or(CredentialError::NotFound)?;

        info!(credential_id = %id, owner_id = %owner_id, "provider credential rotated");
        Ok(ProviderCredentialView::from(&updated))
    }

    pub async fn set_flags(
        &self,
        owner_id: &str,
        id: Uuid,
        flags: CredentialFlagsUpdate,
    ) -> CredentialResult<ProviderCredentialView> {
        if flags.is_empty() {
            return self.get(owner_id, id).await;
        }
        let updated = self
            .store
            .update_flags(owner_id, id, &flags, &|_: &ProviderCredential, updated: &ProviderCredential| {
                vec![credential_event(
                    updated,
                    AuditEventType::CredentialFlagsChanged,
                    json!({"enabled": updated.enabled, "always_use": updated.always_use}),
                )]
            })
            .await?;
        Ok(ProviderCredentialView::from(&updated))
    }

    pub async fn record_verification(
        &self,
        owner_id: &str,
        id: Uuid,
        status: VerificationStatus,
        error_message: Option<&str>,
    ) -> CredentialResult<ProviderCredentialView> {
        let error_message = match status {
            VerificationStatus::Invalid => error_message.map(str::trim).filter(|m| !m.is_empty()),
            VerificationStatus::Valid | VerificationStatus::Unverified => None,
        };
        let updated = self
            .store
            .record_verification(
                owner_id,
                id,
                status,
                error_message,
                &|_: &ProviderCredential, updated: &ProviderCredential| {
                    vec![credential_event(
                        updated,
                        AuditEventType::CredentialVerified,
                        json!({"status": status, "error_message": updated.error_message}),
                    )]
                },
            )
            .await?;
        Ok(ProviderCredentialView::from(&updated))
    }

    pub async fn remove(&self, owner_id: &str, id: Uuid) -> CredentialResult<()> {
        self.store
            .delete_credential(owner_id, id, &|removed: &ProviderCredential, _: &ProviderCredential| {
                vec![credential_event(
                    removed,
                    AuditEventType::CredentialRemoved,
                    json!({"provider": removed.provider}),
                )]
            })
            .await?;
        info!(credential_id = %id, owner_id = %owner_id, "provider credential removed");
        Ok(())
    }

    /// Decrypts the credential used for `provider`: enabled rows only,
    /// `always_use` first, then the newest.
    pub async fn reveal_for_upstream(
        &self,
        owner_id: &str,
        provider: &str,
    ) -> CredentialResult<UpstreamCredential> {
        let provider = normalize_provider(provider)?;
        let records = self.store.list_credentials(owner_id).await?;
        let chosen = records
            .into_iter()
            .filter(|record| record.enabled && record.provider == provider)
            .max_by(|a, b| {
                a.always_use
                    .cmp(&b.always_use)
                    .then(a.created_at.cmp(&b.created_at))
            })
            .ok_or(CredentialError::NotFound)?;

        let secret = self.cipher.decrypt(&chosen.secret).map_err(|err| {
            error!(credential_id = %chosen.id, reason = err.reason_code(), "provider credential could not be decrypted");
            err
        })?;
        Ok(UpstreamCredential {
            credential_id: chosen.id,
            provider: chosen.provider,
            secret,
        })
    }

    /// Re-encrypts rows still sealed under a retired master key so that key
    /// can eventually be dropped from the ring.
    pub async fn rewrap_retired(&self) -> CredentialResult<RewrapReport> {
        self.rewrap_retired_paged(DEFAULT_REWRAP_PAGE).await
    }

    /// Walks every stale row in id order, `page_size` rows per query. Rows that
    /// cannot be decrypted are reported as failed and the cursor moves past them.
    pub async fn rewrap_retired_paged(&self, page_size: i64) -> CredentialResult<RewrapReport> {
        let page_size = page_size.max(1);
        let active_version = self.cipher.ring().active_version();
        let mut report = RewrapReport {
            active_version,
            ..RewrapReport::default()
        };

        let mut after = None;
        loop {
            let page = self
                .store
                .list_stale_versions(active_version, after, page_size)
                .await?;
            let last = match page.last() {
                Some(record) => record.id,
                None => break,
            };
            for record in &page {
                self.rewrap_one(record, &mut report).await?;
            }
            after = Some(last);
        }

        info!(
            active_version,
            rewrapped = report.rewrapped.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "provider credential rewrap sweep finished"
        );
        Ok(report)
    }

    async fn rewrap_one(
        &self,
        record: &ProviderCredential,
        report: &mut RewrapReport,
    ) -> CredentialResult<()> {
        let replacement = match self.cipher.rewrap(&record.secret) {
            Ok(replacement) => replacement,
            Err(err) => {
                error!(credential_id = %record.id, key_version = record.secret.key_version, reason = err.reason_code(), "provider credential rewrap failed");
                report.failed.push(record.id);
                return Ok(());
            }
        };
        let swapped = self
            .store
            .replace_secret(
                &record.owner_id,
                record.id,
                &replacement,
                Some(&record.secret.nonce),
                false,
                &|previous: &ProviderCredential, updated: &ProviderCredential| {
                    vec![credential_event(
                        updated,
                        AuditEventType::CredentialRewrapped,
                        json!({
                            "from_version": previous.secret.key_version,
                            "to_version": updated.secret.key_version,
                        }),
                    )]
                },
            )
            .await;
        match swapped {
            Ok(Some(_)) => report.rewrapped.push(record.id),
            Ok(None) | Err(CredentialError::NotFound) => report.skipped.push(record.id),
            Err(err) => return Err(err),
        }
        Ok(())
    }

    async fn fetch(&self, owner_id: &str, id: Uuid) -> CredentialResult<ProviderCredential> {
        self.store
            .get_credential(owner_id, id)
            .await?
            .ok_or(CredentialError::NotFound)
    }
}

fn credential_event(
    record: &ProviderCredential,
    event_type: AuditEventType,
    payload: serde_json::Value,
) -> AuditEvent {
    AuditEvent::new(
        AuditSubject::ProviderCredential,
        record.id.to_string(),
        &record.owner_id,
        event_type,
        payload,
    )
}

fn normalize_provider(provider: &str) -> CredentialResult<String> {
    let provider = provider.trim().to_ascii_lowercase();
    if provider.is_empty() {
        return Err(CredentialError::InvalidInput("provider required".into()));
    }
    Ok(provider)
}
