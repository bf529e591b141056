use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::info;
use zeroize::Zeroizing;

use super::models::{GatewayApiKey, IssueKeyRequest, KeyStatus, KeyUpdate, LimitsUpdate};
use super::secret::{generate_key_id, generate_secret, hash_secret, ApiKeySecret};
use super::store::{ApiKeyStore, RevokeOutcome};
use crate::audit::{AuditEvent, AuditEventType, AuditSubject};
use crate::crypto::Pepper;
use crate::error::{CredentialError, CredentialResult};

/// key: gateway-keys-issued
/// The one value that carries a plaintext gateway secret. Not `Clone`; the
/// stored record has no field able to hold the secret.
#[derive(Debug)]
pub struct IssuedKey {
    pub key_id: String,
    pub secret: ApiKeySecret,
    pub display_prefix: String,
    pub record: GatewayApiKey,
}

impl IssuedKey {
    /// `<key_id>.<secret>`, the value clients send as a bearer credential.
    pub fn bearer_token(&self) -> Zeroizing<String> {
        Zeroizing::new(format!("{}.{}", self.key_id, self.secret.expose()))
    }
}

/// key: gateway-keys-issuer
/// Issues gateway keys and drives their lifecycle.
#[derive(Clone)]
pub struct KeyIssuer {
    store: Arc<dyn ApiKeyStore>,
    pepper: Arc<Pepper>,
}

impl KeyIssuer {
    pub fn new(store: Arc<dyn ApiKeyStore>, pepper: Arc<Pepper>) -> Self {
        Self { store, pepper }
    }

    pub async fn issue(
        &self,
        owner_id: &str,
        request: IssueKeyRequest,
    ) -> CredentialResult<IssuedKey> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(CredentialError::InvalidInput("key name required".into()));
        }
        if owner_id.trim().is_empty() {
            return Err(CredentialError::InvalidInput("owner required".into()));
        }
        request.limits.validate()?;

        let key_id = generate_key_id();
        let (secret, display_prefix) = generate_secret();
        let secret_hash = hash_secret(&self.pepper, secret.expose())?;
        let now = Utc::now();

        let record = GatewayApiKey {
            key_id: key_id.clone(),
            secret_hash,
            status: KeyStatus::Active,
            display_prefix: display_prefix.clone(),
            name: name.to_string(),
            owner_id: owner_id.to_string(),
            scopes: request.scopes,
            created_by: request.created_by,
            limits: request.limits,
            created_at: now,
            updated_at: now,
            revoked_at: None,
        };
        let issued = key_event(
            &record,
            AuditEventType::KeyIssued,
            json!({
                "name": record.name,
                "display_prefix": record.display_prefix,
                "scopes": record.scopes,
                "created_by": record.created_by,
            }),
        );
        self.store.insert_key(&record, &[issued]).await?;
        info!(key_id = %record.key_id, owner_id = %record.owner_id, "gateway key issued");

        Ok(IssuedKey {
            key_id,
            secret,
            display_prefix,
            record,
        })
    }

    pub async fn get(&self, key_id: &str) -> CredentialResult<GatewayApiKey> {
        self.store
            .find_key(key_id)
            .await?
            .ok_or(CredentialError::NotFound)
    }

    pub async fn list(&self, owner_id: &str) -> CredentialResult<Vec<GatewayApiKey>> {
        self.store.list_keys(owner_id).await
    }

    /// Renames and/or pauses/resumes. Never touches the secret hash.
    pub async fn update(&self, key_id: &str, update: KeyUpdate) -> CredentialResult<GatewayApiKey> {
        let name = match update.name.as_deref().map(str::trim) {
            Some("") => return Err(CredentialError::InvalidInput("key name required".into())),
            other => other,
        };
        let status = update.target_status();
        if name.is_none() && status.is_none() {
            return self.get(key_id).await;
        }

        let updated = self
            .store
            .update_profile(key_id, name, status, &profile_events)
            .await?;
        info!(key_id = %key_id, status = updated.status.as_str(), "gateway key updated");
        Ok(updated)
    }

    /// Replaces the secret under the same key id. The old secret stops
    /// verifying as soon as the new hash is committed.
    pub async fn rotate_secret(&self, key_id: &str) -> CredentialResult<IssuedKey> {
        let (secret, display_prefix) = generate_secret();
        let secret_hash = hash_secret(&self.pepper, secret.expose())?;
        let record = self
            .store
            .replace_secret_hash(
                key_id,
                &secret_hash,
                &display_prefix,
                &|_: &GatewayApiKey, rotated: &GatewayApiKey| {
                    vec![key_event(
                        rotated,
                        AuditEventType::KeySecretRotated,
                        json!({"display_prefix": rotated.display_prefix}),
                    )]
                },
            )
            .await?;
        info!(key_id = %key_id, "gateway key secret rotated");

        Ok(IssuedKey {
            key_id: record.key_id.clone(),
            secret,
            display_prefix,
            record,
        })
    }

    pub async fn update_limits(
        &self,
        key_id: &str,
        update: LimitsUpdate,
    ) -> CredentialResult<GatewayApiKey> {
        update.validate()?;
        self.store
            .update_limits(key_id, &update, &|_: &GatewayApiKey, updated: &GatewayApiKey| {
                vec![key_event(
                    updated,
                    AuditEventType::KeyLimitsUpdated,
                    json!({"limits": updated.limits}),
                )]
            })
            .await
    }

    pub async fn set_soft_blocked(
        &self,
        key_id: &str,
        soft_blocked: bool,
    ) -> CredentialResult<GatewayApiKey> {
        self.update_limits(
            key_id,
            LimitsUpdate {
                soft_blocked: Some(soft_blocked),
                ..LimitsUpdate::default()
            },
        )
        .await
    }

    /// Revokes the key. When `confirmation_name` is supplied it has to match the
    /// stored name exactly or nothing happens.
    pub async fn revoke(
        &self,
        key_id: &str,
        confirmation_name: Option<&str>,
    ) -> CredentialResult<RevokeOutcome> {
        let confirmed = confirmation_name.is_some();
        let outcome = self
            .store
            .revoke_key(key_id, confirmation_name, &|_: &GatewayApiKey, revoked: &GatewayApiKey| {
                vec![key_event(
                    revoked,
                    AuditEventType::KeyRevoked,
                    json!({"confirmed": confirmed}),
                )]
            })
            .await?;
        if outcome.changed() {
            info!(key_id = %key_id, "gateway key revoked");
        }
        Ok(outcome)
    }
}

fn key_event(record: &GatewayApiKey, event_type: AuditEventType, payload: serde_json::Value) -> AuditEvent {
    AuditEvent::new(
        AuditSubject::ApiKey,
        &record.key_id,
        &record.owner_id,
        event_type,
        payload,
    )
}

/// One event per field that actually changed.
fn profile_events(previous: &GatewayApiKey, updated: &GatewayApiKey) -> Vec<AuditEvent> {
    let mut events = Vec::new();
    if previous.name != updated.name {
        events.push(key_event(
            updated,
            AuditEventType::KeyRenamed,
            json!({"previous_name": previous.name, "name": updated.name}),
        ));
    }
    if previous.status != updated.status {
        let event_type = match updated.status {
            KeyStatus::Paused => AuditEventType::KeyPaused,
            _ => AuditEventType::KeyResumed,
        };
        events.push(key_event(
            updated,
            event_type,
            json!({"previous_status": previous.status}),
        ));
    }
    events
}
