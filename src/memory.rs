//! In-process stores backed by `DashMap`. Every conditional mutation happens
//! while holding the entry's shard lock, and its audit events are appended
//! before the lock is released.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditFilter, AuditFn, AuditLog, AuditSink};
use crate::byok::{CredentialFlagsUpdate, ProviderCredential, ProviderCredentialStore, VerificationStatus};
use crate::crypto::EncryptedSecret;
use crate::error::{CredentialError, CredentialResult};
use crate::keys::{ApiKeyStore, GatewayApiKey, KeyStatus, LimitsUpdate, RevokeOutcome};
use crate::usage::{UsageSnapshot, UsageStore, UsageWindow, WindowUsage};

pub struct MemoryApiKeyStore {
    keys: DashMap<String, GatewayApiKey>,
    audit: Arc<dyn AuditSink>,
}

impl MemoryApiKeyStore {
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self {
            keys: DashMap::new(),
            audit,
        }
    }

    fn mutate_live<F>(
        &self,
        key_id: &str,
        apply: F,
        audit: AuditFn<'_, GatewayApiKey>,
    ) -> CredentialResult<GatewayApiKey>
    where
        F: FnOnce(&mut GatewayApiKey),
    {
        let mut record = self.keys.get_mut(key_id).ok_or(CredentialError::NotFound)?;
        if record.status == KeyStatus::Revoked {
            return Err(CredentialError::KeyInactive);
        }
        let mut updated = record.clone();
        apply(&mut updated);
        updated.updated_at = Utc::now();
        self.audit.append(&audit(&*record, &updated))?;
        *record = updated.clone();
        Ok(updated)
    }
}

#[async_trait]
impl ApiKeyStore for MemoryApiKeyStore {
    async fn insert_key(&self, record: &GatewayApiKey, events: &[AuditEvent]) -> CredentialResult<()> {
        match self.keys.entry(record.key_id.clone()) {
            Entry::Occupied(_) => Err(CredentialError::InvalidInput("key id already exists".into())),
            Entry::Vacant(slot) => {
                self.audit.append(events)?;
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn find_key(&self, key_id: &str) -> CredentialResult<Option<GatewayApiKey>> {
        Ok(self.keys.get(key_id).map(|record| record.clone()))
    }

    async fn list_keys(&self, owner_id: &str) -> CredentialResult<Vec<GatewayApiKey>> {
        let mut keys: Vec<GatewayApiKey> = self
            .keys
            .iter()
            .filter(|record| record.owner_id == owner_id)
            .map(|record| record.clone())
            .collect();
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(keys)
    }

    async fn update_profile(
        &self,
        key_id: &str,
        name: Option<&str>,
        status: Option<KeyStatus>,
        audit: AuditFn<'_, GatewayApiKey>,
    ) -> CredentialResult<GatewayApiKey> {
        if status == Some(KeyStatus::Revoked) {
            return Err(CredentialError::InvalidInput(
                "revocation goes through revoke".into(),
            ));
        }
        self.mutate_live(
            key_id,
            |record| {
                if let Some(name) = name {
                    record.name = name.to_string();
                }
                if let Some(status) = status {
                    record.status = status;
                }
            },
            audit,
        )
    }

    async fn replace_secret_hash(
        &self,
        key_id: &str,
        secret_hash: &str,
        display_prefix: &str,
        audit: AuditFn<'_, GatewayApiKey>,
    ) -> CredentialResult<GatewayApiKey> {
        self.mutate_live(
            key_id,
            |record| {
                record.secret_hash = secret_hash.to_string();
                record.display_prefix = display_prefix.to_string();
            },
            audit,
        )
    }

    async fn update_limits(
        &self,
        key_id: &str,
        update: &LimitsUpdate,
        audit: AuditFn<'_, GatewayApiKey>,
    ) -> CredentialResult<GatewayApiKey> {
        self.mutate_live(key_id, |record| update.apply(&mut record.limits), audit)
    }

    async fn revoke_key(
        &self,
        key_id: &str,
        confirmation: Option<&str>,
        audit: AuditFn<'_, GatewayApiKey>,
    ) -> CredentialResult<RevokeOutcome> {
        let mut record = self.keys.get_mut(key_id).ok_or(CredentialError::NotFound)?;
        if record.status == KeyStatus::Revoked {
            return Ok(RevokeOutcome::AlreadyRevoked(record.clone()));
        }
        if confirmation.map_or(false, |name| name != record.name) {
            return Err(CredentialError::ConfirmationMismatch);
        }
        let now = Utc::now();
        let mut revoked = record.clone();
        revoked.status = KeyStatus::Revoked;
        revoked.revoked_at = Some(now);
        revoked.updated_at = now;
        self.audit.append(&audit(&*record, &revoked))?;
        *record = revoked.clone();
        Ok(RevokeOutcome::Revoked(revoked))
    }
}

/// Credentials grouped by owner, so a single entry lock covers the
/// `(owner, fingerprint)` uniqueness check and the write that follows it.
pub struct MemoryProviderCredentialStore {
    owners: DashMap<String, HashMap<Uuid, ProviderCredential>>,
    audit: Arc<dyn AuditSink>,
}

fn fingerprint_taken(
    rows: &HashMap<Uuid, ProviderCredential>,
    fingerprint: &str,
    except: Option<Uuid>,
) -> bool {
    rows.values()
        .any(|row| row.secret.fingerprint == fingerprint && Some(row.id) != except)
}

impl MemoryProviderCredentialStore {
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self {
            owners: DashMap::new(),
            audit,
        }
    }

    fn mutate<F>(
        &self,
        owner_id: &str,
        id: Uuid,
        apply: F,
        audit: AuditFn<'_, ProviderCredential>,
    ) -> CredentialResult<ProviderCredential>
    where
        F: FnOnce(&mut ProviderCredential),
    {
        let mut rows = self.owners.get_mut(owner_id).ok_or(CredentialError::NotFound)?;
        let row = rows.get_mut(&id).ok_or(CredentialError::NotFound)?;
        let mut updated = row.clone();
        apply(&mut updated);
        updated.updated_at = Utc::now();
        self.audit.append(&audit(&*row, &updated))?;
        *row = updated.clone();
        Ok(updated)
    }
}

#[async_trait]
impl ProviderCredentialStore for MemoryProviderCredentialStore {
    async fn insert_credential(
        &self,
        record: &ProviderCredential,
        events: &[AuditEvent],
    ) -> CredentialResult<()> {
        let mut rows = self.owners.entry(record.owner_id.clone()).or_default();
        if fingerprint_taken(&rows, &record.secret.fingerprint, None) {
            return Err(CredentialError::DuplicateSecret);
        }
        self.audit.append(events)?;
        rows.insert(record.id, record.clone());
        Ok(())
    }

    async fn get_credential(
        &self,
        owner_id: &str,
        id: Uuid,
    ) -> CredentialResult<Option<ProviderCredential>> {
        Ok(self
            .owners
            .get(owner_id)
            .and_then(|rows| rows.get(&id).cloned()))
    }

    async fn list_credentials(&self, owner_id: &str) -> CredentialResult<Vec<ProviderCredential>> {
        let mut rows: Vec<ProviderCredential> = self
            .owners
            .get(owner_id)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn replace_secret(
        &self,
        owner_id: &str,
        id: Uuid,
        secret: &EncryptedSecret,
        previous_nonce: Option<&[u8]>,
        reset_verification: bool,
        audit: AuditFn<'_, ProviderCredential>,
    ) -> CredentialResult<Option<ProviderCredential>> {
        let mut rows = self.owners.get_mut(owner_id).ok_or(CredentialError::NotFound)?;
        if fingerprint_taken(&rows, &secret.fingerprint, Some(id)) {
            return Err(CredentialError::DuplicateSecret);
        }
        let row = rows.get_mut(&id).ok_or(CredentialError::NotFound)?;
        if previous_nonce.map_or(false, |nonce| row.secret.nonce != nonce) {
            return Ok(None);
        }
        let mut updated = row.clone();
        updated.secret = secret.clone();
        if reset_verification {
            updated.verification_status = VerificationStatus::Unverified;
            updated.error_message = None;
        }
        updated.updated_at = Utc::now();
        self.audit.append(&audit(&*row, &updated))?;
        *row = updated.clone();
        Ok(Some(updated))
    }

    async fn update_flags(
        &self,
        owner_id: &str,
        id: Uuid,
        flags: &CredentialFlagsUpdate,
        audit: AuditFn<'_, ProviderCredential>,
    ) -> CredentialResult<ProviderCredential> {
        self.mutate(
            owner_id,
            id,
            |row| {
                if let Some(enabled) = flags.enabled {
                    row.enabled = enabled;
                }
                if let Some(always_use) = flags.always_use {
                    row.always_use = always_use;
                }
            },
            audit,
        )
    }

    async fn record_verification(
        &self,
        owner_id: &str,
        id: Uuid,
        status: VerificationStatus,
        error_message: Option<&str>,
        audit: AuditFn<'_, ProviderCredential>,
    ) -> CredentialResult<ProviderCredential> {
        self.mutate(
            owner_id,
            id,
            |row| {
                row.verification_status = status;
                row.error_message = error_message.map(str::to_string);
            },
            audit,
        )
    }

    async fn delete_credential(
        &self,
        owner_id: &str,
        id: Uuid,
        audit: AuditFn<'_, ProviderCredential>,
    ) -> CredentialResult<ProviderCredential> {
        let mut rows = self.owners.get_mut(owner_id).ok_or(CredentialError::NotFound)?;
        let row = rows.get(&id).ok_or(CredentialError::NotFound)?;
        self.audit.append(&audit(row, row))?;
        rows.remove(&id).ok_or(CredentialError::NotFound)
    }

    async fn list_stale_versions(
        &self,
        active_version: i32,
        after: Option<Uuid>,
        limit: i64,
    ) -> CredentialResult<Vec<ProviderCredential>> {
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        let mut stale: Vec<ProviderCredential> = self
            .owners
            .iter()
            .flat_map(|rows| {
                rows.values()
                    .filter(|row| row.secret.key_version != active_version)
                    .filter(|row| after.map_or(true, |cursor| row.id > cursor))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        stale.sort_by_key(|row| row.id);
        stale.truncate(limit);
        Ok(stale)
    }
}

#[derive(Default)]
pub struct MemoryUsageStore {
    counters: DashMap<(String, UsageWindow, NaiveDate), WindowUsage>,
}

#[async_trait]
impl UsageStore for MemoryUsageStore {
    async fn increment(
        &self,
        key_id: &str,
        at: DateTime<Utc>,
        requests: i64,
        cost_minor: i64,
    ) -> CredentialResult<()> {
        for window in UsageWindow::ALL {
            let mut counter = self
                .counters
                .entry((key_id.to_string(), window, window.window_start(at)))
                .or_default();
            counter.requests = counter.requests.saturating_add(requests);
            counter.cost_minor = counter.cost_minor.saturating_add(cost_minor);
        }
        Ok(())
    }

    async fn snapshot(&self, key_id: &str, at: DateTime<Utc>) -> CredentialResult<UsageSnapshot> {
        let mut snapshot = UsageSnapshot::default();
        for window in UsageWindow::ALL {
            let usage = self
                .counters
                .get(&(key_id.to_string(), window, window.window_start(at)))
                .map(|counter| *counter)
                .unwrap_or_default();
            snapshot.set_window(window, usage);
        }
        Ok(snapshot)
    }

    async fn prune_before(&self, cutoff: NaiveDate) -> CredentialResult<u64> {
        let mut removed = 0u64;
        self.counters.retain(|(_, _, start), _| {
            let keep = *start >= cutoff;
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }
}

#[derive(Default)]
pub struct MemoryAuditLog {
    events: RwLock<Vec<AuditEvent>>,
}

impl MemoryAuditLog {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AuditSink for MemoryAuditLog {
    fn append(&self, events: &[AuditEvent]) -> CredentialResult<()> {
        self.events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(events);
        Ok(())
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    /// Newest first, same ordering as the PostgreSQL log.
    async fn query(&self, filter: &AuditFilter) -> CredentialResult<Vec<AuditEvent>> {
        let limit = usize::try_from(filter.limit.unwrap_or(100).clamp(1, 1_000)).unwrap_or(100);
        Ok(self
            .events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .filter(|event| filter.matches(event))
            .take(limit)
            .cloned()
            .collect())
    }
}
