use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::models::{GatewayApiKey, KeyStatus};
use super::policy::{LimitPolicy, ViolatedLimit};
use super::secret::{parse_bearer, reject_unknown_key, secret_matches};
use super::store::ApiKeyStore;
use crate::crypto::Pepper;
use crate::error::{AuthFailure, CredentialError, CredentialResult};
use crate::usage::{UsageStore, UsageWindow};

/// key: gateway-keys-verifier
/// Authentication hot path: lookup, constant-time hash check, lifecycle, limits.
#[derive(Clone)]
pub struct KeyVerifier {
    store: Arc<dyn ApiKeyStore>,
    usage: Arc<dyn UsageStore>,
    pepper: Arc<Pepper>,
    policy: LimitPolicy,
}

impl KeyVerifier {
    pub fn new(
        store: Arc<dyn ApiKeyStore>,
        usage: Arc<dyn UsageStore>,
        pepper: Arc<Pepper>,
    ) -> Self {
        Self {
            store,
            usage,
            pepper,
            policy: LimitPolicy,
        }
    }

    pub async fn verify(&self, key_id: &str, secret: &str) -> CredentialResult<GatewayApiKey> {
        self.verify_at(key_id, secret, Utc::now()).await
    }

    /// Verifies against the usage windows containing `at`.
    pub async fn verify_at(
        &self,
        key_id: &str,
        secret: &str,
        at: DateTime<Utc>,
    ) -> CredentialResult<GatewayApiKey> {
        let result = self.evaluate(key_id, secret, at).await;
        if let Err(err) = &result {
            match err {
                CredentialError::LimitExceeded(limit) => {
                    warn!(key_id = %key_id, reason = err.reason_code(), %limit, "gateway key denied");
                }
                _ => warn!(key_id = %key_id, reason = err.reason_code(), "gateway key denied"),
            }
        }
        result
    }

    /// Accepts an `Authorization` header value of the form `Bearer <key_id>.<secret>`.
    pub async fn verify_bearer(&self, header: &str) -> CredentialResult<GatewayApiKey> {
        let Some((key_id, secret)) = parse_bearer(header) else {
            warn!(reason = AuthFailure::Malformed.as_str(), "gateway key denied");
            return Err(CredentialError::Unauthorized(AuthFailure::Malformed));
        };
        self.verify(key_id, secret).await
    }

    /// Adds one request and `cost_minor` to every usage window of the key.
    pub async fn record_usage(&self, key_id: &str, cost_minor: i64) -> CredentialResult<()> {
        self.record_usage_at(key_id, cost_minor, Utc::now()).await
    }

    pub async fn record_usage_at(
        &self,
        key_id: &str,
        cost_minor: i64,
        at: DateTime<Utc>,
    ) -> CredentialResult<()> {
        if cost_minor < 0 {
            return Err(CredentialError::InvalidInput(
                "cost must not be negative".into(),
            ));
        }
        if self.store.find_key(key_id).await?.is_none() {
            return Err(CredentialError::NotFound);
        }
        self.usage.increment(key_id, at, 1, cost_minor).await
    }

    /// Drops counters for windows that closed before the ones containing `at`.
    pub async fn prune_usage(&self, at: DateTime<Utc>) -> CredentialResult<u64> {
        let cutoff = UsageWindow::retention_cutoff(at);
        let removed = self.usage.prune_before(cutoff).await?;
        if removed > 0 {
            info!(removed, %cutoff, "expired usage windows pruned");
        }
        Ok(removed)
    }

    async fn evaluate(
        &self,
        key_id: &str,
        secret: &str,
        at: DateTime<Utc>,
    ) -> CredentialResult<GatewayApiKey> {
        let Some(record) = self.store.find_key(key_id).await? else {
            reject_unknown_key(&self.pepper, secret);
            return Err(CredentialError::Unauthorized(AuthFailure::UnknownKey));
        };

        if !secret_matches(&self.pepper, secret, &record.secret_hash) {
            return Err(CredentialError::Unauthorized(AuthFailure::SecretMismatch));
        }
        if record.status != KeyStatus::Active {
            return Err(CredentialError::KeyInactive);
        }
        if record.limits.soft_blocked {
            return Err(CredentialError::LimitExceeded(ViolatedLimit::SoftBlocked));
        }

        let usage = self.usage.snapshot(&record.key_id, at).await?;
        let decision = self.policy.evaluate(&record, &usage);
        if let Some(violated) = decision.violated {
            return Err(CredentialError::LimitExceeded(violated));
        }
        Ok(record)
    }
}
