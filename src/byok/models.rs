use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::EncryptedSecret;

/// key: provider-credential-model
/// Customer-supplied upstream credential, stored only in encrypted form.
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderCredential {
    pub id: Uuid,
    pub owner_id: String,
    pub provider: String,
    pub secret: EncryptedSecret,
    pub enabled: bool,
    pub always_use: bool,
    pub verification_status: VerificationStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    #[default]
    Unverified,
    Valid,
    Invalid,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Unverified => "unverified",
            VerificationStatus::Valid => "valid",
            VerificationStatus::Invalid => "invalid",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "unverified" => Some(Self::Unverified),
            "valid" => Some(Self::Valid),
            "invalid" => Some(Self::Invalid),
            _ => None,
        }
    }
}

/// Incoming BYOK submission. The plaintext is consumed by the service and
/// never stored.
#[derive(Deserialize)]
pub struct SubmitCredential {
    pub provider: String,
    pub secret: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub always_use: bool,
}

fn default_enabled() -> bool {
    true
}

impl std::fmt::Debug for SubmitCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmitCredential")
            .field("provider", &self.provider)
            .field("secret", &"***")
            .field("enabled", &self.enabled)
            .field("always_use", &self.always_use)
            .finish()
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct CredentialFlagsUpdate {
    pub enabled: Option<bool>,
    pub always_use: Option<bool>,
}

impl CredentialFlagsUpdate {
    pub fn is_empty(&self) -> bool {
        self.enabled.is_none() && self.always_use.is_none()
    }
}

/// Display-safe projection: fragments only, no ciphertext.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ProviderCredentialView {
    pub id: Uuid,
    pub provider: String,
    pub display_prefix: String,
    pub display_suffix: String,
    pub key_version: i32,
    pub enabled: bool,
    pub always_use: bool,
    pub verification_status: VerificationStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&ProviderCredential> for ProviderCredentialView {
    fn from(record: &ProviderCredential) -> Self {
        Self {
            id: record.id,
            provider: record.provider.clone(),
            display_prefix: record.secret.display_prefix.clone(),
            display_suffix: record.secret.display_suffix.clone(),
            key_version: record.secret.key_version,
            enabled: record.enabled,
            always_use: record.always_use,
            verification_status: record.verification_status,
            error_message: record.error_message.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}
