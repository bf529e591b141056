use std::fs;
use std::sync::Arc;

use hmac::{Hmac, Mac};
use once_cell::sync::Lazy;
use rand_core::{OsRng, RngCore};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::crypto::{MasterKeyRing, Pepper};
use crate::error::{CredentialError, CredentialResult};

/// Address the HTTP server should bind to. Defaults to `0.0.0.0`.
pub static BIND_ADDRESS: Lazy<String> =
    Lazy::new(|| std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()));

/// Port the HTTP server should listen on. Defaults to `3000`.
pub static BIND_PORT: Lazy<u16> = Lazy::new(|| {
    std::env::var("BIND_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(3000)
});

/// When set to a truthy value, allows the application to continue running even if database
/// migrations fail. Defaults to `false`.
pub static ALLOW_MIGRATION_FAILURE: Lazy<bool> = Lazy::new(|| {
    std::env::var("ALLOW_MIGRATION_FAILURE")
        .ok()
        .map(|value| {
            let normalized = value.trim().to_ascii_lowercase();
            matches!(normalized.as_str(), "1" | "true" | "yes")
        })
        .unwrap_or(false)
});

/// Pool size for the PostgreSQL backend. Defaults to `5`.
pub static DATABASE_MAX_CONNECTIONS: Lazy<u32> = Lazy::new(|| {
    std::env::var("DATABASE_MAX_CONNECTIONS")
        .ok()
        .and_then(|value| value.trim().parse::<u32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(5)
});

/// Connection string for the PostgreSQL backend.
pub static DATABASE_URL: Lazy<Option<String>> = Lazy::new(|| read_optional_env("DATABASE_URL"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Postgres,
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageBackend::Memory => "memory",
            StorageBackend::Postgres => "postgres",
        }
    }

    /// Reads `STORAGE_BACKEND`; defaults to `postgres` when `DATABASE_URL` is set.
    pub fn from_env() -> CredentialResult<Self> {
        match read_optional_env("STORAGE_BACKEND") {
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "memory" => Ok(StorageBackend::Memory),
                "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
                other => Err(CredentialError::Configuration(format!(
                    "unsupported STORAGE_BACKEND value '{other}'; expected 'memory' or 'postgres'"
                ))),
            },
            None if DATABASE_URL.is_some() => Ok(StorageBackend::Postgres),
            None => Ok(StorageBackend::Memory),
        }
    }
}

fn read_optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Reads `file_key` as a path first, then falls back to `value_key`.
fn read_secret_env(value_key: &str, file_key: &str) -> CredentialResult<Option<Zeroizing<String>>> {
    if let Some(path) = read_optional_env(file_key) {
        let contents = Zeroizing::new(fs::read_to_string(&path).map_err(|err| {
            CredentialError::Configuration(format!("failed to read {file_key} from {path}: {err}"))
        })?);
        let trimmed = contents.trim();
        if !trimmed.is_empty() {
            return Ok(Some(Zeroizing::new(trimmed.to_string())));
        }
    }

    Ok(std::env::var(value_key)
        .ok()
        .map(Zeroizing::new)
        .map(|value| Zeroizing::new(value.trim().to_string()))
        .filter(|value| !value.is_empty()))
}

fn require_secret_env(value_key: &str, file_key: &str) -> CredentialResult<Zeroizing<String>> {
    read_secret_env(value_key, file_key)?.ok_or_else(|| {
        CredentialError::Configuration(format!("{value_key} or {file_key} must be set"))
    })
}

/// key: key-material
/// Master key ring and API-key pepper, loaded once at startup and shared by
/// reference.
#[derive(Clone, Debug)]
pub struct KeyMaterial {
    pub ring: Arc<MasterKeyRing>,
    pub pepper: Arc<Pepper>,
}

impl KeyMaterial {
    /// Reads `MASTER_KEYS` (`version:base64,...`), `MASTER_KEY_ACTIVE_VERSION`
    /// (defaults to the highest configured version) and `API_KEY_PEPPER`.
    pub fn from_env() -> CredentialResult<Self> {
        let master_keys = require_secret_env("MASTER_KEYS", "MASTER_KEYS_FILE")?;
        let active_version = match read_optional_env("MASTER_KEY_ACTIVE_VERSION") {
            Some(raw) => raw.parse::<i32>().map_err(|_| {
                CredentialError::Configuration(format!(
                    "MASTER_KEY_ACTIVE_VERSION `{raw}` is not an integer"
                ))
            })?,
            None => highest_version(&master_keys)?,
        };
        let ring = MasterKeyRing::parse(&master_keys, active_version)?;

        let pepper = require_secret_env("API_KEY_PEPPER", "API_KEY_PEPPER_FILE")?;
        let pepper = Pepper::new(pepper.as_bytes().to_vec())?;

        Ok(Self {
            ring: Arc::new(ring),
            pepper: Arc::new(pepper),
        })
    }
}

fn highest_version(master_keys: &str) -> CredentialResult<i32> {
    master_keys
        .split(',')
        .filter_map(|entry| entry.split_once(':'))
        .filter_map(|(version, _)| version.trim().parse::<i32>().ok())
        .max()
        .ok_or_else(|| CredentialError::Configuration("no master keys configured".into()))
}

const MIN_ADMIN_TOKEN_LEN: usize = 16;

/// key: admin-token
/// Operator bearer token. Only an HMAC of the token under a per-process key is
/// kept, and presented tokens are checked with a constant-time tag comparison.
pub struct AdminToken {
    mac_key: Zeroizing<[u8; 32]>,
    expected: Vec<u8>,
}

impl AdminToken {
    pub fn new(token: &str) -> CredentialResult<Self> {
        if token.len() < MIN_ADMIN_TOKEN_LEN {
            return Err(CredentialError::Configuration(format!(
                "admin token must be at least {MIN_ADMIN_TOKEN_LEN} characters"
            )));
        }
        let mut mac_key = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(&mut mac_key[..]);
        let mut mac = Hmac::<Sha256>::new_from_slice(&mac_key[..])
            .map_err(|_| CredentialError::Configuration("admin token key rejected".into()))?;
        mac.update(token.as_bytes());
        let expected = mac.finalize().into_bytes().to_vec();
        Ok(Self { mac_key, expected })
    }

    pub fn from_env() -> CredentialResult<Self> {
        let token = require_secret_env("ADMIN_TOKEN", "ADMIN_TOKEN_FILE")?;
        Self::new(&token)
    }

    pub fn matches(&self, presented: &str) -> bool {
        let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(&self.mac_key[..]) else {
            return false;
        };
        mac.update(presented.as_bytes());
        mac.verify_slice(&self.expected).is_ok()
    }
}

impl std::fmt::Debug for AdminToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AdminToken(***)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_token_matches_exact_value_only() {
        let token = AdminToken::new("operator-token-0123").unwrap();
        assert!(token.matches("operator-token-0123"));
        assert!(!token.matches("operator-token-0124"));
        assert!(!token.matches(""));
        assert_eq!(format!("{token:?}"), "AdminToken(***)");
    }

    #[test]
    fn short_admin_token_is_rejected() {
        assert!(matches!(
            AdminToken::new("short"),
            Err(CredentialError::Configuration(_))
        ));
    }

    #[test]
    fn highest_version_is_default_active() {
        assert_eq!(highest_version("1:AAAA, 3:BBBB,2:CCCC").unwrap(), 3);
        assert!(highest_version("").is_err());
    }
}
