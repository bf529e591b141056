//! Gateway key material: random identifiers, one-shot secrets, and the
//! pepper-keyed hash stored in their place.

use std::fmt;

use hmac::{Hmac, Mac};
use rand_core::{OsRng, RngCore};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::crypto::Pepper;
use crate::error::{CredentialError, CredentialResult};

type HmacSha256 = Hmac<Sha256>;

pub const KEY_ID_PREFIX: &str = "gk_";
pub const SECRET_PREFIX: &str = "sk_live_";
const KEY_ID_RANDOM_BYTES: usize = 8;
const SECRET_RANDOM_BYTES: usize = 32;
const DISPLAY_HEX_CHARS: usize = 4;

/// Stand-in hash compared against when the presented key id is unknown, so
/// that path performs the same HMAC work as a real mismatch.
const UNKNOWN_KEY_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Plaintext gateway secret. Exists only between issuance and the response
/// that hands it to the caller.
pub struct ApiKeySecret(Zeroizing<String>);

impl ApiKeySecret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKeySecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKeySecret(***)")
    }
}

pub fn generate_key_id() -> String {
    let mut bytes = [0u8; KEY_ID_RANDOM_BYTES];
    OsRng.fill_bytes(&mut bytes);
    format!("{KEY_ID_PREFIX}{}", hex::encode(bytes))
}

/// Returns the secret and its display prefix (`sk_live_ab12...`).
pub fn generate_secret() -> (ApiKeySecret, String) {
    let mut bytes = Zeroizing::new([0u8; SECRET_RANDOM_BYTES]);
    OsRng.fill_bytes(&mut bytes[..]);
    let encoded = Zeroizing::new(hex::encode(&bytes[..]));
    let display_prefix = format!("{SECRET_PREFIX}{}...", &encoded[..DISPLAY_HEX_CHARS]);
    let secret = ApiKeySecret(Zeroizing::new(format!("{SECRET_PREFIX}{}", encoded.as_str())));
    (secret, display_prefix)
}

fn keyed_mac(pepper: &Pepper) -> CredentialResult<HmacSha256> {
    HmacSha256::new_from_slice(pepper.as_bytes())
        .map_err(|_| CredentialError::Configuration("pepper cannot key HMAC-SHA256".into()))
}

/// Hex HMAC-SHA256 of the secret keyed by the pepper.
pub fn hash_secret(pepper: &Pepper, secret: &str) -> CredentialResult<String> {
    let mut mac = keyed_mac(pepper)?;
    mac.update(secret.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a presented secret against a stored hash.
pub fn secret_matches(pepper: &Pepper, presented: &str, stored_hash: &str) -> bool {
    let Ok(expected) = hex::decode(stored_hash) else {
        return false;
    };
    let Ok(mut mac) = keyed_mac(pepper) else {
        return false;
    };
    mac.update(presented.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

/// Burns the same HMAC work as a real comparison and always fails.
pub fn reject_unknown_key(pepper: &Pepper, presented: &str) -> bool {
    secret_matches(pepper, presented, UNKNOWN_KEY_HASH)
}

/// Splits `Bearer <key_id>.<secret>`.
pub fn parse_bearer(header: &str) -> Option<(&str, &str)> {
    let token = header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))?
        .trim();
    let (key_id, secret) = token.split_once('.')?;
    if !key_id.starts_with(KEY_ID_PREFIX) || secret.is_empty() {
        return None;
    }
    Some((key_id, secret))
}
