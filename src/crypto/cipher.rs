use std::fmt;
use std::sync::Arc;

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce, Tag};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::keyring::{MasterKey, MasterKeyRing};
use crate::error::{CredentialError, CredentialResult};

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
const DISPLAY_PREFIX_CHARS: usize = 6;
const DISPLAY_SUFFIX_CHARS: usize = 4;
const MAX_NONCE_DRAWS: usize = 4;

/// Sealed form of a secret: everything needed to open it again plus the
/// display-safe fragments and dedup fingerprint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedSecret {
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    pub tag: Vec<u8>,
    pub key_version: i32,
    pub fingerprint: String,
    pub display_prefix: String,
    pub display_suffix: String,
}

/// Decrypted plaintext. Redacted in `Debug`/`Display` and wiped on drop.
pub struct RevealedSecret(Zeroizing<String>);

impl RevealedSecret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RevealedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RevealedSecret(***)")
    }
}

impl fmt::Display for RevealedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Hex SHA-256 of the raw plaintext. Used to spot duplicate submissions
/// without decrypting anything.
pub fn fingerprint(plaintext: &str) -> String {
    hex::encode(Sha256::digest(plaintext.as_bytes()))
}

/// First/last characters shown to users. Short secrets get at most a quarter of
/// their characters exposed on each side.
///
/// This intentionally departs from a fixed 6/4 split: below 24 characters the
/// fragments shrink rather than reveal most of the secret.
pub fn display_fragment(plaintext: &str) -> (String, String) {
    let chars: Vec<char> = plaintext.chars().collect();
    let budget = chars.len() / 4;
    let prefix_len = DISPLAY_PREFIX_CHARS.min(budget);
    let suffix_len = DISPLAY_SUFFIX_CHARS.min(budget);
    let prefix = chars[..prefix_len].iter().collect();
    let suffix = chars[chars.len() - suffix_len..].iter().collect();
    (prefix, suffix)
}

fn associated_data(key_version: i32) -> Vec<u8> {
    format!("gateway-credentials:secret:v{key_version}").into_bytes()
}

fn cipher_for(key: &MasterKey) -> Aes256Gcm {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.bytes()))
}

/// AES-256-GCM envelope over the master key ring.
#[derive(Clone, Debug)]
pub struct SecretCipher {
    ring: Arc<MasterKeyRing>,
}

impl SecretCipher {
    pub fn new(ring: Arc<MasterKeyRing>) -> Self {
        Self { ring }
    }

    pub fn ring(&self) -> &MasterKeyRing {
        &self.ring
    }

    /// Encrypts under `key_version`, or the active version when `None`.
    pub fn encrypt(
        &self,
        plaintext: &str,
        key_version: Option<i32>,
    ) -> CredentialResult<EncryptedSecret> {
        self.seal(plaintext, key_version, None)
    }

    pub fn decrypt(&self, secret: &EncryptedSecret) -> CredentialResult<RevealedSecret> {
        let key = self
            .ring
            .get(secret.key_version)
            .ok_or(CredentialError::KeyNotFound(secret.key_version))?;
        if secret.nonce.len() != NONCE_LEN || secret.tag.len() != TAG_LEN {
            return Err(CredentialError::Integrity);
        }

        let mut buffer = Zeroizing::new(secret.ciphertext.clone());
        cipher_for(key)
            .decrypt_in_place_detached(
                Nonce::from_slice(&secret.nonce),
                &associated_data(secret.key_version),
                &mut buffer,
                Tag::from_slice(&secret.tag),
            )
            .map_err(|_| CredentialError::Integrity)?;

        let plaintext =
            String::from_utf8(std::mem::take(&mut *buffer)).map_err(|_| CredentialError::Integrity)?;
        Ok(RevealedSecret(Zeroizing::new(plaintext)))
    }

    /// Seals a replacement value. The fresh nonce is guaranteed to differ from the
    /// previous generation's.
    pub fn rotate(
        &self,
        previous: &EncryptedSecret,
        new_plaintext: &str,
        key_version: Option<i32>,
    ) -> CredentialResult<EncryptedSecret> {
        self.seal(new_plaintext, key_version, Some(&previous.nonce))
    }

    /// Re-encrypts the same plaintext under the active master key.
    pub fn rewrap(&self, secret: &EncryptedSecret) -> CredentialResult<EncryptedSecret> {
        let plaintext = self.decrypt(secret)?;
        self.seal(plaintext.expose(), None, Some(&secret.nonce))
    }

    fn seal(
        &self,
        plaintext: &str,
        key_version: Option<i32>,
        avoid_nonce: Option<&[u8]>,
    ) -> CredentialResult<EncryptedSecret> {
        if plaintext.is_empty() {
            return Err(CredentialError::InvalidInput("secret must not be empty".into()));
        }
        let key_version = key_version.unwrap_or_else(|| self.ring.active_version());
        let key = self.ring.get(key_version).ok_or_else(|| {
            CredentialError::Configuration(format!(
                "master key version {key_version} is not configured"
            ))
        })?;

        let nonce = fresh_nonce(avoid_nonce)?;
        let mut buffer = plaintext.as_bytes().to_vec();
        let tag = cipher_for(key)
            .encrypt_in_place_detached(
                Nonce::from_slice(&nonce),
                &associated_data(key_version),
                &mut buffer,
            )
            .map_err(|_| CredentialError::InvalidInput("secret is too large to encrypt".into()))?;

        let (display_prefix, display_suffix) = display_fragment(plaintext);
        Ok(EncryptedSecret {
            ciphertext: buffer,
            nonce: nonce.to_vec(),
            tag: tag.to_vec(),
            key_version,
            fingerprint: fingerprint(plaintext),
            display_prefix,
            display_suffix,
        })
    }
}

fn fresh_nonce(avoid: Option<&[u8]>) -> CredentialResult<[u8; NONCE_LEN]> {
    for _ in 0..MAX_NONCE_DRAWS {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        if avoid != Some(&nonce[..]) {
            return Ok(nonce);
        }
    }
    Err(CredentialError::Configuration(
        "random source keeps repeating nonces".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keyring::MASTER_KEY_LEN;
    use std::collections::HashSet;

    fn cipher_with_versions(versions: &[i32], active: i32) -> SecretCipher {
        let keys = versions
            .iter()
            .map(|v| MasterKey::new(*v, [*v as u8; MASTER_KEY_LEN]).unwrap());
        SecretCipher::new(Arc::new(MasterKeyRing::new(keys, active).unwrap()))
    }

    #[test]
    fn round_trips_across_versions() {
        let cipher = cipher_with_versions(&[1, 2], 2);
        for version in [Some(1), Some(2), None] {
            for plaintext in ["sk-upstream-0123456789", "ü", "a longer secret with spaces ✓"] {
                let sealed = cipher.encrypt(plaintext, version).unwrap();
                assert_eq!(sealed.key_version, version.unwrap_or(2));
                assert_eq!(cipher.decrypt(&sealed).unwrap().expose(), plaintext);
            }
        }
    }

    #[test]
    fn nonces_never_repeat() {
        let cipher = cipher_with_versions(&[1], 1);
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let sealed = cipher.encrypt("same plaintext", None).unwrap();
            assert!(seen.insert(sealed.nonce));
        }
    }

    #[test]
    fn any_flipped_bit_fails_closed() {
        let cipher = cipher_with_versions(&[1], 1);
        let sealed = cipher.encrypt("upstream-secret", None).unwrap();

        for byte in 0..sealed.ciphertext.len() {
            for bit in 0..8 {
                let mut tampered = sealed.clone();
                tampered.ciphertext[byte] ^= 1 << bit;
                assert!(matches!(
                    cipher.decrypt(&tampered),
                    Err(CredentialError::Integrity)
                ));
            }
        }
        for byte in 0..TAG_LEN {
            for bit in 0..8 {
                let mut tampered = sealed.clone();
                tampered.tag[byte] ^= 1 << bit;
                assert!(matches!(
                    cipher.decrypt(&tampered),
                    Err(CredentialError::Integrity)
                ));
            }
        }
    }

    #[test]
    fn version_is_bound_to_ciphertext() {
        let cipher = cipher_with_versions(&[1, 2], 1);
        let mut sealed = cipher.encrypt("upstream-secret", Some(1)).unwrap();
        sealed.key_version = 2;
        assert!(matches!(cipher.decrypt(&sealed), Err(CredentialError::Integrity)));
    }

    #[test]
    fn truncated_nonce_or_tag_is_an_integrity_error() {
        let cipher = cipher_with_versions(&[1], 1);
        let sealed = cipher.encrypt("upstream-secret", None).unwrap();
        let mut short_tag = sealed.clone();
        short_tag.tag.pop();
        assert!(matches!(cipher.decrypt(&short_tag), Err(CredentialError::Integrity)));
        let mut short_nonce = sealed;
        short_nonce.nonce.pop();
        assert!(matches!(cipher.decrypt(&short_nonce), Err(CredentialError::Integrity)));
    }

    #[test]
    fn missing_versions_are_reported() {
        let cipher = cipher_with_versions(&[1], 1);
        assert!(matches!(
            cipher.encrypt("secret", Some(9)),
            Err(CredentialError::Configuration(_))
        ));
        let mut sealed = cipher.encrypt("secret", None).unwrap();
        sealed.key_version = 9;
        assert!(matches!(cipher.decrypt(&sealed), Err(CredentialError::KeyNotFound(9))));
    }

    #[test]
    fn empty_plaintext_is_rejected() {
        let cipher = cipher_with_versions(&[1], 1);
        assert!(matches!(
            cipher.encrypt("", None),
            Err(CredentialError::InvalidInput(_))
        ));
    }

    #[test]
    fn fingerprint_is_deterministic_and_discriminating() {
        assert_eq!(fingerprint("upstream-xyz"), fingerprint("upstream-xyz"));
        assert_ne!(fingerprint("upstream-xyz"), fingerprint("upstream-xyZ"));
        assert_eq!(fingerprint("upstream-xyz").len(), 64);

        let cipher = cipher_with_versions(&[1], 1);
        let a = cipher.encrypt("upstream-xyz", None).unwrap();
        let b = cipher.encrypt("upstream-xyz", None).unwrap();
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn display_fragment_limits_exposure() {
        assert_eq!(
            display_fragment("sk-proj-abcdefghijklmnopqrstuvwxyz"),
            ("sk-pro".to_string(), "wxyz".to_string())
        );
        assert_eq!(
            display_fragment("upstream-xyz"),
            ("ups".to_string(), "xyz".to_string())
        );
        assert_eq!(display_fragment("abc"), (String::new(), String::new()));
    }

    #[test]
    fn rotate_and_rewrap_refresh_every_field() {
        let cipher = cipher_with_versions(&[1, 2], 2);
        let original = cipher.encrypt("first-secret-value", Some(1)).unwrap();

        let rotated = cipher.rotate(&original, "second-secret-value", None).unwrap();
        assert_eq!(rotated.key_version, 2);
        assert_ne!(rotated.nonce, original.nonce);
        assert_ne!(rotated.fingerprint, original.fingerprint);
        assert_eq!(cipher.decrypt(&rotated).unwrap().expose(), "second-secret-value");

        let rewrapped = cipher.rewrap(&original).unwrap();
        assert_eq!(rewrapped.key_version, 2);
        assert_ne!(rewrapped.nonce, original.nonce);
        assert_eq!(rewrapped.fingerprint, original.fingerprint);
        assert_eq!(cipher.decrypt(&rewrapped).unwrap().expose(), "first-secret-value");
    }

    #[test]
    fn revealed_secret_is_redacted() {
        let cipher = cipher_with_versions(&[1], 1);
        let sealed = cipher.encrypt("do-not-print-me", None).unwrap();
        let revealed = cipher.decrypt(&sealed).unwrap();
        assert_eq!(format!("{revealed:?}"), "RevealedSecret(***)");
        assert_eq!(revealed.to_string(), "***");
    }
}
