use std::collections::BTreeMap;
use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use zeroize::Zeroizing;

use crate::error::{CredentialError, CredentialResult};

pub const MASTER_KEY_LEN: usize = 32;
pub const MIN_PEPPER_LEN: usize = 32;

/// A single versioned AES-256 master key. The bytes are wiped on drop and never
/// appear in `Debug` output.
pub struct MasterKey {
    version: i32,
    bytes: Zeroizing<[u8; MASTER_KEY_LEN]>,
}

impl MasterKey {
    pub fn new(version: i32, bytes: [u8; MASTER_KEY_LEN]) -> CredentialResult<Self> {
        if version < 1 {
            return Err(CredentialError::Configuration(format!(
                "master key version must be positive, got {version}"
            )));
        }
        Ok(Self {
            version,
            bytes: Zeroizing::new(bytes),
        })
    }

    pub fn from_slice(version: i32, bytes: &[u8]) -> CredentialResult<Self> {
        let material: [u8; MASTER_KEY_LEN] = bytes.try_into().map_err(|_| {
            CredentialError::Configuration(format!(
                "master key version {version} must be {MASTER_KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Self::new(version, material)
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub(crate) fn bytes(&self) -> &[u8; MASTER_KEY_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKey")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Versioned master keys loaded once at startup. The active version encrypts new
/// secrets; every retained version stays available for decryption.
#[derive(Debug)]
pub struct MasterKeyRing {
    keys: BTreeMap<i32, MasterKey>,
    active_version: i32,
}

impl MasterKeyRing {
    pub fn new(
        keys: impl IntoIterator<Item = MasterKey>,
        active_version: i32,
    ) -> CredentialResult<Self> {
        let mut ring = BTreeMap::new();
        for key in keys {
            let version = key.version();
            if ring.insert(version, key).is_some() {
                return Err(CredentialError::Configuration(format!(
                    "master key version {version} configured twice"
                )));
            }
        }
        if ring.is_empty() {
            return Err(CredentialError::Configuration(
                "no master keys configured".into(),
            ));
        }
        if !ring.contains_key(&active_version) {
            return Err(CredentialError::Configuration(format!(
                "active master key version {active_version} is not configured"
            )));
        }
        Ok(Self {
            keys: ring,
            active_version,
        })
    }

    /// Parses `version:base64key` pairs separated by commas, e.g. `1:AAAA...,2:BBBB...`.
    pub fn parse(entries: &str, active_version: i32) -> CredentialResult<Self> {
        let mut keys = Vec::new();
        for entry in entries.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (version, encoded) = entry.split_once(':').ok_or_else(|| {
                CredentialError::Configuration(
                    "master key entries must look like `version:base64`".into(),
                )
            })?;
            let version = version.trim().parse::<i32>().map_err(|_| {
                CredentialError::Configuration(format!(
                    "master key version `{}` is not an integer",
                    version.trim()
                ))
            })?;
            let material = Zeroizing::new(STANDARD.decode(encoded.trim()).map_err(|_| {
                CredentialError::Configuration(format!(
                    "master key version {version} is not valid base64"
                ))
            })?);
            keys.push(MasterKey::from_slice(version, &material)?);
        }
        Self::new(keys, active_version)
    }

    pub fn active_version(&self) -> i32 {
        self.active_version
    }

    pub fn active(&self) -> &MasterKey {
        // `new` guarantees the active version is present.
        &self.keys[&self.active_version]
    }

    pub fn get(&self, version: i32) -> Option<&MasterKey> {
        self.keys.get(&version)
    }

    pub fn versions(&self) -> impl Iterator<Item = i32> + '_ {
        self.keys.keys().copied()
    }

    /// Versions kept only so older ciphertexts can still be opened.
    pub fn retired_versions(&self) -> Vec<i32> {
        self.versions()
            .filter(|version| *version != self.active_version)
            .collect()
    }
}

/// Server-side secret folded into every API-key hash. Kept apart from the
/// master key ring.
pub struct Pepper(Zeroizing<Vec<u8>>);

impl Pepper {
    pub fn new(bytes: impl Into<Vec<u8>>) -> CredentialResult<Self> {
        let bytes = Zeroizing::new(bytes.into());
        if bytes.len() < MIN_PEPPER_LEN {
            return Err(CredentialError::Configuration(format!(
                "pepper must be at least {MIN_PEPPER_LEN} bytes"
            )));
        }
        Ok(Self(bytes))
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Pepper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Pepper(***)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(version: i32, fill: u8) -> MasterKey {
        MasterKey::new(version, [fill; MASTER_KEY_LEN]).unwrap()
    }

    #[test]
    fn ring_requires_active_version() {
        let err = MasterKeyRing::new(vec![key(1, 1)], 2).unwrap_err();
        assert!(matches!(err, CredentialError::Configuration(_)));
    }

    #[test]
    fn ring_rejects_empty_and_duplicate_versions() {
        assert!(matches!(
            MasterKeyRing::new(Vec::new(), 1),
            Err(CredentialError::Configuration(_))
        ));
        assert!(matches!(
            MasterKeyRing::new(vec![key(1, 1), key(1, 2)], 1),
            Err(CredentialError::Configuration(_))
        ));
    }

    #[test]
    fn parse_reads_multiple_versions() {
        let entries = format!(
            "1:{}, 2:{}",
            STANDARD.encode([7u8; 32]),
            STANDARD.encode([9u8; 32])
        );
        let ring = MasterKeyRing::parse(&entries, 2).unwrap();
        assert_eq!(ring.active_version(), 2);
        assert_eq!(ring.versions().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(ring.retired_versions(), vec![1]);
        assert_eq!(ring.get(1).unwrap().bytes(), &[7u8; 32]);
    }

    #[test]
    fn parse_rejects_short_keys() {
        let entries = format!("1:{}", STANDARD.encode([1u8; 16]));
        assert!(matches!(
            MasterKeyRing::parse(&entries, 1),
            Err(CredentialError::Configuration(_))
        ));
    }

    #[test]
    fn debug_output_hides_key_material() {
        let rendered = format!("{:?}", key(3, 0xAB));
        assert!(rendered.contains("version: 3"));
        assert!(!rendered.contains("171"));
        assert_eq!(format!("{:?}", Pepper::new(vec![1u8; 32]).unwrap()), "Pepper(***)");
    }

    #[test]
    fn pepper_must_be_long_enough() {
        assert!(matches!(
            Pepper::new(b"short".to_vec()),
            Err(CredentialError::Configuration(_))
        ));
    }
}
