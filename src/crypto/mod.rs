//! Master key ring, pepper, and the AEAD cipher used for stored provider secrets.

pub mod cipher;
pub mod keyring;

pub use cipher::{display_fragment, fingerprint, EncryptedSecret, RevealedSecret, SecretCipher};
pub use keyring::{MasterKey, MasterKeyRing, Pepper};
