//! Bring-your-own-key provider credentials, encrypted at rest.

pub mod models;
pub mod service;
pub mod store;

pub use models::{
    CredentialFlagsUpdate, ProviderCredential, ProviderCredentialView, SubmitCredential,
    VerificationStatus,
};
pub use service::{ProviderCredentialService, RewrapReport, UpstreamCredential};
pub use store::ProviderCredentialStore;
