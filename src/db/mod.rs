//! PostgreSQL implementations of the credential stores.

pub mod api_keys;
pub mod provider_credentials;
pub mod usage;

pub use api_keys::PgApiKeyStore;
pub use provider_credentials::PgProviderCredentialStore;
pub use usage::PgUsageStore;
