pub mod audit;
pub mod byok;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod keys;
pub mod memory;
pub mod routes;
pub mod services;
pub mod usage;

mod audit_api;
mod byok_api;
mod extractor;
mod gateway_api;
mod keys_api;

pub use config::{AdminToken, KeyMaterial, StorageBackend};
pub use error::{AppError, CredentialError, CredentialResult};
pub use routes::app;
pub use services::AppServices;
