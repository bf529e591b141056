//! Gateway API keys: issuance, lifecycle, verification and limits.

pub mod issuer;
pub mod models;
pub mod policy;
pub mod secret;
pub mod store;
pub mod verifier;

pub use issuer::{IssuedKey, KeyIssuer};
pub use models::{
    GatewayApiKey, IssueKeyRequest, KeyLimits, KeyStatus, KeyUpdate, LimitChange, LimitsUpdate,
};
pub use policy::{LimitDecision, LimitPolicy, ViolatedLimit};
pub use secret::{parse_bearer, ApiKeySecret};
pub use store::{ApiKeyStore, RevokeOutcome};
pub use verifier::KeyVerifier;
