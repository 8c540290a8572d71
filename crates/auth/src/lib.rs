//! `fieldbook-auth`: principal/claims model and the authorization decision
//! engine.
//!
//! Decoupled from HTTP and storage. The session crate and any enforcing
//! service share these types.

pub mod authorize;
pub mod cache;
pub mod claims;
pub mod credentials;
pub mod permissions;
pub mod principal;
pub mod requirement;
pub mod roles;

pub use authorize::{
    Decision, DecisionConfig, DecisionConfigError, DecisionEngine, DecisionExplanation,
};
pub use cache::{CacheStats, DecisionCache};
pub use claims::{IdentityClaims, TokenValidationError, validate_claims};
pub use credentials::{AccessToken, CredentialPair, RefreshToken};
pub use permissions::Permission;
pub use principal::{DisplayAttributes, Principal, PrincipalId};
pub use requirement::{RequirementKey, Requirements, RequiresAuthorization};
pub use roles::Role;
