use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Permission, Principal, PrincipalId, Role};

/// Identity claims attached to an authenticated request (transport-agnostic).
///
/// This is what the enforcing side sees once a token has been decoded and
/// verified by whatever security layer is in use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Subject / principal identifier.
    pub sub: PrincipalId,

    #[serde(default)]
    pub roles: Vec<Role>,

    #[serde(default)]
    pub permissions: Vec<Permission>,

    #[serde(default = "active_by_default")]
    pub active: bool,

    pub issued_at: DateTime<Utc>,

    pub expires_at: DateTime<Utc>,
}

fn active_by_default() -> bool {
    true
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,

    #[error("token has no subject")]
    MissingSubject,
}

/// Deterministically validate identity claims.
///
/// Validates the *claims* only. Signature verification happens upstream.
pub fn validate_claims(
    claims: &IdentityClaims,
    now: DateTime<Utc>,
) -> Result<(), TokenValidationError> {
    if claims.sub.is_blank() {
        return Err(TokenValidationError::MissingSubject);
    }
    if claims.expires_at <= claims.issued_at {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    if now < claims.issued_at {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= claims.expires_at {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}

impl IdentityClaims {
    /// Validate and turn the claims into the principal a decision is made for.
    pub fn into_principal(self, now: DateTime<Utc>) -> Result<Principal, TokenValidationError> {
        validate_claims(&self, now)?;

        let mut principal = Principal::new(self.sub)
            .with_roles(self.roles)
            .with_permissions(self.permissions);
        principal.active = self.active;
        Ok(principal)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn claims(now: DateTime<Utc>) -> IdentityClaims {
        IdentityClaims {
            sub: PrincipalId::new("u1"),
            roles: vec![Role::new("admin")],
            permissions: vec![Permission::new("edit_users"), Permission::new("edit_users")],
            active: true,
            issued_at: now - Duration::minutes(1),
            expires_at: now + Duration::minutes(9),
        }
    }

    #[test]
    fn valid_claims_yield_principal_with_unique_sets() {
        let now = Utc::now();
        let principal = claims(now).into_principal(now).unwrap();
        assert_eq!(principal.id.as_str(), "u1");
        assert_eq!(principal.permissions.len(), 1);
        assert!(principal.has_role(&Role::new("admin")));
    }

    #[test]
    fn expired_claims_are_rejected() {
        let now = Utc::now();
        let c = claims(now);
        let later = c.expires_at;
        assert_eq!(validate_claims(&c, later), Err(TokenValidationError::Expired));
    }

    #[test]
    fn future_claims_are_rejected() {
        let now = Utc::now();
        let c = claims(now);
        let earlier = c.issued_at - Duration::seconds(1);
        assert_eq!(
            validate_claims(&c, earlier),
            Err(TokenValidationError::NotYetValid)
        );
    }

    #[test]
    fn inverted_window_is_rejected() {
        let now = Utc::now();
        let mut c = claims(now);
        c.expires_at = c.issued_at;
        assert_eq!(
            validate_claims(&c, now),
            Err(TokenValidationError::InvalidTimeWindow)
        );
    }

    #[test]
    fn blank_subject_is_rejected() {
        let now = Utc::now();
        let mut c = claims(now);
        c.sub = PrincipalId::new("  ");
        assert_eq!(
            c.into_principal(now),
            Err(TokenValidationError::MissingSubject)
        );
    }

    #[test]
    fn inactive_flag_is_carried() {
        let now = Utc::now();
        let mut c = claims(now);
        c.active = false;
        assert!(!c.into_principal(now).unwrap().active);
    }
}
