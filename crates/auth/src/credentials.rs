//! Access/refresh credential pair.
//!
//! Token values are opaque to this crate. `Debug` never prints them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! impl_secret_token {
    ($t:ident, $name:literal) => {
        #[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $t(String);

        impl $t {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// The raw token, for placing on the wire.
            pub fn expose(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl core::fmt::Debug for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, concat!($name, "(<redacted>)"))
            }
        }
    };
}

impl_secret_token!(AccessToken, "AccessToken");
impl_secret_token!(RefreshToken, "RefreshToken");

/// Short-lived access token plus the refresh token that replaces it.
///
/// A refresh token is presented at most once; the exchange answers with an
/// entirely new pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    pub access_token: AccessToken,
    pub refresh_token: RefreshToken,

    /// Access-token expiry, when the issuer reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_expires_at: Option<DateTime<Utc>>,
}

impl CredentialPair {
    pub fn new(access_token: AccessToken, refresh_token: RefreshToken) -> Self {
        Self {
            access_token,
            refresh_token,
            access_expires_at: None,
        }
    }

    pub fn with_access_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.access_expires_at = Some(expires_at);
        self
    }

    /// Unknown expiry is treated as not expired; the server remains the
    /// authority.
    pub fn is_access_expired(&self, now: DateTime<Utc>) -> bool {
        self.access_expires_at.is_some_and(|exp| now >= exp)
    }
}
