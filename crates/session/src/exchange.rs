//! Contract with the credential-exchange collaborator (login/refresh/probe/revoke).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use fieldbook_auth::{AccessToken, CredentialPair, Principal, RefreshToken};

/// What a successful login yields: who logged in and with what credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginGrant {
    pub principal: Principal,
    pub credentials: CredentialPair,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    /// The identifier/secret pair was not accepted.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The server understood the request and refused it (revoked or reused
    /// refresh token, unknown session, ...).
    #[error("rejected: {0}")]
    Rejected(String),

    /// The request never got a usable answer.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Credential exchange as seen by the session store.
///
/// Implementations must not retry on their own behalf unless that is the
/// transport's explicit policy; the store treats one failed refresh or probe
/// as the end of the session.
#[async_trait]
pub trait CredentialExchange: Send + Sync + 'static {
    async fn exchange_credentials(
        &self,
        identifier: &str,
        secret: &str,
    ) -> Result<LoginGrant, ExchangeError>;

    /// Trade a refresh token for a new pair. A refresh token is accepted at
    /// most once.
    async fn refresh_credentials(
        &self,
        refresh_token: &RefreshToken,
    ) -> Result<CredentialPair, ExchangeError>;

    /// "Who am I" for the given access token.
    async fn probe_identity(&self, access_token: &AccessToken) -> Result<Principal, ExchangeError>;

    /// Best effort; failure never blocks a local logout.
    async fn revoke_session(&self, refresh_token: &RefreshToken) -> Result<(), ExchangeError>;
}
