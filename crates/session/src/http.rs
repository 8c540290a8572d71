//! [`CredentialExchange`] over HTTP.
//!
//! Endpoints, relative to the configured base URL:
//!
//! - `POST /auth/login`   `{identifier, secret}` → [`LoginGrant`]
//! - `POST /auth/refresh` `{refresh_token}` → [`CredentialPair`]
//! - `GET  /auth/me`      bearer access token → [`Principal`]
//! - `POST /auth/logout`  `{refresh_token}`

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use fieldbook_auth::{AccessToken, CredentialPair, Principal, RefreshToken};

use crate::exchange::{CredentialExchange, ExchangeError, LoginGrant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpExchangeConfig {
    pub base_url: String,
}

impl Default for HttpExchangeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
        }
    }
}

impl HttpExchangeConfig {
    pub const BASE_URL_ENV: &'static str = "FIELDBOOK_API_URL";

    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    pub fn from_env() -> Self {
        match std::env::var(Self::BASE_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => Self::new(url.trim()),
            _ => Self::default(),
        }
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    identifier: &'a str,
    secret: &'a str,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

pub struct HttpCredentialExchange {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCredentialExchange {
    pub fn new(config: HttpExchangeConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(client: reqwest::Client, config: HttpExchangeConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn transport(err: reqwest::Error) -> ExchangeError {
    ExchangeError::Transport(err.to_string())
}

/// Map non-success statuses; 401/403 mean the credentials were not accepted.
async fn ensure_success(
    resp: Response,
    credentials_rejected: bool,
) -> Result<Response, ExchangeError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if credentials_rejected
        && matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
    {
        return Err(ExchangeError::InvalidCredentials);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ExchangeError::Rejected(format!(
        "{} {}",
        status.as_u16(),
        body.trim()
    )))
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ExchangeError> {
    resp.json::<T>()
        .await
        .map_err(|e| ExchangeError::Transport(format!("malformed response: {e}")))
}

#[async_trait]
impl CredentialExchange for HttpCredentialExchange {
    async fn exchange_credentials(
        &self,
        identifier: &str,
        secret: &str,
    ) -> Result<LoginGrant, ExchangeError> {
        let resp = self
            .client
            .post(self.url("/auth/login"))
            .json(&LoginRequest { identifier, secret })
            .send()
            .await
            .map_err(transport)?;
        decode(ensure_success(resp, true).await?).await
    }

    async fn refresh_credentials(
        &self,
        refresh_token: &RefreshToken,
    ) -> Result<CredentialPair, ExchangeError> {
        let resp = self
            .client
            .post(self.url("/auth/refresh"))
            .json(&RefreshRequest {
                refresh_token: refresh_token.expose(),
            })
            .send()
            .await
            .map_err(transport)?;
        // A refused refresh token is a rejection, not a bad login.
        decode(ensure_success(resp, false).await?).await
    }

    async fn probe_identity(&self, access_token: &AccessToken) -> Result<Principal, ExchangeError> {
        let resp = self
            .client
            .get(self.url("/auth/me"))
            .bearer_auth(access_token.expose())
            .send()
            .await
            .map_err(transport)?;
        decode(ensure_success(resp, false).await?).await
    }

    async fn revoke_session(&self, refresh_token: &RefreshToken) -> Result<(), ExchangeError> {
        let resp = self
            .client
            .post(self.url("/auth/logout"))
            .json(&RefreshRequest {
                refresh_token: refresh_token.expose(),
            })
            .send()
            .await
            .map_err(transport)?;
        ensure_success(resp, false).await?;
        Ok(())
    }
}
