//! Client-side session lifecycle for an authenticated application.
//!
//! [`SessionStore`] owns the logged-in principal and its credential pair,
//! keeps the credentials fresh, ends idle sessions and answers authorization
//! questions through a shared [`fieldbook_auth::DecisionEngine`].

pub mod config;
pub mod error;
pub mod exchange;
pub mod status;
pub mod store;

mod monitor;

#[cfg(feature = "http")]
pub mod http;

pub use config::{ConfigError, SessionConfig, UsageErrorPolicy};
pub use error::SessionError;
pub use exchange::{CredentialExchange, ExchangeError, LoginGrant};
pub use status::{CloseReason, SessionStatus};
pub use store::{SessionStore, SessionStoreBuilder};

#[cfg(feature = "http")]
pub use http::{HttpCredentialExchange, HttpExchangeConfig};
