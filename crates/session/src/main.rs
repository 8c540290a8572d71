//! Log in against a live API, confirm the session, then log out.
//!
//! ```text
//! FIELDBOOK_API_URL=https://api.example FIELDBOOK_USER=ada FIELDBOOK_SECRET=... \
//!     fieldbook-session-probe
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};

use fieldbook_auth::{DecisionConfig, DecisionEngine};
use fieldbook_core::SystemClock;
use fieldbook_session::{HttpCredentialExchange, HttpExchangeConfig, SessionConfig, SessionStore};

#[tokio::main]
async fn main() -> Result<()> {
    fieldbook_observability::init();

    let exchange_config = HttpExchangeConfig::from_env();
    let identifier = std::env::var("FIELDBOOK_USER").context("FIELDBOOK_USER is not set")?;
    let secret = std::env::var("FIELDBOOK_SECRET").context("FIELDBOOK_SECRET is not set")?;

    tracing::info!(api_url = %exchange_config.base_url, "probing session lifecycle");

    let decisions = DecisionEngine::new(DecisionConfig::from_env()?, Arc::new(SystemClock));
    let store = SessionStore::builder(Arc::new(HttpCredentialExchange::new(exchange_config)))
        .config(SessionConfig::from_env()?)
        .decisions(Arc::new(decisions))
        .build()?;

    let principal = store.login(&identifier, &secret).await?;
    tracing::info!(principal_id = %principal.id, "login succeeded");

    let confirmed = store.validate_session().await?;
    println!("{}", serde_json::to_string_pretty(&confirmed)?);

    let explanation = store.decisions().explain(Some(&confirmed), &[], &[]);
    tracing::info!(reason = %explanation.reason, "authorization engine reachable");

    store.logout().await;
    tracing::info!(status = ?store.status(), "logged out");
    Ok(())
}
