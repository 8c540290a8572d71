//! Scripted credential exchange for session tests.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use fieldbook_auth::{AccessToken, CredentialPair, Principal, PrincipalId, RefreshToken};
use fieldbook_core::{Clock, ManualClock};
use fieldbook_session::{
    CredentialExchange, ExchangeError, LoginGrant, SessionConfig, SessionStore, UsageErrorPolicy,
};

pub const SECRET: &str = "correct horse";

pub fn admin() -> Principal {
    Principal::new(PrincipalId::new("u-admin"))
        .with_display_name("Ada Admin")
        .with_roles(["admin"])
        .with_permissions(["users:read", "users:write"])
}

/// Issues single-use refresh tokens and counts every call.
pub struct FakeExchange {
    principal: Mutex<Principal>,
    probe_override: Mutex<Option<Principal>>,
    live_refresh_tokens: Mutex<HashSet<String>>,
    issued: AtomicUsize,
    pub logins: AtomicUsize,
    pub refreshes: AtomicUsize,
    pub probes: AtomicUsize,
    pub revokes: AtomicUsize,
    reject_refresh: AtomicBool,
    reject_probe: AtomicBool,
    identity_failure: Mutex<Option<ExchangeError>>,
    refresh_delay: Mutex<Option<Duration>>,
    access_lifetime: Mutex<Option<(Arc<ManualClock>, chrono::Duration)>>,
}

impl FakeExchange {
    pub fn new(principal: Principal) -> Arc<Self> {
        Arc::new(Self {
            principal: Mutex::new(principal),
            probe_override: Mutex::new(None),
            live_refresh_tokens: Mutex::new(HashSet::new()),
            issued: AtomicUsize::new(0),
            logins: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
            revokes: AtomicUsize::new(0),
            reject_refresh: AtomicBool::new(false),
            reject_probe: AtomicBool::new(false),
            identity_failure: Mutex::new(None),
            refresh_delay: Mutex::new(None),
            access_lifetime: Mutex::new(None),
        })
    }

    pub fn reject_refresh(&self) {
        self.reject_refresh.store(true, Ordering::SeqCst);
    }

    pub fn reject_probe(&self) {
        self.reject_probe.store(true, Ordering::SeqCst);
    }

    /// The identity check fails with `err` from now on.
    pub fn fail_identity_check_with(&self, err: ExchangeError) {
        *self.identity_failure.lock().unwrap() = Some(err);
    }

    /// What the identity probe reports from now on.
    pub fn probe_returns(&self, principal: Principal) {
        *self.probe_override.lock().unwrap() = Some(principal);
    }

    pub fn login_as(&self, principal: Principal) {
        *self.principal.lock().unwrap() = principal;
    }

    pub fn delay_refresh(&self, delay: Duration) {
        *self.refresh_delay.lock().unwrap() = Some(delay);
    }

    /// Access tokens issued from now on expire `lifetime` after `clock`'s
    /// current time.
    pub fn issue_access_for(&self, clock: Arc<ManualClock>, lifetime: chrono::Duration) {
        *self.access_lifetime.lock().unwrap() = Some((clock, lifetime));
    }

    /// Whether the exchange would still accept `refresh_token`.
    pub fn is_live(&self, refresh_token: &str) -> bool {
        self.live_refresh_tokens.lock().unwrap().contains(refresh_token)
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn revoke_count(&self) -> usize {
        self.revokes.load(Ordering::SeqCst)
    }

    fn issue_pair(&self) -> CredentialPair {
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        let refresh = format!("refresh-{n}");
        self.live_refresh_tokens
            .lock()
            .unwrap()
            .insert(refresh.clone());
        let pair = CredentialPair::new(
            AccessToken::new(format!("access-{n}")),
            RefreshToken::new(refresh),
        );
        match &*self.access_lifetime.lock().unwrap() {
            Some((clock, lifetime)) => pair.with_access_expiry(clock.now() + *lifetime),
            None => pair,
        }
    }
}

#[async_trait]
impl CredentialExchange for FakeExchange {
    async fn exchange_credentials(
        &self,
        _identifier: &str,
        secret: &str,
    ) -> Result<LoginGrant, ExchangeError> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        if secret != SECRET {
            return Err(ExchangeError::InvalidCredentials);
        }
        let principal = self.principal.lock().unwrap().clone();
        Ok(LoginGrant {
            principal,
            credentials: self.issue_pair(),
        })
    }

    async fn refresh_credentials(
        &self,
        refresh_token: &RefreshToken,
    ) -> Result<CredentialPair, ExchangeError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if self.reject_refresh.load(Ordering::SeqCst) {
            return Err(ExchangeError::Rejected("refresh token revoked".into()));
        }
        // The old token is spent as soon as the request arrives.
        let was_live = self
            .live_refresh_tokens
            .lock()
            .unwrap()
            .remove(refresh_token.expose());
        let delay = *self.refresh_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if !was_live {
            return Err(ExchangeError::Rejected("refresh token reused".into()));
        }
        Ok(self.issue_pair())
    }

    async fn probe_identity(&self, _access_token: &AccessToken) -> Result<Principal, ExchangeError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.reject_probe.load(Ordering::SeqCst) {
            return Err(ExchangeError::Rejected("unknown session".into()));
        }
        if let Some(err) = self.identity_failure.lock().unwrap().clone() {
            return Err(err);
        }
        let probed = self.probe_override.lock().unwrap().clone();
        Ok(probed.unwrap_or_else(|| self.principal.lock().unwrap().clone()))
    }

    async fn revoke_session(&self, refresh_token: &RefreshToken) -> Result<(), ExchangeError> {
        self.revokes.fetch_add(1, Ordering::SeqCst);
        self.live_refresh_tokens
            .lock()
            .unwrap()
            .remove(refresh_token.expose());
        Ok(())
    }
}

pub fn surface_config() -> SessionConfig {
    SessionConfig::default().with_usage_error_policy(UsageErrorPolicy::Surface)
}

pub fn store_with_clock(
    exchange: Arc<FakeExchange>,
    config: SessionConfig,
    clock: Arc<ManualClock>,
) -> SessionStore {
    let clock: Arc<dyn Clock> = clock;
    SessionStore::builder(exchange)
        .config(config)
        .clock(clock)
        .build()
        .unwrap()
}

pub fn store(exchange: Arc<FakeExchange>) -> SessionStore {
    store_with_clock(exchange, surface_config(), Arc::new(ManualClock::starting_now()))
}

/// Let spawned session tasks run to their next await point.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
