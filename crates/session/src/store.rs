//! The session store: one authenticated session, its credentials and its
//! timers.
//!
//! State lives behind a synchronous lock that is never held across an
//! `.await`. Collaborator calls happen outside the lock and re-check the
//! session id when they come back, so a slow refresh or probe can never
//! resurrect a session that was closed in the meantime.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

use fieldbook_auth::{
    AccessToken, CredentialPair, Decision, DecisionConfig, DecisionEngine, Permission, Principal,
    PrincipalId, RefreshToken, RequiresAuthorization, Role,
};
use fieldbook_core::{Clock, SessionId, SystemClock};

use crate::config::{ConfigError, SessionConfig, UsageErrorPolicy};
use crate::error::SessionError;
use crate::exchange::{CredentialExchange, ExchangeError, LoginGrant};
use crate::monitor::SessionMonitor;
use crate::status::{CloseReason, SessionStatus};

/// Why a refresh is happening.
#[derive(Debug, Clone)]
pub(crate) enum RefreshTrigger {
    /// `refresh_session()` called by the application.
    Manual,
    /// A request was rejected with this access token.
    Reactive(AccessToken),
    /// The proactive timer armed for this session fired.
    Scheduled(SessionId),
}

impl RefreshTrigger {
    /// Timer refreshes keep credentials fresh but are not user activity.
    fn counts_as_activity(&self) -> bool {
        !matches!(self, RefreshTrigger::Scheduled(_))
    }
}

enum SessionState {
    NoSession,
    Active(ActiveSession),
    Closed(CloseReason),
}

struct ActiveSession {
    id: SessionId,
    principal: Principal,
    credentials: CredentialPair,
    /// Bumped on every successful refresh; lets queued refreshes detect that
    /// the one ahead of them already did the work.
    generation: u64,
    last_activity: DateTime<Utc>,
    monitor: Option<SessionMonitor>,
}

/// What survives a close long enough to revoke it upstream.
struct ClosedSession {
    id: SessionId,
    principal_id: PrincipalId,
    refresh_token: RefreshToken,
    reason: CloseReason,
}

enum Lookup<T> {
    Live(T),
    Expired(SessionId),
    Missing,
}

pub(crate) struct Inner {
    exchange: Arc<dyn CredentialExchange>,
    decisions: Arc<DecisionEngine>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    inactivity_threshold: chrono::Duration,
    state: RwLock<SessionState>,
    refresh_gate: Mutex<()>,
    status: watch::Sender<SessionStatus>,
}

/// Handle to the session store. Clones share the same session.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

impl core::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionStore")
            .field("status", &*self.inner.status.borrow())
            .field("config", &self.inner.config)
            .finish()
    }
}

/// Builder for [`SessionStore`].
pub struct SessionStoreBuilder {
    exchange: Arc<dyn CredentialExchange>,
    decisions: Option<Arc<DecisionEngine>>,
    clock: Option<Arc<dyn Clock>>,
    config: SessionConfig,
}

impl SessionStoreBuilder {
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a decision engine (and its cache) with other callers.
    pub fn decisions(mut self, decisions: Arc<DecisionEngine>) -> Self {
        self.decisions = Some(decisions);
        self
    }

    /// Clock for inactivity expiry. Defaults to the system clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<SessionStore, ConfigError> {
        self.config.validate()?;
        let inactivity_threshold = self.config.inactivity_threshold()?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let decisions = self.decisions.unwrap_or_else(|| {
            Arc::new(DecisionEngine::new(DecisionConfig::default(), clock.clone()))
        });
        let (status, _) = watch::channel(SessionStatus::NoSession);

        Ok(SessionStore {
            inner: Arc::new(Inner {
                exchange: self.exchange,
                decisions,
                clock,
                config: self.config,
                inactivity_threshold,
                state: RwLock::new(SessionState::NoSession),
                refresh_gate: Mutex::new(()),
                status,
            }),
        })
    }
}

impl SessionStore {
    pub fn builder(exchange: Arc<dyn CredentialExchange>) -> SessionStoreBuilder {
        SessionStoreBuilder {
            exchange,
            decisions: None,
            clock: None,
            config: SessionConfig::default(),
        }
    }

    /// Store with default configuration and the system clock.
    pub fn new(exchange: Arc<dyn CredentialExchange>) -> Result<Self, ConfigError> {
        Self::builder(exchange).build()
    }

    /// Log in, replacing any existing session.
    ///
    /// On success the principal and credentials are stored, the decision
    /// cache holds nothing for the principal, and both session timers are
    /// armed. On failure any previous session is left untouched.
    pub async fn login(&self, identifier: &str, secret: &str) -> Result<Principal, SessionError> {
        let inner = &self.inner;

        let grant = match inner.exchange.exchange_credentials(identifier, secret).await {
            Ok(grant) => grant,
            Err(ExchangeError::InvalidCredentials) => {
                info!("login rejected: invalid credentials");
                return Err(SessionError::auth("invalid identifier or secret"));
            }
            Err(ExchangeError::Rejected(reason)) => {
                warn!(%reason, "login refused by credential exchange");
                return Err(SessionError::auth("login was refused"));
            }
            Err(ExchangeError::Transport(err)) => {
                warn!(error = %err, "credential exchange unreachable during login");
                return Err(SessionError::auth("the sign-in service could not be reached"));
            }
        };

        let LoginGrant {
            principal,
            credentials,
        } = grant;

        if principal.id.is_blank() {
            warn!("credential exchange returned a principal without an id");
            inner.revoke_quietly(&credentials.refresh_token).await;
            return Err(SessionError::auth("the sign-in service returned no identity"));
        }
        if !principal.active {
            info!(principal_id = %principal.id, "login rejected: account inactive");
            inner.revoke_quietly(&credentials.refresh_token).await;
            return Err(SessionError::auth("this account is inactive"));
        }

        let session_id = SessionId::new();
        let now = inner.clock.now();
        let monitor = SessionMonitor::start(
            Arc::downgrade(inner),
            session_id,
            inner.config.refresh_interval,
            inner.config.inactivity_timeout,
        );

        let replaced = {
            let mut state = inner.write_state();
            let replaced = inner.close_locked(&mut state, CloseReason::Replaced, None);

            inner.decisions.invalidate_principal(&principal.id);
            *state = SessionState::Active(ActiveSession {
                id: session_id,
                principal: principal.clone(),
                credentials,
                generation: 0,
                last_activity: now,
                monitor: Some(monitor),
            });
            inner.status.send_replace(SessionStatus::Active {
                session_id,
                principal_id: principal.id.clone(),
            });
            replaced
        };

        if let Some(previous) = replaced {
            inner.finish_close(previous).await;
        }

        info!(principal_id = %principal.id, %session_id, "session started");
        Ok(principal)
    }

    /// End the session. Idempotent; never fails.
    pub async fn logout(&self) {
        if !self.inner.end_session(CloseReason::Logout, None).await {
            debug!("logout without an active session");
        }
    }

    /// Exchange the refresh token for a new pair.
    ///
    /// Concurrent calls share one exchange. A rejected refresh ends the
    /// session and returns [`SessionError::SessionInvalidated`].
    pub async fn refresh_session(&self) -> Result<(), SessionError> {
        self.inner.refresh(RefreshTrigger::Manual).await
    }

    /// Refresh after a request was rejected with `rejected`.
    ///
    /// Returns immediately when the stored access token has already moved
    /// past `rejected`, so a burst of rejections costs one exchange.
    pub async fn reactive_refresh(&self, rejected: &AccessToken) -> Result<(), SessionError> {
        self.inner
            .refresh(RefreshTrigger::Reactive(rejected.clone()))
            .await
    }

    /// Ask the identity probe to confirm the session.
    ///
    /// A confirmed principal replaces the stored one; if its roles,
    /// permissions or active flag changed, cached decisions for it are
    /// dropped. Any probe failure ends the session.
    pub async fn validate_session(&self) -> Result<Principal, SessionError> {
        let inner = &self.inner;

        let (session_id, access_token, principal_id) = match inner.with_live(|active| {
            (
                active.id,
                active.credentials.access_token.clone(),
                active.principal.id.clone(),
            )
        }) {
            Lookup::Live(found) => found,
            Lookup::Expired(id) => return Err(inner.expire(id).await),
            Lookup::Missing => {
                return inner
                    .misuse("validate_session called without an active session")
                    .await;
            }
        };

        let probed = match inner.exchange.probe_identity(&access_token).await {
            Ok(probed) => probed,
            Err(err) => {
                warn!(%session_id, error = %err, "identity probe failed; ending session");
                inner
                    .end_session(CloseReason::ProbeRejected, Some(session_id))
                    .await;
                return Err(SessionError::invalidated(format!(
                    "identity probe failed: {err}"
                )));
            }
        };

        if probed.id != principal_id {
            warn!(
                %session_id,
                expected = %principal_id,
                returned = %probed.id,
                "identity probe returned a different principal; ending session"
            );
            inner
                .end_session(CloseReason::ProbeRejected, Some(session_id))
                .await;
            return Err(SessionError::invalidated(
                "identity probe returned a different principal",
            ));
        }

        if !probed.active {
            info!(%session_id, principal_id = %probed.id, "account deactivated; ending session");
            inner
                .end_session(CloseReason::ProbeRejected, Some(session_id))
                .await;
            return Err(SessionError::invalidated("this account is no longer active"));
        }

        let stored = {
            let mut state = inner.write_state();
            match &mut *state {
                SessionState::Active(active) if active.id == session_id => {
                    if active.principal.claims_differ(&probed) {
                        let dropped = inner.decisions.invalidate_principal(&probed.id);
                        info!(
                            %session_id,
                            principal_id = %probed.id,
                            dropped,
                            "principal claims changed; cached decisions dropped"
                        );
                    }
                    active.principal = probed.clone();
                    true
                }
                _ => false,
            }
        };

        if stored {
            Ok(probed)
        } else {
            Err(SessionError::invalidated(
                "session ended while the identity probe was in flight",
            ))
        }
    }

    /// Note user activity: extends the session and resets the watchdog.
    ///
    /// Activity on a session already past the inactivity threshold does not
    /// revive it.
    pub fn record_activity(&self) {
        let inner = &self.inner;
        let now = inner.clock.now();
        let mut state = inner.write_state();
        if let SessionState::Active(active) = &mut *state {
            if inner.is_idle(active, now) {
                debug!(session_id = %active.id, "activity after inactivity threshold ignored");
                return;
            }
            active.last_activity = now;
            if let Some(monitor) = &active.monitor {
                monitor.touch();
            }
        }
    }

    /// True once the session has been idle longer than the inactivity
    /// timeout, whether or not the watchdog has closed it yet.
    pub fn is_session_expired(&self) -> bool {
        let inner = &self.inner;
        let now = inner.clock.now();
        match &*inner.read_state() {
            SessionState::Active(active) => inner.is_idle(active, now),
            SessionState::Closed(reason) => reason.is_expiry(),
            SessionState::NoSession => false,
        }
    }

    /// Authorize the current principal.
    ///
    /// Without a session, or with an expired one, the answer is
    /// [`Decision::Unauthenticated`]; an expired session is closed on the
    /// way.
    pub async fn authorize(
        &self,
        required_roles: &[Role],
        required_permissions: &[Permission],
    ) -> Decision {
        let inner = &self.inner;
        match inner.with_live(|active| {
            inner.decisions.authorize(
                Some(&active.principal),
                required_roles,
                required_permissions,
            )
        }) {
            Lookup::Live(decision) => decision,
            Lookup::Expired(id) => {
                inner.expire(id).await;
                Decision::Unauthenticated
            }
            Lookup::Missing => Decision::Unauthenticated,
        }
    }

    /// Authorize an action that declares its own requirements.
    pub async fn authorize_action<A>(&self, action: &A) -> Decision
    where
        A: RequiresAuthorization + ?Sized,
    {
        self.authorize(action.required_roles(), action.required_permissions())
            .await
    }

    pub fn current_principal(&self) -> Option<Principal> {
        match self.inner.with_live(|active| active.principal.clone()) {
            Lookup::Live(principal) => Some(principal),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.inner.with_live(|_| ()), Lookup::Live(()))
    }

    /// The current access token, for attaching to outgoing requests.
    pub fn access_token(&self) -> Option<AccessToken> {
        match self
            .inner
            .with_live(|active| active.credentials.access_token.clone())
        {
            Lookup::Live(token) => Some(token),
            _ => None,
        }
    }

    /// The current access token, refreshed first if its known expiry has
    /// passed.
    ///
    /// A token without an expiry is returned as is. A failed refresh ends
    /// the session like any other.
    pub async fn fresh_access_token(&self) -> Result<AccessToken, SessionError> {
        let inner = &self.inner;
        let now = inner.clock.now();

        let (token, expired) = match inner.with_live(|active| {
            (
                active.credentials.access_token.clone(),
                active.credentials.is_access_expired(now),
            )
        }) {
            Lookup::Live(found) => found,
            Lookup::Expired(id) => return Err(inner.expire(id).await),
            Lookup::Missing => {
                return inner
                    .misuse("access token requested without an active session")
                    .await;
            }
        };
        if !expired {
            return Ok(token);
        }

        debug!("access token past its expiry; refreshing before use");
        inner.refresh(RefreshTrigger::Reactive(token)).await?;

        match inner.with_live(|active| active.credentials.access_token.clone()) {
            Lookup::Live(token) => Ok(token),
            Lookup::Expired(id) => Err(inner.expire(id).await),
            Lookup::Missing => Err(SessionError::invalidated(
                "session ended while the refresh was in flight",
            )),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.status.borrow().clone()
    }

    /// Watch lifecycle changes, including closures caused by timers.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.subscribe()
    }

    pub fn decisions(&self) -> &Arc<DecisionEngine> {
        &self.inner.decisions
    }
}

impl Inner {
    fn read_state(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_idle(&self, active: &ActiveSession, now: DateTime<Utc>) -> bool {
        now - active.last_activity > self.inactivity_threshold
    }

    fn with_live<T>(&self, f: impl FnOnce(&ActiveSession) -> T) -> Lookup<T> {
        let now = self.clock.now();
        let state = self.read_state();
        match &*state {
            SessionState::Active(active) if self.is_idle(active, now) => {
                Lookup::Expired(active.id)
            }
            SessionState::Active(active) => Lookup::Live(f(active)),
            _ => Lookup::Missing,
        }
    }

    /// Swap an active session (matching `expected`, if given) for
    /// `Closed(reason)`. Timers are cancelled and cached decisions dropped
    /// before the lock is released.
    fn close_locked(
        &self,
        state: &mut SessionState,
        reason: CloseReason,
        expected: Option<SessionId>,
    ) -> Option<ClosedSession> {
        match state {
            SessionState::Active(active) if expected.is_none_or(|id| id == active.id) => {}
            _ => return None,
        }

        let SessionState::Active(mut active) =
            std::mem::replace(state, SessionState::Closed(reason))
        else {
            return None;
        };

        if let Some(monitor) = active.monitor.take() {
            monitor.cancel();
        }
        self.decisions.invalidate_principal(&active.principal.id);
        self.status.send_replace(SessionStatus::Closed { reason });

        Some(ClosedSession {
            id: active.id,
            principal_id: active.principal.id,
            refresh_token: active.credentials.refresh_token,
            reason,
        })
    }

    async fn finish_close(&self, closed: ClosedSession) {
        // A rejected refresh token is already dead upstream.
        if closed.reason != CloseReason::RefreshFailed {
            self.revoke_quietly(&closed.refresh_token).await;
        }
        info!(
            session_id = %closed.id,
            principal_id = %closed.principal_id,
            reason = %closed.reason,
            "session closed"
        );
    }

    async fn revoke_quietly(&self, refresh_token: &RefreshToken) {
        if let Err(err) = self.exchange.revoke_session(refresh_token).await {
            warn!(error = %err, "upstream session revoke failed; local state already cleared");
        }
    }

    /// Close the session if it is active and matches `expected`.
    ///
    /// Returns whether this call closed it.
    pub(crate) async fn end_session(&self, reason: CloseReason, expected: Option<SessionId>) -> bool {
        let closed = {
            let mut state = self.write_state();
            self.close_locked(&mut state, reason, expected)
        };
        match closed {
            Some(closed) => {
                self.finish_close(closed).await;
                true
            }
            None => false,
        }
    }

    async fn expire(&self, session_id: SessionId) -> SessionError {
        self.end_session(CloseReason::Expired, Some(session_id)).await;
        SessionError::invalidated("session expired after inactivity")
    }

    async fn misuse<T>(&self, message: &str) -> Result<T, SessionError> {
        match self.config.usage_error_policy {
            UsageErrorPolicy::Surface => {
                error!(detail = message, "session store misuse");
                Err(SessionError::usage(message))
            }
            UsageErrorPolicy::Invalidate => {
                error!(detail = message, "session store misuse; forcing logout");
                self.end_session(CloseReason::UsageError, None).await;
                Err(SessionError::invalidated(message))
            }
        }
    }

    pub(crate) async fn refresh(&self, trigger: RefreshTrigger) -> Result<(), SessionError> {
        let (session_id, generation, refresh_token, current_access) = match self.with_live(|active| {
            (
                active.id,
                active.generation,
                active.credentials.refresh_token.clone(),
                active.credentials.access_token.clone(),
            )
        }) {
            Lookup::Live(found) => found,
            Lookup::Expired(id) => return Err(self.expire(id).await),
            Lookup::Missing => {
                if let RefreshTrigger::Scheduled(id) = &trigger {
                    return Err(SessionError::invalidated(format!(
                        "refresh timer outlived session {id}"
                    )));
                }
                return self.misuse("refresh requested without a refresh token").await;
            }
        };

        match &trigger {
            RefreshTrigger::Scheduled(armed_for) if *armed_for != session_id => {
                return Err(SessionError::invalidated(format!(
                    "refresh timer outlived session {armed_for}"
                )));
            }
            RefreshTrigger::Reactive(rejected) if *rejected != current_access => {
                debug!(%session_id, "rejected access token already replaced");
                return Ok(());
            }
            _ => {}
        }

        let _gate = self.refresh_gate.lock().await;

        let coalesced = match &*self.read_state() {
            SessionState::Active(active) if active.id == session_id => {
                active.generation != generation
            }
            _ => {
                return Err(SessionError::invalidated(
                    "session ended while the refresh was queued",
                ));
            }
        };
        if coalesced {
            debug!(%session_id, "refresh coalesced with the one that just completed");
            return Ok(());
        }

        let pair = match self.exchange.refresh_credentials(&refresh_token).await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(%session_id, error = %err, "refresh rejected; ending session");
                self.end_session(CloseReason::RefreshFailed, Some(session_id))
                    .await;
                return Err(SessionError::invalidated(format!("refresh failed: {err}")));
            }
        };

        let orphaned = {
            let mut state = self.write_state();
            match &mut *state {
                SessionState::Active(active) if active.id == session_id => {
                    active.credentials = pair;
                    active.generation += 1;
                    if trigger.counts_as_activity() {
                        active.last_activity = self.clock.now();
                        if let Some(monitor) = &active.monitor {
                            monitor.touch();
                        }
                    }
                    debug!(%session_id, generation = active.generation, "credentials refreshed");
                    None
                }
                _ => Some(pair.refresh_token),
            }
        };

        match orphaned {
            None => Ok(()),
            Some(refresh_token) => {
                self.revoke_quietly(&refresh_token).await;
                Err(SessionError::invalidated(
                    "session ended while the refresh was in flight",
                ))
            }
        }
    }
}
