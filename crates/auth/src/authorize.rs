use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use fieldbook_core::{Clock, SystemClock};

use crate::{
    CacheStats, DecisionCache, Permission, Principal, PrincipalId, RequirementKey,
    RequiresAuthorization, Role,
};

/// Outcome of an authorization decision.
///
/// A value, not an error: callers branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny,
    Unauthenticated,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        self == Decision::Allow
    }

    fn from_verdict(allowed: bool) -> Self {
        if allowed { Decision::Allow } else { Decision::Deny }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecisionConfigError {
    #[error("decision TTL must be positive")]
    NonPositiveTtl,

    #[error("sweep interval must be at least one insert")]
    ZeroSweepInterval,

    #[error("{name} is not a valid number of seconds: {value:?}")]
    InvalidEnv { name: &'static str, value: String },
}

/// Decision engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionConfig {
    /// How long a computed verdict is reused.
    pub ttl: Duration,
    /// Expired verdicts are swept from the cache once every this many
    /// inserts.
    pub sweep_every: u64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::minutes(10),
            sweep_every: 256,
        }
    }
}

impl DecisionConfig {
    pub const TTL_ENV: &'static str = "FIELDBOOK_DECISION_TTL_SECS";

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_sweep_every(mut self, inserts: u64) -> Self {
        self.sweep_every = inserts;
        self
    }

    pub fn validate(&self) -> Result<(), DecisionConfigError> {
        if self.ttl <= Duration::zero() {
            return Err(DecisionConfigError::NonPositiveTtl);
        }
        if self.sweep_every == 0 {
            return Err(DecisionConfigError::ZeroSweepInterval);
        }
        Ok(())
    }

    /// Defaults overridden by `FIELDBOOK_DECISION_TTL_SECS` when set.
    pub fn from_env() -> Result<Self, DecisionConfigError> {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(Self::TTL_ENV) {
            config.ttl = raw
                .trim()
                .parse::<i64>()
                .ok()
                .and_then(Duration::try_seconds)
                .ok_or(DecisionConfigError::InvalidEnv {
                    name: Self::TTL_ENV,
                    value: raw,
                })?;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Answers "may this principal proceed, given these requirements?".
///
/// Verdicts are cached per principal for the configured TTL. The cache is
/// shared by every caller holding this engine.
pub struct DecisionEngine {
    cache: DecisionCache,
    ttl: Duration,
    sweep_every: u64,
    inserts: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl core::fmt::Debug for DecisionEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DecisionEngine")
            .field("ttl", &self.ttl)
            .field("cached_entries", &self.cache.len())
            .finish()
    }
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self::new(DecisionConfig::default(), Arc::new(SystemClock))
    }
}

impl DecisionEngine {
    pub fn new(config: DecisionConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache: DecisionCache::new(),
            ttl: config.ttl,
            sweep_every: config.sweep_every.max(1),
            inserts: AtomicU64::new(0),
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn cache(&self) -> &DecisionCache {
        &self.cache
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Decide whether `principal` satisfies every required role and every
    /// required permission.
    ///
    /// - no principal: `Unauthenticated`, never cached
    /// - inactive principal: `Deny`, never cached
    /// - no requirements: `Allow`, cache not consulted
    /// - otherwise: cached verdict when one is live, else evaluate and cache
    pub fn authorize(
        &self,
        principal: Option<&Principal>,
        required_roles: &[Role],
        required_permissions: &[Permission],
    ) -> Decision {
        let Some(principal) = principal else {
            return Decision::Unauthenticated;
        };

        if !principal.active {
            debug!(principal_id = %principal.id, "denying inactive principal");
            return Decision::Deny;
        }

        if required_roles.is_empty() && required_permissions.is_empty() {
            return Decision::Allow;
        }

        let key = RequirementKey::from_parts(required_roles, required_permissions);
        let now = self.clock.now();

        if let Some(allowed) = self.cache.get(&principal.id, &key, now) {
            return Decision::from_verdict(allowed);
        }

        let allowed = evaluate(principal, required_roles, required_permissions).is_empty();
        debug!(
            principal_id = %principal.id,
            requirements = %key,
            allowed,
            "evaluated authorization"
        );
        self.cache
            .insert(principal.id.clone(), key, allowed, now + self.ttl);
        self.sweep_if_due(now);

        Decision::from_verdict(allowed)
    }

    /// Check an action that declares its own requirements.
    pub fn authorize_action<A>(&self, principal: Option<&Principal>, action: &A) -> Decision
    where
        A: RequiresAuthorization + ?Sized,
    {
        self.authorize(
            principal,
            action.required_roles(),
            action.required_permissions(),
        )
    }

    /// Explain a decision without touching the cache.
    pub fn explain(
        &self,
        principal: Option<&Principal>,
        required_roles: &[Role],
        required_permissions: &[Permission],
    ) -> DecisionExplanation {
        let Some(principal) = principal else {
            return DecisionExplanation {
                decision: Decision::Unauthenticated,
                principal_id: None,
                reason: "no authenticated principal".to_string(),
                missing_roles: Vec::new(),
                missing_permissions: Vec::new(),
            };
        };

        if !principal.active {
            return DecisionExplanation {
                decision: Decision::Deny,
                principal_id: Some(principal.id.clone()),
                reason: "principal is inactive".to_string(),
                missing_roles: Vec::new(),
                missing_permissions: Vec::new(),
            };
        }

        let missing = evaluate(principal, required_roles, required_permissions);
        let decision = Decision::from_verdict(missing.is_empty());
        let reason = if required_roles.is_empty() && required_permissions.is_empty() {
            "no requirements; authentication suffices".to_string()
        } else if missing.is_empty() {
            "all required roles and permissions are held".to_string()
        } else {
            format!(
                "missing {} role(s) and {} permission(s)",
                missing.roles.len(),
                missing.permissions.len()
            )
        };

        DecisionExplanation {
            decision,
            principal_id: Some(principal.id.clone()),
            reason,
            missing_roles: missing.roles,
            missing_permissions: missing.permissions,
        }
    }

    /// Push invalidation for a principal whose claims changed or whose
    /// session ended.
    pub fn invalidate_principal(&self, principal: &PrincipalId) -> usize {
        let removed = self.cache.invalidate_principal(principal);
        debug!(principal_id = %principal, removed, "invalidated cached decisions");
        removed
    }

    pub fn clear(&self) -> usize {
        self.cache.clear()
    }

    pub fn purge_expired(&self) -> usize {
        self.cache.purge_expired(self.clock.now())
    }

    // Principals that never log out through a session store would otherwise
    // keep their expired verdicts forever.
    fn sweep_if_due(&self, now: DateTime<Utc>) {
        let inserted = self.inserts.fetch_add(1, Ordering::Relaxed) + 1;
        if inserted % self.sweep_every != 0 {
            return;
        }
        let purged = self.cache.purge_expired(now);
        if purged > 0 {
            debug!(purged, remaining = self.cache.len(), "swept expired decisions");
        }
    }
}

/// Detailed, auditable account of a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionExplanation {
    pub decision: Decision,
    pub principal_id: Option<PrincipalId>,
    pub reason: String,
    pub missing_roles: Vec<String>,
    pub missing_permissions: Vec<String>,
}

#[derive(Debug, Default)]
struct Missing {
    roles: Vec<String>,
    permissions: Vec<String>,
}

impl Missing {
    fn is_empty(&self) -> bool {
        self.roles.is_empty() && self.permissions.is_empty()
    }
}

// Role gate and permission gate are independent; both must pass.
fn evaluate(principal: &Principal, roles: &[Role], permissions: &[Permission]) -> Missing {
    let held_roles = principal.normalized_roles();
    let held_permissions = principal.normalized_permissions();

    let mut missing = Missing::default();
    for role in roles {
        let name = role.normalized();
        if !held_roles.contains(&name) && !missing.roles.contains(&name) {
            missing.roles.push(name);
        }
    }
    for permission in permissions {
        let name = permission.normalized();
        if !held_permissions.contains(&name) && !missing.permissions.contains(&name) {
            missing.permissions.push(name);
        }
    }
    missing
}
