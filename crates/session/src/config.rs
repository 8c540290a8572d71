//! Session store configuration.

use std::time::Duration;

use thiserror::Error;

/// What to do when the store is used incorrectly (e.g. refreshing without a
/// session).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageErrorPolicy {
    /// Return [`SessionError::Usage`](crate::SessionError::Usage) to the caller.
    Surface,
    /// Log the misuse, force a logout and return
    /// [`SessionError::SessionInvalidated`](crate::SessionError::SessionInvalidated).
    Invalidate,
}

impl Default for UsageErrorPolicy {
    /// Loud in debug builds, fail-closed in release builds.
    fn default() -> Self {
        if cfg!(debug_assertions) {
            UsageErrorPolicy::Surface
        } else {
            UsageErrorPolicy::Invalidate
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("{0} is too large")]
    OutOfRange(&'static str),

    #[error("{name} has an invalid value: {value:?}")]
    InvalidEnv { name: &'static str, value: String },
}

/// Session lifetime policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Idle time after which the session is over.
    pub inactivity_timeout: Duration,
    /// Period of the proactive refresh timer. Keep it below the access-token
    /// lifetime.
    pub refresh_interval: Duration,
    pub usage_error_policy: UsageErrorPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout: Duration::from_secs(30 * 60),
            refresh_interval: Duration::from_secs(5 * 60),
            usage_error_policy: UsageErrorPolicy::default(),
        }
    }
}

impl SessionConfig {
    /// Upper bound for either timer period.
    pub const MAX_PERIOD: Duration = Duration::from_secs(365 * 24 * 60 * 60);

    pub const INACTIVITY_ENV: &'static str = "FIELDBOOK_SESSION_INACTIVITY_SECS";
    pub const REFRESH_ENV: &'static str = "FIELDBOOK_SESSION_REFRESH_SECS";
    pub const USAGE_ERRORS_ENV: &'static str = "FIELDBOOK_SESSION_USAGE_ERRORS";

    pub fn with_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = timeout;
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn with_usage_error_policy(mut self, policy: UsageErrorPolicy) -> Self {
        self.usage_error_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.inactivity_timeout.is_zero() {
            return Err(ConfigError::Zero("inactivity_timeout"));
        }
        if self.refresh_interval.is_zero() {
            return Err(ConfigError::Zero("refresh_interval"));
        }
        if self.inactivity_timeout > Self::MAX_PERIOD {
            return Err(ConfigError::OutOfRange("inactivity_timeout"));
        }
        if self.refresh_interval > Self::MAX_PERIOD {
            return Err(ConfigError::OutOfRange("refresh_interval"));
        }
        self.inactivity_threshold()?;
        Ok(())
    }

    /// The inactivity timeout as a wall-clock span.
    pub(crate) fn inactivity_threshold(&self) -> Result<chrono::Duration, ConfigError> {
        chrono::Duration::from_std(self.inactivity_timeout)
            .map_err(|_| ConfigError::OutOfRange("inactivity_timeout"))
    }

    /// Defaults overridden by whichever `FIELDBOOK_SESSION_*` variables are
    /// set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(Self::INACTIVITY_ENV) {
            config.inactivity_timeout = parse_secs(Self::INACTIVITY_ENV, raw)?;
        }
        if let Some(raw) = lookup(Self::REFRESH_ENV) {
            config.refresh_interval = parse_secs(Self::REFRESH_ENV, raw)?;
        }
        if let Some(raw) = lookup(Self::USAGE_ERRORS_ENV) {
            config.usage_error_policy = match raw.trim().to_ascii_lowercase().as_str() {
                "surface" => UsageErrorPolicy::Surface,
                "invalidate" => UsageErrorPolicy::Invalidate,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        name: Self::USAGE_ERRORS_ENV,
                        value: raw,
                    });
                }
            };
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_secs(name: &'static str, raw: String) -> Result<Duration, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(secs) => Ok(Duration::from_secs(secs)),
        Err(_) => Err(ConfigError::InvalidEnv { name, value: raw }),
    }
}
