use thiserror::Error;

/// Failures surfaced by explicit session operations.
///
/// Timer-driven failures are never returned to anyone; they close the session
/// and show up on the status channel instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Bad credentials or an unusable account at login. The message is safe
    /// to show to the user.
    #[error("authentication failed: {0}")]
    AuthenticationFailure(String),

    /// The session was ended (refresh rejected, identity probe failed,
    /// session closed while the call was pending). Callers send the user back
    /// to login.
    #[error("session invalidated: {0}")]
    SessionInvalidated(String),

    /// The caller used the store incorrectly, e.g. refreshing with no session.
    #[error("session store misuse: {0}")]
    Usage(String),
}

impl SessionError {
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::AuthenticationFailure(msg.into())
    }

    pub fn invalidated(msg: impl Into<String>) -> Self {
        Self::SessionInvalidated(msg.into())
    }

    pub fn usage(msg: impl Into<String>) -> Self {
        Self::Usage(msg.into())
    }
}
