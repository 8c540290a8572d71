use serde::Serialize;

use fieldbook_auth::PrincipalId;
use fieldbook_core::SessionId;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Explicit `logout()`.
    Logout,
    /// The inactivity watchdog fired.
    InactivityTimeout,
    /// Found idle past the inactivity threshold when next used.
    Expired,
    /// A refresh was rejected or could not be completed.
    RefreshFailed,
    /// The identity probe did not confirm the session.
    ProbeRejected,
    /// A new login replaced it.
    Replaced,
    /// The store was misused under the invalidate policy.
    UsageError,
}

impl CloseReason {
    /// True for closures caused by the passage of time.
    pub fn is_expiry(self) -> bool {
        matches!(self, CloseReason::InactivityTimeout | CloseReason::Expired)
    }
}

impl core::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            CloseReason::Logout => "logout",
            CloseReason::InactivityTimeout => "inactivity_timeout",
            CloseReason::Expired => "expired",
            CloseReason::RefreshFailed => "refresh_failed",
            CloseReason::ProbeRejected => "probe_rejected",
            CloseReason::Replaced => "replaced",
            CloseReason::UsageError => "usage_error",
        };
        f.write_str(s)
    }
}

/// Observable lifecycle of the session store: `NoSession → Active → Closed`.
///
/// Published on a watch channel; a UI observing `Closed` is how timer-driven
/// failures become visible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionStatus {
    NoSession,
    Active {
        session_id: SessionId,
        principal_id: PrincipalId,
    },
    Closed {
        reason: CloseReason,
    },
}

impl SessionStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Active { .. })
    }
}
