//! Session timers: proactive refresh and inactivity watchdog.
//!
//! Both tasks belong to exactly one session. They share a single cancel
//! signal, hold only a weak reference to the store, and re-check the session
//! id before acting, so a timer can never close a session it was not armed
//! for.

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use fieldbook_core::SessionId;

use crate::status::CloseReason;
use crate::store::{Inner, RefreshTrigger};

/// Handles to the timers of one live session.
#[derive(Debug)]
pub(crate) struct SessionMonitor {
    session_id: SessionId,
    cancel: watch::Sender<bool>,
    activity: watch::Sender<u64>,
    tasks: Vec<JoinHandle<()>>,
    cancelled: bool,
}

impl SessionMonitor {
    /// Arm both timers for `session_id`. Must be called from within a Tokio
    /// runtime.
    pub(crate) fn start(
        store: Weak<Inner>,
        session_id: SessionId,
        refresh_interval: Duration,
        inactivity_timeout: Duration,
    ) -> Self {
        let (cancel, cancel_rx) = watch::channel(false);
        let (activity, activity_rx) = watch::channel(0u64);

        let refresh = tokio::spawn(run_refresh_timer(
            store.clone(),
            session_id,
            refresh_interval,
            cancel_rx.clone(),
        ));
        let watchdog = tokio::spawn(run_inactivity_watchdog(
            store,
            session_id,
            inactivity_timeout,
            cancel_rx,
            activity_rx,
        ));

        debug!(%session_id, ?refresh_interval, ?inactivity_timeout, "session monitoring armed");

        Self {
            session_id,
            cancel,
            activity,
            tasks: vec![refresh, watchdog],
            cancelled: false,
        }
    }

    /// Reset the inactivity watchdog.
    pub(crate) fn touch(&self) {
        self.activity.send_modify(|n| *n = n.wrapping_add(1));
    }

    /// Stop both timers. Consumes the monitor, so it happens once.
    pub(crate) fn cancel(mut self) {
        self.signal_cancel();
    }

    fn signal_cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        self.cancel.send_replace(true);
        debug!(
            session_id = %self.session_id,
            running = self.tasks.iter().filter(|t| !t.is_finished()).count(),
            "session monitoring cancelled"
        );
    }
}

impl Drop for SessionMonitor {
    fn drop(&mut self) {
        self.signal_cancel();
    }
}

async fn run_refresh_timer(
    store: Weak<Inner>,
    session_id: SessionId,
    period: Duration,
    mut cancel: watch::Receiver<bool>,
) {
    // First tick one full period after login, not immediately.
    let Some(first_tick) = Instant::now().checked_add(period) else {
        error!(
            %session_id,
            ?period,
            "refresh interval out of range; proactive refresh disabled"
        );
        return;
    };
    let mut ticker = time::interval_at(first_tick, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.changed() => break,
            _ = ticker.tick() => {
                let Some(inner) = store.upgrade() else { break };
                if let Err(err) = inner.refresh(RefreshTrigger::Scheduled(session_id)).await {
                    warn!(%session_id, error = %err, "proactive refresh failed; ending session");
                    inner.end_session(CloseReason::RefreshFailed, Some(session_id)).await;
                    break;
                }
                debug!(%session_id, "proactive refresh completed");
            }
        }
    }

    debug!(%session_id, "refresh timer stopped");
}

async fn run_inactivity_watchdog(
    store: Weak<Inner>,
    session_id: SessionId,
    timeout: Duration,
    mut cancel: watch::Receiver<bool>,
    mut activity: watch::Receiver<u64>,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.changed() => break,
            changed = activity.changed() => {
                if changed.is_err() {
                    break;
                }
                // Activity seen; loop around with a fresh deadline.
            }
            _ = time::sleep(timeout) => {
                if let Some(inner) = store.upgrade() {
                    info!(%session_id, ?timeout, "no activity within timeout; ending session");
                    inner.end_session(CloseReason::InactivityTimeout, Some(session_id)).await;
                }
                break;
            }
        }
    }

    debug!(%session_id, "inactivity watchdog stopped");
}
