//! Timer behaviour, driven by Tokio's paused clock.

mod support;

use std::time::Duration;

use fieldbook_session::{CloseReason, SessionStatus};

use support::{FakeExchange, SECRET, admin, settle, store};

const MINUTE: Duration = Duration::from_secs(60);

fn closed(reason: CloseReason) -> SessionStatus {
    SessionStatus::Closed { reason }
}

#[tokio::test(start_paused = true)]
async fn idle_session_is_logged_out_by_the_watchdog() {
    let exchange = FakeExchange::new(admin());
    let store = store(exchange.clone());
    store.login("ada", SECRET).await.unwrap();

    tokio::time::sleep(31 * MINUTE).await;
    settle().await;

    assert_eq!(store.status(), closed(CloseReason::InactivityTimeout));
    assert!(!store.is_authenticated());
    assert!(store.is_session_expired());
}

#[tokio::test(start_paused = true)]
async fn activity_postpones_the_watchdog() {
    let store = store(FakeExchange::new(admin()));
    store.login("ada", SECRET).await.unwrap();

    tokio::time::sleep(20 * MINUTE).await;
    store.record_activity();
    settle().await;

    tokio::time::sleep(20 * MINUTE).await;
    settle().await;
    assert!(store.status().is_active());

    tokio::time::sleep(11 * MINUTE).await;
    settle().await;
    assert_eq!(store.status(), closed(CloseReason::InactivityTimeout));
}

#[tokio::test(start_paused = true)]
async fn refresh_timer_rotates_credentials() {
    let exchange = FakeExchange::new(admin());
    let store = store(exchange.clone());
    store.login("ada", SECRET).await.unwrap();
    assert_eq!(exchange.refresh_count(), 0);

    tokio::time::sleep(5 * MINUTE + Duration::from_secs(1)).await;
    settle().await;

    assert_eq!(exchange.refresh_count(), 1);
    assert_eq!(store.access_token().unwrap().expose(), "access-1");
    assert!(store.status().is_active());
}

#[tokio::test(start_paused = true)]
async fn scheduled_refreshes_do_not_keep_an_idle_session_alive() {
    let exchange = FakeExchange::new(admin());
    let store = store(exchange.clone());
    store.login("ada", SECRET).await.unwrap();

    tokio::time::sleep(29 * MINUTE).await;
    settle().await;
    assert!(exchange.refresh_count() >= 5);
    assert!(store.status().is_active());

    tokio::time::sleep(2 * MINUTE).await;
    settle().await;
    assert_eq!(store.status(), closed(CloseReason::InactivityTimeout));
}

#[tokio::test(start_paused = true)]
async fn failed_proactive_refresh_logs_out() {
    let exchange = FakeExchange::new(admin());
    let store = store(exchange.clone());
    store.login("ada", SECRET).await.unwrap();
    exchange.reject_refresh();
    let mut status = store.subscribe();

    tokio::time::sleep(5 * MINUTE + Duration::from_secs(1)).await;
    settle().await;

    assert_eq!(store.status(), closed(CloseReason::RefreshFailed));
    assert!(!store.is_authenticated());
    assert!(status.has_changed().unwrap());
    assert_eq!(*status.borrow_and_update(), closed(CloseReason::RefreshFailed));
}

#[tokio::test(start_paused = true)]
async fn timers_stop_after_logout() {
    let exchange = FakeExchange::new(admin());
    let store = store(exchange.clone());
    store.login("ada", SECRET).await.unwrap();

    store.logout().await;
    tokio::time::sleep(120 * MINUTE).await;
    settle().await;

    assert_eq!(exchange.refresh_count(), 0);
    assert_eq!(store.status(), closed(CloseReason::Logout));
}

#[tokio::test(start_paused = true)]
async fn old_timers_leave_a_newer_session_alone() {
    let exchange = FakeExchange::new(admin());
    let store = store(exchange.clone());
    store.login("ada", SECRET).await.unwrap();

    tokio::time::sleep(20 * MINUTE).await;
    store.login("ada", SECRET).await.unwrap();

    // Past the first session's watchdog deadline, inside the second's.
    tokio::time::sleep(15 * MINUTE).await;
    settle().await;

    assert!(store.status().is_active());
    assert!(store.is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn dropping_the_store_stops_its_timers() {
    let exchange = FakeExchange::new(admin());
    let store = store(exchange.clone());
    store.login("ada", SECRET).await.unwrap();

    drop(store);
    tokio::time::sleep(60 * MINUTE).await;
    settle().await;

    assert_eq!(exchange.refresh_count(), 0);
}
