//! Device trust scenarios
//!
//! These tests drive the coordinator against a scripted identity provider and a
//! real broadcast hub, with tokio's clock paused so polls land deterministically.

use std::sync::Arc;
use std::time::Duration;

use notegate_core::coordinator::CoordinatorConfig;
use notegate_core::testing::{MockFocus, MockIdentity, RecordingTrustListener};
use notegate_core::{
    AuthMessage, BroadcastHub, DeviceTrustCoordinator, ProviderError, TerminalReason, TrustState,
    AUTH_CHANNEL,
};

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

struct Tab {
    coordinator: DeviceTrustCoordinator,
    listener: Arc<RecordingTrustListener>,
}

fn open_tab(identity: &Arc<MockIdentity>, hub: &Arc<BroadcastHub>) -> Tab {
    let listener = Arc::new(RecordingTrustListener::default());
    let coordinator = DeviceTrustCoordinator::with_broadcast(
        identity.clone(),
        listener.clone(),
        CoordinatorConfig::default(),
        Some(hub.clone()),
        Some(Arc::new(MockFocus::new(true))),
    );
    Tab {
        coordinator,
        listener,
    }
}

#[tokio::test(start_paused = true)]
async fn test_poll_and_broadcast_in_same_tick_finalize_once() {
    let identity = Arc::new(MockIdentity::default());
    identity.set_finalize_delay(Duration::from_millis(500));
    let hub = Arc::new(BroadcastHub::new());
    let tab = open_tab(&identity, &hub);

    tab.coordinator.begin("ada@example.com", None).unwrap();
    settle().await;

    // The user follows the link: the backend flips and the confirm page posts
    identity.set_trusted(true);
    let confirm_page = hub.open(AUTH_CHANNEL).unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    confirm_page.post(&AuthMessage::AuthConfirmed).unwrap();
    confirm_page.post(&AuthMessage::AuthConfirmed).unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;
    settle().await;

    assert_eq!(identity.finalize_calls(), 1);
    assert_eq!(tab.listener.completing_entries(), 1);
    assert_eq!(tab.listener.trusted_accounts(), vec!["acct-1".to_string()]);
    assert_eq!(
        tab.coordinator.state(),
        TrustState::Terminal(TerminalReason::Trusted)
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_finalize_then_retry_completes() {
    let identity = Arc::new(MockIdentity::default());
    identity.push_finalize_result(Err(ProviderError::Network("timeout".into())));
    let hub = Arc::new(BroadcastHub::new());
    let tab = open_tab(&identity, &hub);

    tab.coordinator.begin("ada@example.com", None).unwrap();
    settle().await;

    let confirm_page = hub.open(AUTH_CHANNEL).unwrap();
    confirm_page.post(&AuthMessage::AuthConfirmed).unwrap();
    settle().await;

    assert_eq!(
        tab.coordinator.state(),
        TrustState::AwaitingVerification
    );
    assert_eq!(tab.listener.errors().len(), 1);

    // Second confirmation is honoured because the guard was released
    confirm_page.post(&AuthMessage::AuthConfirmed).unwrap();
    settle().await;

    assert_eq!(identity.finalize_calls(), 2);
    assert_eq!(
        tab.listener.states(),
        vec![
            TrustState::AwaitingVerification,
            TrustState::Completing,
            TrustState::AwaitingVerification,
            TrustState::Completing,
            TrustState::Terminal(TerminalReason::Trusted),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_teardown_during_completion_never_navigates() {
    let identity = Arc::new(MockIdentity::default());
    identity.set_finalize_delay(Duration::from_secs(1));
    let hub = Arc::new(BroadcastHub::new());
    let tab = open_tab(&identity, &hub);

    tab.coordinator.begin("ada@example.com", None).unwrap();
    settle().await;

    let confirm_page = hub.open(AUTH_CHANNEL).unwrap();
    confirm_page.post(&AuthMessage::AuthConfirmed).unwrap();
    settle().await;
    assert_eq!(tab.coordinator.state(), TrustState::Completing);

    tab.coordinator.teardown();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(tab.listener.trusted_accounts().is_empty());
    assert_eq!(
        tab.coordinator.state(),
        TrustState::Terminal(TerminalReason::Cancelled)
    );
}

#[tokio::test(start_paused = true)]
async fn test_every_open_tab_hears_the_confirmation() {
    let identity = Arc::new(MockIdentity::default());
    let hub = Arc::new(BroadcastHub::new());
    let first = open_tab(&identity, &hub);
    let second = open_tab(&identity, &hub);

    first.coordinator.begin("ada@example.com", None).unwrap();
    second.coordinator.begin("ada@example.com", None).unwrap();
    settle().await;

    let confirm_page = hub.open(AUTH_CHANNEL).unwrap();
    confirm_page.post(&AuthMessage::AuthConfirmed).unwrap();
    settle().await;

    assert_eq!(first.listener.trusted_accounts().len(), 1);
    assert_eq!(second.listener.trusted_accounts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_coordinator_stops_polling() {
    let identity = Arc::new(MockIdentity::default());
    let hub = Arc::new(BroadcastHub::new());
    let tab = open_tab(&identity, &hub);

    tab.coordinator.begin("ada@example.com", None).unwrap();
    tokio::time::sleep(Duration::from_millis(3_500)).await;
    assert_eq!(identity.poll_calls(), 1);

    drop(tab);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(identity.poll_calls(), 1);
}
