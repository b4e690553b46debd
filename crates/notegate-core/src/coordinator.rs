//! Device trust coordination
//!
//! Once a PIN submission comes back "second factor required", the coordinator
//! sends the confirmation email and then waits for either of two detectors:
//!
//! - a poll of the identity provider every few seconds
//! - an `AUTH_CONFIRMED` broadcast from the page that handled the email link
//!
//! Both may fire within the same tick. Entry to `Completing` is guarded by a
//! one-shot compare-and-set flag so the finalize call runs at most once per
//! successful detection. A failed finalize releases the flag and goes back to
//! waiting.
//!
//! ```text
//! Idle ──second factor──▶ AwaitingVerification ──poll/broadcast──▶ Completing
//!                               ▲                                    │
//!                               └──────────── finalize failed ◀──────┤
//!                                                                    ▼
//!                                                        Terminal(Trusted)
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::channel::{AuthMessage, BroadcastHub, CrossTabChannel, WindowFocus, AUTH_CHANNEL};
use crate::error::CoordinatorError;
use crate::provider::{mask_email, IdentityProvider};
use crate::session::Session;
use crate::timer::CountdownTimer;

/// Interval between device-trust polls
pub const POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Seconds before the confirmation email may be resent
pub const RESEND_COOLDOWN_SECS: u64 = 30;

/// Coordinator state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrustState {
    Idle,
    AwaitingVerification,
    Completing,
    Terminal(TerminalReason),
}

/// Why the coordinator stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminalReason {
    /// Trust finalized and a session was handed up
    Trusted,
    /// Torn down before trust completed
    Cancelled,
}

/// Callbacks to the rendering layer
pub trait TrustListener: Send + Sync {
    /// The coordinator moved to `state`
    fn on_state_change(&self, _state: TrustState) {}

    /// Trust was finalized; navigate past the gate with `session`
    fn on_trusted(&self, session: Session);

    /// A step failed; show `message` on the awaiting view
    fn on_error(&self, _message: &str) {}
}

/// Coordinator tuning
#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    pub poll_interval: Duration,
    pub resend_cooldown_secs: u64,
    pub channel_name: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
            resend_cooldown_secs: RESEND_COOLDOWN_SECS,
            channel_name: AUTH_CHANNEL.to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Trigger {
    Poll,
    Broadcast,
}

/// State for one verification attempt
#[derive(Debug)]
struct VerificationSession {
    email: String,
    masked_email: String,
    polling: AtomicBool,
    /// One-shot guard for entry to `Completing`
    completing: AtomicBool,
}

struct Inner {
    identity: Arc<dyn IdentityProvider>,
    listener: Arc<dyn TrustListener>,
    hub: Option<Arc<BroadcastHub>>,
    focus: Option<Arc<dyn WindowFocus>>,
    config: CoordinatorConfig,
    state: watch::Sender<TrustState>,
    session: Mutex<Option<Arc<VerificationSession>>>,
    error: Mutex<Option<String>>,
    resend_cooldown: Mutex<CountdownTimer>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
    channel_task: Mutex<Option<JoinHandle<()>>>,
    finalize_task: Mutex<Option<JoinHandle<()>>>,
}

/// Drives one device through email confirmation
///
/// Timers, the poll loop and the channel subscription belong to this value
/// and are stopped by [`teardown`](Self::teardown) or on drop.
pub struct DeviceTrustCoordinator {
    inner: Arc<Inner>,
}

impl DeviceTrustCoordinator {
    /// Create an idle coordinator
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        listener: Arc<dyn TrustListener>,
        config: CoordinatorConfig,
    ) -> Self {
        Self::build(identity, listener, config, None, None)
    }

    /// Create an idle coordinator that also listens for cross-tab confirmation
    pub fn with_broadcast(
        identity: Arc<dyn IdentityProvider>,
        listener: Arc<dyn TrustListener>,
        config: CoordinatorConfig,
        hub: Option<Arc<BroadcastHub>>,
        focus: Option<Arc<dyn WindowFocus>>,
    ) -> Self {
        Self::build(identity, listener, config, hub, focus)
    }

    fn build(
        identity: Arc<dyn IdentityProvider>,
        listener: Arc<dyn TrustListener>,
        config: CoordinatorConfig,
        hub: Option<Arc<BroadcastHub>>,
        focus: Option<Arc<dyn WindowFocus>>,
    ) -> Self {
        let (state, _) = watch::channel(TrustState::Idle);
        Self {
            inner: Arc::new(Inner {
                identity,
                listener,
                hub,
                focus,
                config,
                state,
                session: Mutex::new(None),
                error: Mutex::new(None),
                resend_cooldown: Mutex::new(CountdownTimer::new("resend")),
                poll_task: Mutex::new(None),
                channel_task: Mutex::new(None),
                finalize_task: Mutex::new(None),
            }),
        }
    }

    /// Current state
    pub fn state(&self) -> TrustState {
        *self.inner.state.borrow()
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<TrustState> {
        self.inner.state.subscribe()
    }

    /// Masked email shown while awaiting confirmation
    pub fn masked_email(&self) -> Option<String> {
        lock(&self.inner.session)
            .as_ref()
            .map(|s| s.masked_email.clone())
    }

    /// Last surfaced error
    pub fn error(&self) -> Option<String> {
        lock(&self.inner.error).clone()
    }

    /// Whether the poll loop is running
    pub fn is_polling(&self) -> bool {
        lock(&self.inner.session)
            .as_ref()
            .is_some_and(|s| s.polling.load(Ordering::Acquire))
    }

    /// Seconds until resend is allowed
    pub fn resend_available_in(&self) -> u64 {
        lock(&self.inner.resend_cooldown).remaining()
    }

    /// Watch the resend cooldown
    pub fn resend_cooldown(&self) -> watch::Receiver<u64> {
        lock(&self.inner.resend_cooldown).subscribe()
    }

    /// Enter `AwaitingVerification` for `email`
    ///
    /// Starts the resend cooldown, sends the confirmation email, starts polling
    /// and subscribes to the cross-tab channel when one is available.
    pub fn begin(&self, email: &str, masked_email: Option<&str>) -> Result<(), CoordinatorError> {
        let inner = &self.inner;
        if *inner.state.borrow() != TrustState::Idle {
            return Err(CoordinatorError::AlreadyStarted);
        }

        let session = Arc::new(VerificationSession {
            email: email.to_string(),
            masked_email: masked_email
                .map(str::to_string)
                .unwrap_or_else(|| mask_email(email)),
            polling: AtomicBool::new(false),
            completing: AtomicBool::new(false),
        });
        *lock(&inner.session) = Some(Arc::clone(&session));
        *lock(&inner.error) = None;

        if !inner.transition(TrustState::Idle, TrustState::AwaitingVerification) {
            return Err(CoordinatorError::AlreadyStarted);
        }
        info!(email = %session.masked_email, "Awaiting device confirmation");

        lock(&inner.resend_cooldown).start(inner.config.resend_cooldown_secs);
        inner.send_email(&session);
        inner.start_polling(&session);
        inner.subscribe_channel();

        Ok(())
    }

    /// Send the confirmation email again
    pub fn resend(&self) -> Result<(), CoordinatorError> {
        let inner = &self.inner;
        if *inner.state.borrow() != TrustState::AwaitingVerification {
            return Err(CoordinatorError::NotAwaiting);
        }

        let mut cooldown = lock(&inner.resend_cooldown);
        if cooldown.is_running() {
            return Err(CoordinatorError::CooldownActive(cooldown.remaining()));
        }

        let session = lock(&inner.session)
            .clone()
            .ok_or(CoordinatorError::NotAwaiting)?;

        debug!("Resending confirmation email");
        inner.send_email(&session);
        cooldown.start(inner.config.resend_cooldown_secs);
        Ok(())
    }

    /// Stop every task and timer owned by this coordinator
    pub fn teardown(&self) {
        self.inner.teardown();
    }
}

impl Drop for DeviceTrustCoordinator {
    fn drop(&mut self) {
        self.inner.teardown();
    }
}

impl Inner {
    fn transition(&self, from: TrustState, to: TrustState) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });

        if changed {
            debug!(?from, ?to, "Trust state changed");
            self.listener.on_state_change(to);
        }
        changed
    }

    fn send_email(&self, session: &VerificationSession) {
        let identity = Arc::clone(&self.identity);
        let email = session.email.clone();
        tokio::spawn(async move {
            if let Err(e) = identity.send_verification_email(&email).await {
                warn!("Failed to send confirmation email: {}", e);
            }
        });
    }

    fn start_polling(self: &Arc<Self>, session: &Arc<VerificationSession>) {
        let inner = Arc::clone(self);
        let period = self.config.poll_interval;
        let first_tick = Instant::now() + period;

        session.polling.store(true, Ordering::Release);

        let handle = tokio::spawn(async move {
            let mut ticks = tokio::time::interval_at(first_tick, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticks.tick().await;
                let awaiting = *inner.state.borrow() == TrustState::AwaitingVerification;
                if !awaiting {
                    break;
                }

                match inner.identity.is_device_trusted().await {
                    Ok(true) => {
                        inner.trigger(Trigger::Poll);
                        break;
                    }
                    Ok(false) => debug!("Device not trusted yet"),
                    Err(e) => debug!("Trust poll failed: {}", e),
                }
            }
        });

        if let Some(previous) = lock(&self.poll_task).replace(handle) {
            previous.abort();
        }
    }

    fn stop_polling(&self, session: &VerificationSession) {
        session.polling.store(false, Ordering::Release);
        if let Some(task) = lock(&self.poll_task).take() {
            task.abort();
        }
    }

    fn subscribe_channel(self: &Arc<Self>) {
        let Some(hub) = &self.hub else {
            debug!("No broadcast hub, confirmation by polling only");
            return;
        };

        let channel = match hub.open(&self.config.channel_name) {
            Ok(channel) => channel,
            Err(e) => {
                debug!("Cross-tab channel unavailable, polling only: {}", e);
                return;
            }
        };

        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move { inner.listen(channel).await });

        if let Some(previous) = lock(&self.channel_task).replace(handle) {
            previous.abort();
        }
    }

    async fn listen(self: Arc<Self>, mut channel: CrossTabChannel) {
        while let Some(message) = channel.recv().await {
            match message {
                AuthMessage::AuthConfirmed => {
                    if let Some(focus) = &self.focus {
                        if !focus.bring_to_front() {
                            debug!("Window focus not available");
                        }
                    }
                    self.trigger(Trigger::Broadcast);
                }
            }
        }
        debug!(channel = %channel.name(), "Cross-tab channel closed");
    }

    /// Enter `Completing` if this is the first detection to arrive
    ///
    /// The state check and the guard's check-and-set happen under the state
    /// lock, without suspending.
    fn trigger(self: &Arc<Self>, trigger: Trigger) {
        let Some(session) = lock(&self.session).clone() else {
            return;
        };

        let entered = self.state.send_if_modified(|state| {
            if *state != TrustState::AwaitingVerification {
                return false;
            }
            let won = session
                .completing
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok();
            if won {
                *state = TrustState::Completing;
            }
            won
        });

        if !entered {
            debug!(?trigger, "Confirmation ignored, not awaiting or already completing");
            return;
        }

        self.stop_polling(&session);
        info!(?trigger, "Device confirmation detected");
        self.listener.on_state_change(TrustState::Completing);

        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move { inner.complete(session).await });
        if let Some(previous) = lock(&self.finalize_task).replace(handle) {
            previous.abort();
        }
    }

    async fn complete(self: Arc<Self>, session: Arc<VerificationSession>) {
        match self.identity.finalize_device_trust().await {
            Ok(user_session) => {
                if !self.transition(
                    TrustState::Completing,
                    TrustState::Terminal(TerminalReason::Trusted),
                ) {
                    return;
                }
                info!("Device trust finalized");
                *lock(&self.error) = None;
                self.stop_detectors();
                self.listener.on_trusted(user_session);
            }
            Err(e) => {
                warn!("Finalizing device trust failed: {}", e);
                let message = e.user_message();
                *lock(&self.error) = Some(message.clone());

                // Guard and state change together so no detection falls between them
                let released = self.state.send_if_modified(|state| {
                    if *state != TrustState::Completing {
                        return false;
                    }
                    session.completing.store(false, Ordering::Release);
                    *state = TrustState::AwaitingVerification;
                    true
                });
                if !released {
                    return;
                }
                debug!("Trust state back to AwaitingVerification");
                self.listener.on_state_change(TrustState::AwaitingVerification);
                self.listener.on_error(&message);

                // A listener callback may already have started the next attempt
                let awaiting = *self.state.borrow() == TrustState::AwaitingVerification;
                if awaiting {
                    self.start_polling(&session);
                }
            }
        }
    }

    fn stop_detectors(&self) {
        if let Some(session) = lock(&self.session).as_ref() {
            session.polling.store(false, Ordering::Release);
        }
        if let Some(task) = lock(&self.poll_task).take() {
            task.abort();
        }
        if let Some(task) = lock(&self.channel_task).take() {
            task.abort();
        }
        lock(&self.resend_cooldown).stop();
    }

    fn teardown(&self) {
        self.stop_detectors();
        if let Some(task) = lock(&self.finalize_task).take() {
            task.abort();
        }

        let cancelled = TrustState::Terminal(TerminalReason::Cancelled);
        let current = *self.state.borrow();
        if !matches!(current, TrustState::Terminal(_)) && self.transition(current, cancelled) {
            debug!("Device trust coordinator torn down");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::testing::{MockFocus, MockIdentity, RecordingTrustListener};

    fn coordinator(
        identity: &Arc<MockIdentity>,
        listener: &Arc<RecordingTrustListener>,
        hub: Option<Arc<BroadcastHub>>,
    ) -> DeviceTrustCoordinator {
        DeviceTrustCoordinator::with_broadcast(
            identity.clone(),
            listener.clone(),
            CoordinatorConfig::default(),
            hub,
            None,
        )
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_begin_sends_email_and_starts_cooldown() {
        let identity = Arc::new(MockIdentity::default());
        let listener = Arc::new(RecordingTrustListener::default());
        let coordinator = coordinator(&identity, &listener, None);

        coordinator.begin("ada@example.com", None).unwrap();
        settle().await;

        assert_eq!(coordinator.state(), TrustState::AwaitingVerification);
        assert_eq!(coordinator.masked_email().as_deref(), Some("a***a@example.com"));
        assert_eq!(coordinator.resend_available_in(), RESEND_COOLDOWN_SECS);
        assert!(coordinator.is_polling());
        assert_eq!(identity.emails_sent(), vec!["ada@example.com".to_string()]);
        assert_eq!(
            coordinator.begin("ada@example.com", None),
            Err(CoordinatorError::AlreadyStarted)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_completes_trust() {
        let identity = Arc::new(MockIdentity::default());
        let listener = Arc::new(RecordingTrustListener::default());
        let coordinator = coordinator(&identity, &listener, None);

        coordinator.begin("ada@example.com", None).unwrap();

        tokio::time::sleep(Duration::from_millis(6_500)).await;
        assert_eq!(identity.poll_calls(), 2);
        assert_eq!(coordinator.state(), TrustState::AwaitingVerification);

        identity.set_trusted(true);
        tokio::time::sleep(Duration::from_secs(3)).await;
        settle().await;

        assert_eq!(
            coordinator.state(),
            TrustState::Terminal(TerminalReason::Trusted)
        );
        assert_eq!(identity.finalize_calls(), 1);
        assert_eq!(listener.trusted_accounts(), vec!["acct-1".to_string()]);
        assert!(!coordinator.is_polling());

        // No further polls after leaving AwaitingVerification
        let polls = identity.poll_calls();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(identity.poll_calls(), polls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_completes_trust_and_raises_window() {
        let identity = Arc::new(MockIdentity::default());
        let listener = Arc::new(RecordingTrustListener::default());
        let hub = Arc::new(BroadcastHub::new());
        let focus = Arc::new(MockFocus::new(false));
        let coordinator = DeviceTrustCoordinator::with_broadcast(
            identity.clone(),
            listener.clone(),
            CoordinatorConfig::default(),
            Some(hub.clone()),
            Some(focus.clone()),
        );

        coordinator.begin("ada@example.com", None).unwrap();
        settle().await;

        let confirm_page = hub.open(AUTH_CHANNEL).unwrap();
        confirm_page.post(&AuthMessage::AuthConfirmed).unwrap();
        settle().await;

        assert_eq!(focus.calls(), 1);
        assert_eq!(
            coordinator.state(),
            TrustState::Terminal(TerminalReason::Trusted)
        );
        assert_eq!(identity.finalize_calls(), 1);
        assert_eq!(identity.poll_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simultaneous_detections_finalize_once() {
        let identity = Arc::new(MockIdentity::default());
        identity.set_finalize_delay(Duration::from_millis(200));
        let listener = Arc::new(RecordingTrustListener::default());
        let hub = Arc::new(BroadcastHub::new());
        let coordinator = coordinator(&identity, &listener, Some(hub.clone()));

        coordinator.begin("ada@example.com", None).unwrap();
        settle().await;
        identity.set_trusted(true);

        // Poll tick and broadcast land in the same instant
        let confirm_page = hub.open(AUTH_CHANNEL).unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        confirm_page.post(&AuthMessage::AuthConfirmed).unwrap();
        settle().await;
        confirm_page.post(&AuthMessage::AuthConfirmed).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(identity.finalize_calls(), 1);
        assert_eq!(listener.completing_entries(), 1);
        assert_eq!(listener.trusted_accounts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_finalize_releases_guard() {
        let identity = Arc::new(MockIdentity::default());
        identity.push_finalize_result(Err(ProviderError::Rejected("Link expired".into())));
        let listener = Arc::new(RecordingTrustListener::default());
        let hub = Arc::new(BroadcastHub::new());
        let coordinator = coordinator(&identity, &listener, Some(hub.clone()));

        coordinator.begin("ada@example.com", None).unwrap();
        settle().await;

        let confirm_page = hub.open(AUTH_CHANNEL).unwrap();
        confirm_page.post(&AuthMessage::AuthConfirmed).unwrap();
        settle().await;

        assert_eq!(coordinator.state(), TrustState::AwaitingVerification);
        assert_eq!(coordinator.error().as_deref(), Some("Link expired"));
        assert_eq!(listener.errors(), vec!["Link expired".to_string()]);
        assert!(coordinator.is_polling());

        // A later poll can complete it
        identity.set_trusted(true);
        tokio::time::sleep(Duration::from_millis(3_100)).await;
        settle().await;

        assert_eq!(identity.finalize_calls(), 2);
        assert_eq!(
            coordinator.state(),
            TrustState::Terminal(TerminalReason::Trusted)
        );
        assert!(coordinator.error().is_none());
    }

    /// Fires a broadcast detection the moment the state returns to awaiting
    #[derive(Default)]
    struct ConfirmOnReturn {
        inner: std::sync::OnceLock<std::sync::Weak<Inner>>,
        awaiting_entries: std::sync::atomic::AtomicUsize,
    }

    impl TrustListener for ConfirmOnReturn {
        fn on_state_change(&self, state: TrustState) {
            if state != TrustState::AwaitingVerification {
                return;
            }
            let entries = self.awaiting_entries.fetch_add(1, Ordering::SeqCst) + 1;
            if entries == 2 {
                if let Some(inner) = self.inner.get().and_then(std::sync::Weak::upgrade) {
                    inner.trigger(Trigger::Broadcast);
                }
            }
        }

        fn on_trusted(&self, _session: Session) {}
    }

    #[tokio::test(start_paused = true)]
    async fn test_detection_right_after_failed_finalize_is_not_lost() {
        let identity = Arc::new(MockIdentity::default());
        identity.push_finalize_result(Err(ProviderError::Network("reset".into())));
        let listener = Arc::new(ConfirmOnReturn::default());
        let config = CoordinatorConfig {
            poll_interval: Duration::from_secs(3600),
            ..CoordinatorConfig::default()
        };
        let coordinator =
            DeviceTrustCoordinator::new(identity.clone(), listener.clone(), config);
        let _ = listener.inner.set(Arc::downgrade(&coordinator.inner));

        coordinator.begin("ada@example.com", None).unwrap();
        coordinator.inner.trigger(Trigger::Broadcast);
        settle().await;

        assert_eq!(identity.finalize_calls(), 2);
        assert_eq!(
            coordinator.state(),
            TrustState::Terminal(TerminalReason::Trusted)
        );
        assert!(!coordinator.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resend_respects_cooldown() {
        let identity = Arc::new(MockIdentity::default());
        let listener = Arc::new(RecordingTrustListener::default());
        let coordinator = coordinator(&identity, &listener, None);

        assert_eq!(coordinator.resend(), Err(CoordinatorError::NotAwaiting));

        coordinator.begin("ada@example.com", None).unwrap();
        assert_eq!(
            coordinator.resend(),
            Err(CoordinatorError::CooldownActive(RESEND_COOLDOWN_SECS))
        );

        tokio::time::sleep(Duration::from_millis(30_500)).await;
        assert_eq!(coordinator.resend_available_in(), 0);
        coordinator.resend().unwrap();
        settle().await;

        assert_eq!(identity.emails_sent().len(), 2);
        assert_eq!(coordinator.resend_available_in(), RESEND_COOLDOWN_SECS);
        assert_eq!(coordinator.state(), TrustState::AwaitingVerification);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_stops_everything() {
        let identity = Arc::new(MockIdentity::default());
        let listener = Arc::new(RecordingTrustListener::default());
        let hub = Arc::new(BroadcastHub::new());
        let coordinator = coordinator(&identity, &listener, Some(hub.clone()));

        coordinator.begin("ada@example.com", None).unwrap();
        settle().await;
        coordinator.teardown();

        assert_eq!(
            coordinator.state(),
            TrustState::Terminal(TerminalReason::Cancelled)
        );
        assert_eq!(coordinator.resend_available_in(), 0);

        identity.set_trusted(true);
        let confirm_page = hub.open(AUTH_CHANNEL).unwrap();
        confirm_page.post(&AuthMessage::AuthConfirmed).unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(identity.poll_calls(), 0);
        assert_eq!(identity.finalize_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_channel_falls_back_to_polling() {
        let identity = Arc::new(MockIdentity::default());
        let listener = Arc::new(RecordingTrustListener::default());
        let hub = Arc::new(BroadcastHub::new());
        hub.close();
        let coordinator = coordinator(&identity, &listener, Some(hub));

        coordinator.begin("ada@example.com", None).unwrap();
        identity.set_trusted(true);
        tokio::time::sleep(Duration::from_millis(3_100)).await;
        settle().await;

        assert!(listener.errors().is_empty());
        assert_eq!(
            coordinator.state(),
            TrustState::Terminal(TerminalReason::Trusted)
        );
    }
}
