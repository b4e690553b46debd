//! Gate flow for one load of the client
//!
//! [`GateFlow`] owns the code field, the lockout countdown, the inline error
//! and, once a second factor is needed, the [`DeviceTrustCoordinator`]. The
//! rendering layer feeds keystrokes into [`GateFlow::input_mut`] and drives
//! submissions with [`GateFlow::submit_next`].
//!
//! Failures are sorted into [`ErrorKind`]s:
//!
//! - `Validation`: wrong code length, never sent anywhere
//! - `CredentialMismatch`: refused code, field shakes and clears
//! - `RateLimited`: lockout countdown, input disabled until it runs out
//! - `NetworkFailure`: generic message, code cleared, no lockout
//! - `Verification`: device confirmation failed, shown on the awaiting view

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::channel::{BroadcastHub, WindowFocus};
use crate::config::GateConfig;
use crate::coordinator::{DeviceTrustCoordinator, TrustListener};
use crate::credential::{CredentialError, MAX_PIN_LENGTH, MIN_PIN_LENGTH};
use crate::digit_input::{DigitCodeInput, DigitInputListener};
use crate::error::{GateError, ProviderError, Result};
use crate::mode::{AuthMode, ModeResolution};
use crate::provider::{
    mask_email, DeviceStore, IdentityProvider, PinVerifier, ProfileFragment, RemoteGateInfo,
    SetupOutcome, VerificationOutcome,
};
use crate::session::Session;
use crate::timer::{ceil_secs, CountdownTimer, TimerListener};

const OFFLINE_MESSAGE: &str = "Connect to the internet to set up this device";

/// What the gate is showing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateStep {
    /// Code entry
    EnterPin,
    /// Setup only: enter the new PIN again
    ConfirmPin,
    /// Waiting for the emailed confirmation link
    AwaitingVerification,
    /// Past the gate
    Unlocked,
    /// Offline without a device record
    Offline,
}

/// Category of an inline error
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    CredentialMismatch,
    RateLimited,
    NetworkFailure,
    Verification,
}

/// Inline error shown under the code field
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowError {
    pub kind: ErrorKind,
    pub message: String,
}

impl FlowError {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Callbacks to the rendering layer
pub trait GateListener: Send + Sync {
    fn on_step(&self, _step: GateStep) {}

    /// The inline error changed; `None` clears it
    fn on_error(&self, _error: Option<&FlowError>) {}

    /// A refused code: play the shake animation
    fn on_shake(&self) {}

    /// Navigate past the gate
    fn on_unlocked(&self, session: Session);
}

/// Collaborators the flow talks to
#[derive(Clone)]
pub struct GateServices {
    pub pin_verifier: Arc<dyn PinVerifier>,
    pub devices: Arc<dyn DeviceStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub hub: Option<Arc<BroadcastHub>>,
    pub focus: Option<Arc<dyn WindowFocus>>,
}

struct FlowState {
    step: GateStep,
    error: Option<FlowError>,
}

/// State shared with timer and coordinator callbacks
struct Shared {
    state: Mutex<FlowState>,
    listener: Arc<dyn GateListener>,
}

impl Shared {
    fn step(&self) -> GateStep {
        lock(&self.state).step
    }

    fn error(&self) -> Option<FlowError> {
        lock(&self.state).error.clone()
    }

    fn set_step(&self, step: GateStep) {
        let changed = {
            let mut state = lock(&self.state);
            std::mem::replace(&mut state.step, step) != step
        };
        if changed {
            debug!(?step, "Gate step changed");
            self.listener.on_step(step);
        }
    }

    fn set_error(&self, error: Option<FlowError>) {
        let changed = {
            let mut state = lock(&self.state);
            if state.error == error {
                false
            } else {
                state.error = error.clone();
                true
            }
        };
        if changed {
            self.listener.on_error(error.as_ref());
        }
    }

    fn unlock(&self, session: Session) {
        self.set_error(None);
        self.set_step(GateStep::Unlocked);
        self.listener.on_unlocked(session);
    }
}

/// Clears the rate-limit error when the lockout runs out
struct LockoutExpiry {
    shared: Arc<Shared>,
}

impl TimerListener for LockoutExpiry {
    fn on_expired(&self, _name: &str) {
        let rate_limited = self
            .shared
            .error()
            .is_some_and(|e| e.kind == ErrorKind::RateLimited);
        if rate_limited {
            debug!("Lockout elapsed");
            self.shared.set_error(None);
        }
    }
}

/// Hands completed codes from the field to [`GateFlow::next_code`]
struct CodeForwarder {
    tx: mpsc::UnboundedSender<String>,
}

impl DigitInputListener for CodeForwarder {
    fn on_focus_advance(&self, _index: usize) {}

    fn on_complete(&self, code: &str) {
        let _ = self.tx.send(code.to_string());
    }
}

/// What to write locally once the device is trusted
enum AfterTrust {
    /// A record already exists
    MarkTrusted,
    /// First time on this device
    Enroll {
        pin: Zeroizing<String>,
        email: String,
        profile: ProfileFragment,
    },
}

struct FlowTrust {
    shared: Arc<Shared>,
    devices: Arc<dyn DeviceStore>,
    after: Mutex<Option<AfterTrust>>,
}

impl FlowTrust {
    fn record(&self) -> std::result::Result<(), CredentialError> {
        match lock(&self.after).take() {
            Some(AfterTrust::MarkTrusted) => self.devices.mark_trusted(),
            Some(AfterTrust::Enroll {
                pin,
                email,
                profile,
            }) => self.devices.record_device(&pin, &email, &profile, true),
            None => Ok(()),
        }
    }
}

impl TrustListener for FlowTrust {
    fn on_trusted(&self, session: Session) {
        if let Err(e) = self.record() {
            warn!("Device trusted but the local record was not updated: {}", e);
        }
        self.shared.unlock(session);
    }

    fn on_error(&self, message: &str) {
        self.shared
            .set_error(Some(FlowError::new(ErrorKind::Verification, message)));
    }
}

/// Drives the gate for the resolved [`AuthMode`]
pub struct GateFlow {
    mode: AuthMode,
    profile: Option<ProfileFragment>,
    gate: Option<RemoteGateInfo>,
    account: Option<(String, ProfileFragment)>,
    config: GateConfig,
    services: GateServices,
    shared: Arc<Shared>,
    input: DigitCodeInput,
    completed: mpsc::UnboundedReceiver<String>,
    lockout: CountdownTimer,
    pending_pin: Option<Zeroizing<String>>,
    coordinator: Option<DeviceTrustCoordinator>,
}

impl GateFlow {
    pub fn new(
        resolution: ModeResolution,
        config: GateConfig,
        services: GateServices,
        listener: Arc<dyn GateListener>,
    ) -> Self {
        let step = match resolution.mode {
            AuthMode::OfflineNoSetup => GateStep::Offline,
            _ => GateStep::EnterPin,
        };
        let shared = Arc::new(Shared {
            state: Mutex::new(FlowState { step, error: None }),
            listener,
        });

        let code_length = match &resolution.gate {
            Some(gate) if resolution.mode == AuthMode::LinkDevice => {
                link_code_length(gate, config.code_length)
            }
            _ => config.code_length,
        };
        let (tx, completed) = mpsc::unbounded_channel();
        let input = DigitCodeInput::with_delay(
            code_length,
            config.completion_delay(),
            Arc::new(CodeForwarder { tx }),
        );

        let lockout = CountdownTimer::with_listener(
            "lockout",
            Arc::new(LockoutExpiry {
                shared: Arc::clone(&shared),
            }),
        );

        info!(mode = ?resolution.mode, "Gate ready");

        Self {
            mode: resolution.mode,
            profile: resolution.profile,
            gate: resolution.gate,
            account: None,
            config,
            services,
            shared,
            input,
            completed,
            lockout,
            pending_pin: None,
            coordinator: None,
        }
    }

    /// Account to create when in [`AuthMode::Setup`]
    pub fn with_account(mut self, email: impl Into<String>, profile: ProfileFragment) -> Self {
        self.profile = Some(profile.clone());
        self.account = Some((email.into(), profile));
        self
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    pub fn step(&self) -> GateStep {
        self.shared.step()
    }

    /// Digits in the code field
    pub fn code_length(&self) -> usize {
        self.input.digits().len()
    }

    /// Name to greet the user with
    pub fn greeting(&self) -> Option<String> {
        self.profile
            .as_ref()
            .map(ProfileFragment::display_name)
            .filter(|name| !name.is_empty())
    }

    /// Masked email shown while awaiting confirmation
    pub fn masked_email(&self) -> Option<String> {
        self.coordinator.as_ref().and_then(|c| c.masked_email())
    }

    pub fn error(&self) -> Option<FlowError> {
        self.shared.error()
    }

    /// Error message with the lockout countdown appended while it runs
    pub fn error_text(&self) -> Option<String> {
        let error = self.shared.error()?;
        if error.kind == ErrorKind::RateLimited && self.lockout.is_running() {
            Some(format!("{} ({}s)", error.message, self.lockout.remaining()))
        } else {
            Some(error.message)
        }
    }

    /// Hide the inline error; a running lockout keeps input disabled
    pub fn dismiss_error(&self) {
        self.shared.set_error(None);
    }

    /// Seconds left on the lockout
    pub fn lockout_remaining(&self) -> u64 {
        self.lockout.remaining()
    }

    /// Whether code entry is accepted right now
    pub fn input_enabled(&self) -> bool {
        !self.lockout.is_running()
            && matches!(self.step(), GateStep::EnterPin | GateStep::ConfirmPin)
    }

    /// Read-only view of the code field
    pub fn input(&self) -> &DigitCodeInput {
        &self.input
    }

    /// The code field, while it accepts input
    pub fn input_mut(&mut self) -> Option<&mut DigitCodeInput> {
        if self.input_enabled() {
            Some(&mut self.input)
        } else {
            None
        }
    }

    /// Wait for the code field to complete
    pub async fn next_code(&mut self) -> Option<String> {
        self.completed.recv().await
    }

    /// Wait for the code field to complete, then submit it
    pub async fn submit_next(&mut self) -> Option<Result<GateStep>> {
        let code = Zeroizing::new(self.next_code().await?);
        Some(self.submit(&code).await)
    }

    /// Submit a complete code for the current mode
    pub async fn submit(&mut self, code: &str) -> Result<GateStep> {
        if self.lockout.is_running() {
            return Err(GateError::LockedOut(self.lockout.remaining()));
        }

        if self.mode == AuthMode::OfflineNoSetup {
            self.shared
                .set_error(Some(FlowError::new(ErrorKind::NetworkFailure, OFFLINE_MESSAGE)));
            return Err(GateError::NotAvailable(OFFLINE_MESSAGE.into()));
        }

        let step = self.step();
        if !matches!(step, GateStep::EnterPin | GateStep::ConfirmPin) {
            return Err(GateError::NotAvailable(format!("No code expected in {:?}", step)));
        }

        let expected = self.code_length();
        if code.is_empty()
            || code.chars().count() != expected
            || !code.chars().all(|c| c.is_ascii_digit())
        {
            self.shared.set_error(Some(FlowError::new(
                ErrorKind::Validation,
                format!("Enter all {} digits", expected),
            )));
            return Err(GateError::InvalidCodeLength { expected });
        }

        self.shared.set_error(None);

        match self.mode {
            AuthMode::Unlock => self.submit_unlock(code).await?,
            AuthMode::LinkDevice => self.submit_link(code).await?,
            AuthMode::Setup => self.submit_setup(code).await?,
            AuthMode::OfflineNoSetup => {}
        }

        Ok(self.step())
    }

    /// Resend the confirmation email
    pub fn resend(&self) -> Result<()> {
        let coordinator = self
            .coordinator
            .as_ref()
            .ok_or_else(|| GateError::NotAvailable("Not awaiting verification".into()))?;
        coordinator.resend()?;
        Ok(())
    }

    /// Seconds until the confirmation email may be resent
    pub fn resend_available_in(&self) -> u64 {
        self.coordinator
            .as_ref()
            .map_or(0, DeviceTrustCoordinator::resend_available_in)
    }

    /// Stop timers and any device-trust tasks
    pub fn teardown(&mut self) {
        self.lockout.stop();
        self.input.clear();
        if let Some(coordinator) = self.coordinator.take() {
            coordinator.teardown();
        }
    }

    async fn submit_unlock(&mut self, code: &str) -> Result<()> {
        match self.services.pin_verifier.verify_pin(code).await {
            Ok(outcome) => {
                let email = self.services.devices.account_email();
                self.handle_outcome(outcome, email, AfterTrust::MarkTrusted)
            }
            Err(e) => {
                self.provider_failure(e);
                Ok(())
            }
        }
    }

    async fn submit_link(&mut self, code: &str) -> Result<()> {
        let Some(gate) = self.gate.clone() else {
            return Err(GateError::NotAvailable("No remote account to link".into()));
        };

        match self
            .services
            .identity
            .submit_link_device_code(&gate.email, code)
            .await
        {
            Ok(VerificationOutcome::Success(session)) => {
                let written = self
                    .services
                    .devices
                    .record_device(code, &gate.email, &gate.profile, true);
                if let Err(e) = written {
                    warn!("Device linked but the local record was not written: {}", e);
                }
                self.input.clear();
                self.shared.unlock(session);
                Ok(())
            }
            Ok(outcome) => {
                let after = AfterTrust::Enroll {
                    pin: Zeroizing::new(code.to_string()),
                    email: gate.email.clone(),
                    profile: gate.profile.clone(),
                };
                self.handle_outcome(outcome, Some(gate.email), after)
            }
            Err(e) => {
                self.provider_failure(e);
                Ok(())
            }
        }
    }

    async fn submit_setup(&mut self, code: &str) -> Result<()> {
        let Some((email, profile)) = self.account.clone() else {
            return Err(GateError::NotAvailable("Account email required for setup".into()));
        };

        let Some(pin) = self.pending_pin.take() else {
            self.pending_pin = Some(Zeroizing::new(code.to_string()));
            self.input.clear();
            self.shared.set_step(GateStep::ConfirmPin);
            return Ok(());
        };

        if pin.as_str() != code {
            self.mismatch(&CredentialError::PinMismatch.to_string());
            self.shared.set_step(GateStep::EnterPin);
            return Ok(());
        }

        let outcome = self
            .services
            .identity
            .submit_setup_code(&pin, &profile, &email)
            .await;

        match outcome {
            Ok(SetupOutcome::Created) => {
                let written = self.services.devices.record_device(&pin, &email, &profile, true);
                if let Err(e) = written {
                    warn!("Account created but the local record was not written: {}", e);
                }
                let mut session = Session::new(email, self.config.session_config());
                if let Some(name) = self.greeting() {
                    session = session.with_display_name(name);
                }
                self.input.clear();
                self.shared.unlock(session);
                Ok(())
            }
            Ok(SetupOutcome::ConfirmationRequired) => {
                let written = self.services.devices.record_device(&pin, &email, &profile, false);
                let after = match written {
                    Ok(()) => AfterTrust::MarkTrusted,
                    Err(e) => {
                        warn!("Local record not written, retrying once trusted: {}", e);
                        AfterTrust::Enroll {
                            pin: pin.clone(),
                            email: email.clone(),
                            profile: profile.clone(),
                        }
                    }
                };
                let masked = mask_email(&email);
                self.begin_trust(&email, &masked, after)
            }
            Ok(SetupOutcome::Failed(message)) => {
                self.provider_failure(ProviderError::Rejected(message));
                self.shared.set_step(GateStep::EnterPin);
                Ok(())
            }
            Err(e) => {
                self.provider_failure(e);
                self.shared.set_step(GateStep::EnterPin);
                Ok(())
            }
        }
    }

    fn handle_outcome(
        &mut self,
        outcome: VerificationOutcome,
        email: Option<String>,
        after: AfterTrust,
    ) -> Result<()> {
        match outcome {
            VerificationOutcome::Success(session) => {
                self.input.clear();
                self.shared.unlock(session);
                Ok(())
            }
            VerificationOutcome::Failure {
                message,
                retry_after_ms: Some(ms),
            } => {
                self.start_lockout(ms, message);
                Ok(())
            }
            VerificationOutcome::Failure { message, .. } => {
                self.mismatch(&message);
                Ok(())
            }
            VerificationOutcome::SecondFactorRequired { masked_email } => {
                let Some(email) = email else {
                    warn!("Second factor requested without a known account email");
                    let error = CredentialError::NotEnrolled;
                    self.input.clear();
                    self.shared.set_error(Some(FlowError::new(
                        ErrorKind::Verification,
                        error.to_string(),
                    )));
                    return Err(error.into());
                };
                self.begin_trust(&email, &masked_email, after)
            }
        }
    }

    fn begin_trust(&mut self, email: &str, masked_email: &str, after: AfterTrust) -> Result<()> {
        let trust = Arc::new(FlowTrust {
            shared: Arc::clone(&self.shared),
            devices: Arc::clone(&self.services.devices),
            after: Mutex::new(Some(after)),
        });

        let coordinator = DeviceTrustCoordinator::with_broadcast(
            Arc::clone(&self.services.identity),
            trust,
            self.config.coordinator_config(),
            self.services.hub.clone(),
            self.services.focus.clone(),
        );

        self.input.clear();
        self.shared.set_step(GateStep::AwaitingVerification);
        coordinator.begin(email, Some(masked_email))?;

        if let Some(previous) = self.coordinator.replace(coordinator) {
            previous.teardown();
        }
        Ok(())
    }

    fn start_lockout(&mut self, retry_after_ms: u64, message: String) {
        let secs = ceil_secs(retry_after_ms);
        info!(secs, "Code entry locked");

        self.input.clear();
        self.lockout.start(secs);
        self.shared
            .set_error(Some(FlowError::new(ErrorKind::RateLimited, message)));
    }

    fn mismatch(&mut self, message: &str) {
        self.input.clear();
        self.shared
            .set_error(Some(FlowError::new(ErrorKind::CredentialMismatch, message)));
        self.shared.listener.on_shake();
    }

    fn provider_failure(&mut self, error: ProviderError) {
        match &error {
            ProviderError::RateLimited { retry_after_ms } => {
                self.start_lockout(*retry_after_ms, error.user_message());
            }
            ProviderError::Rejected(message) => self.mismatch(message),
            ProviderError::Network(_) | ProviderError::Unavailable => {
                warn!("Code submission failed: {}", error);
                self.input.clear();
                self.shared.set_error(Some(FlowError::new(
                    ErrorKind::NetworkFailure,
                    error.user_message(),
                )));
            }
        }
    }
}

/// Remote link-code length, or `fallback` when the device record could not
/// store a PIN of that length
fn link_code_length(gate: &RemoteGateInfo, fallback: usize) -> usize {
    if (MIN_PIN_LENGTH..=MAX_PIN_LENGTH).contains(&gate.code_length) {
        gate.code_length
    } else {
        warn!(
            remote = gate.code_length,
            fallback, "Remote code length out of range, using the configured length"
        );
        fallback
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
