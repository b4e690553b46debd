//! In-memory collaborators for tests
//!
//! Every mock records how it was called so tests can assert on network usage.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::channel::WindowFocus;
use crate::coordinator::{TrustListener, TrustState};
use crate::credential::CredentialError;
use crate::error::ProviderError;
use crate::provider::{
    mask_email, DeviceStore, IdentityProvider, PinVerifier, ProfileFragment, RemoteGateInfo,
    SetupOutcome, VerificationOutcome,
};
use crate::session::{Session, SessionConfig};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A device record as written through [`DeviceStore::record_device`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedDevice {
    pub pin: String,
    pub email: String,
    pub profile: ProfileFragment,
    pub trusted: bool,
}

/// Device store held in memory
#[derive(Debug, Default)]
pub struct MockDevices {
    record: Mutex<Option<RecordedDevice>>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MockDevices {
    /// A store that already holds a trusted record
    pub fn enrolled(profile: ProfileFragment) -> Self {
        Self {
            record: Mutex::new(Some(RecordedDevice {
                pin: "000000".into(),
                email: "ada@example.com".into(),
                profile,
                trusted: true,
            })),
            writes: AtomicUsize::new(0),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every following write fail with a storage error
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Current record
    pub fn record(&self) -> Option<RecordedDevice> {
        lock(&self.record).clone()
    }

    /// Number of `record_device` calls
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl DeviceStore for MockDevices {
    fn has_device_record(&self) -> bool {
        lock(&self.record).is_some()
    }

    fn cached_profile(&self) -> Option<ProfileFragment> {
        lock(&self.record).as_ref().map(|r| r.profile.clone())
    }

    fn account_email(&self) -> Option<String> {
        lock(&self.record).as_ref().map(|r| r.email.clone())
    }

    fn record_device(
        &self,
        pin: &str,
        email: &str,
        profile: &ProfileFragment,
        trusted: bool,
    ) -> Result<(), CredentialError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CredentialError::StorageError("disk full".into()));
        }
        *lock(&self.record) = Some(RecordedDevice {
            pin: pin.to_string(),
            email: email.to_string(),
            profile: profile.clone(),
            trusted,
        });
        Ok(())
    }

    fn mark_trusted(&self) -> Result<(), CredentialError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CredentialError::StorageError("disk full".into()));
        }
        let mut record = lock(&self.record);
        let record = record.as_mut().ok_or(CredentialError::NotEnrolled)?;
        record.trusted = true;
        Ok(())
    }
}

/// Scripted PIN verifier
///
/// Returns queued outcomes in order, then "Incorrect PIN" once the queue is
/// empty.
#[derive(Debug, Default)]
pub struct MockPinVerifier {
    outcomes: Mutex<VecDeque<Result<VerificationOutcome, ProviderError>>>,
    codes: Mutex<Vec<String>>,
}

impl MockPinVerifier {
    pub fn push(&self, outcome: Result<VerificationOutcome, ProviderError>) {
        lock(&self.outcomes).push_back(outcome);
    }

    /// Codes submitted so far
    pub fn codes(&self) -> Vec<String> {
        lock(&self.codes).clone()
    }
}

#[async_trait]
impl PinVerifier for MockPinVerifier {
    async fn verify_pin(&self, code: &str) -> Result<VerificationOutcome, ProviderError> {
        lock(&self.codes).push(code.to_string());
        lock(&self.outcomes).pop_front().unwrap_or_else(|| {
            Ok(VerificationOutcome::Failure {
                message: "Incorrect PIN".into(),
                retry_after_ms: None,
            })
        })
    }
}

/// Scripted identity provider
pub struct MockIdentity {
    gate_info: Mutex<Result<Option<RemoteGateInfo>, ProviderError>>,
    setup_outcome: Mutex<Result<SetupOutcome, ProviderError>>,
    setup_requests: Mutex<Vec<(String, ProfileFragment, String)>>,
    link_outcomes: Mutex<VecDeque<Result<VerificationOutcome, ProviderError>>>,
    link_requests: Mutex<Vec<(String, String)>>,
    emails: Mutex<Vec<String>>,
    trusted: AtomicBool,
    finalize_results: Mutex<VecDeque<Result<(), ProviderError>>>,
    finalize_delay: Mutex<Option<Duration>>,
    gate_info_calls: AtomicUsize,
    poll_calls: AtomicUsize,
    finalize_calls: AtomicUsize,
}

impl Default for MockIdentity {
    fn default() -> Self {
        Self {
            gate_info: Mutex::new(Ok(None)),
            setup_outcome: Mutex::new(Ok(SetupOutcome::Created)),
            setup_requests: Mutex::new(Vec::new()),
            link_outcomes: Mutex::new(VecDeque::new()),
            link_requests: Mutex::new(Vec::new()),
            emails: Mutex::new(Vec::new()),
            trusted: AtomicBool::new(false),
            finalize_results: Mutex::new(VecDeque::new()),
            finalize_delay: Mutex::new(None),
            gate_info_calls: AtomicUsize::new(0),
            poll_calls: AtomicUsize::new(0),
            finalize_calls: AtomicUsize::new(0),
        }
    }
}

impl MockIdentity {
    pub fn set_gate_info(&self, info: Result<Option<RemoteGateInfo>, ProviderError>) {
        *lock(&self.gate_info) = info;
    }

    pub fn set_setup_outcome(&self, outcome: Result<SetupOutcome, ProviderError>) {
        *lock(&self.setup_outcome) = outcome;
    }

    /// Queue a link-device result; when empty the code is accepted and the
    /// second factor requested
    pub fn push_link_outcome(&self, outcome: Result<VerificationOutcome, ProviderError>) {
        lock(&self.link_outcomes).push_back(outcome);
    }

    /// Answer for the next trust polls
    pub fn set_trusted(&self, trusted: bool) {
        self.trusted.store(trusted, Ordering::SeqCst);
    }

    /// Queue a finalize result; when empty finalize succeeds
    pub fn push_finalize_result(&self, result: Result<(), ProviderError>) {
        lock(&self.finalize_results).push_back(result);
    }

    /// Make finalize take `delay` of tokio time
    pub fn set_finalize_delay(&self, delay: Duration) {
        *lock(&self.finalize_delay) = Some(delay);
    }

    pub fn gate_info_calls(&self) -> usize {
        self.gate_info_calls.load(Ordering::SeqCst)
    }

    pub fn poll_calls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }

    pub fn finalize_calls(&self) -> usize {
        self.finalize_calls.load(Ordering::SeqCst)
    }

    /// Addresses a confirmation email was sent to
    pub fn emails_sent(&self) -> Vec<String> {
        lock(&self.emails).clone()
    }

    /// `(code, profile, email)` for every setup submission
    pub fn setup_requests(&self) -> Vec<(String, ProfileFragment, String)> {
        lock(&self.setup_requests).clone()
    }

    /// `(email, code)` for every link-device submission
    pub fn link_requests(&self) -> Vec<(String, String)> {
        lock(&self.link_requests).clone()
    }

    /// Every call that would have reached the network
    pub fn total_calls(&self) -> usize {
        self.gate_info_calls()
            + self.poll_calls()
            + self.finalize_calls()
            + lock(&self.emails).len()
            + lock(&self.setup_requests).len()
            + lock(&self.link_requests).len()
    }
}

#[async_trait]
impl IdentityProvider for MockIdentity {
    async fn submit_setup_code(
        &self,
        code: &str,
        profile: &ProfileFragment,
        email: &str,
    ) -> Result<SetupOutcome, ProviderError> {
        lock(&self.setup_requests).push((code.to_string(), profile.clone(), email.to_string()));
        lock(&self.setup_outcome).clone()
    }

    async fn submit_link_device_code(
        &self,
        email: &str,
        code: &str,
    ) -> Result<VerificationOutcome, ProviderError> {
        lock(&self.link_requests).push((email.to_string(), code.to_string()));
        lock(&self.link_outcomes).pop_front().unwrap_or_else(|| {
            Ok(VerificationOutcome::SecondFactorRequired {
                masked_email: mask_email(email),
            })
        })
    }

    async fn send_verification_email(&self, email: &str) -> Result<(), ProviderError> {
        lock(&self.emails).push(email.to_string());
        Ok(())
    }

    async fn is_device_trusted(&self) -> Result<bool, ProviderError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.trusted.load(Ordering::SeqCst))
    }

    async fn finalize_device_trust(&self) -> Result<Session, ProviderError> {
        self.finalize_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *lock(&self.finalize_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let result = lock(&self.finalize_results).pop_front().unwrap_or(Ok(()));
        result.map(|()| Session::new("acct-1", SessionConfig::default()))
    }

    async fn fetch_remote_gate_info(&self) -> Result<Option<RemoteGateInfo>, ProviderError> {
        self.gate_info_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.gate_info).clone()
    }
}

/// Window focus that records requests
#[derive(Debug)]
pub struct MockFocus {
    honoured: bool,
    calls: AtomicUsize,
}

impl MockFocus {
    pub fn new(honoured: bool) -> Self {
        Self {
            honoured,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl WindowFocus for MockFocus {
    fn bring_to_front(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.honoured
    }
}

/// Trust listener that records every callback
#[derive(Debug, Default)]
pub struct RecordingTrustListener {
    states: Mutex<Vec<TrustState>>,
    trusted: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
}

impl RecordingTrustListener {
    pub fn states(&self) -> Vec<TrustState> {
        lock(&self.states).clone()
    }

    /// How many times `Completing` was entered
    pub fn completing_entries(&self) -> usize {
        lock(&self.states)
            .iter()
            .filter(|s| **s == TrustState::Completing)
            .count()
    }

    /// Account ids of the sessions handed up
    pub fn trusted_accounts(&self) -> Vec<String> {
        lock(&self.trusted).clone()
    }

    pub fn errors(&self) -> Vec<String> {
        lock(&self.errors).clone()
    }
}

impl TrustListener for RecordingTrustListener {
    fn on_state_change(&self, state: TrustState) {
        lock(&self.states).push(state);
    }

    fn on_trusted(&self, session: Session) {
        lock(&self.trusted).push(session.account_id().to_string());
    }

    fn on_error(&self, message: &str) {
        lock(&self.errors).push(message.to_string());
    }
}
