//! Interfaces to the collaborators the gate depends on
//!
//! Credential hashing, email delivery and the backend transport live behind
//! these traits. The gate only orchestrates their results.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::credential::CredentialError;
use crate::error::ProviderError;
use crate::session::Session;

/// Name fragment used to greet the user
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileFragment {
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

impl ProfileFragment {
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
        }
    }

    /// "First Last", or just whichever part is present
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }
}

/// An existing remote account found while resolving the mode
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteGateInfo {
    /// Registered email, possibly already masked by the backend
    pub email: String,
    /// Digits expected by the link-device code field
    pub code_length: usize,
    /// Greeting fragment
    #[serde(default)]
    pub profile: ProfileFragment,
}

impl RemoteGateInfo {
    /// Email as it should be shown on screen
    pub fn display_email(&self) -> String {
        mask_email(&self.email)
    }
}

/// Result of submitting a PIN
#[derive(Debug)]
pub enum VerificationOutcome {
    /// The PIN was accepted
    Success(Session),
    /// The PIN was refused; `retry_after_ms` is an authoritative lockout
    Failure {
        message: String,
        retry_after_ms: Option<u64>,
    },
    /// The PIN was accepted but this device must prove control of the email
    SecondFactorRequired { masked_email: String },
}

/// Result of submitting a new account's code
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SetupOutcome {
    /// Account created for this device
    Created,
    /// Account created; the email address must be confirmed first
    ConfirmationRequired,
    /// Backend refused the setup
    Failed(String),
}

/// Local PIN check, available offline
#[async_trait]
pub trait PinVerifier: Send + Sync {
    async fn verify_pin(&self, code: &str) -> Result<VerificationOutcome, ProviderError>;
}

/// Local record proving this device was set up before
pub trait DeviceStore: Send + Sync {
    /// Whether a device record exists
    fn has_device_record(&self) -> bool;

    /// Cached greeting fragment from the device record
    fn cached_profile(&self) -> Option<ProfileFragment>;

    /// Email of the account this device belongs to
    fn account_email(&self) -> Option<String>;

    /// Store the device record after a successful setup or link
    fn record_device(
        &self,
        pin: &str,
        email: &str,
        profile: &ProfileFragment,
        trusted: bool,
    ) -> Result<(), CredentialError>;

    /// Mark the device record as trusted once the second factor completes
    fn mark_trusted(&self) -> Result<(), CredentialError>;
}

/// Whether the network is reachable right now
pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Connectivity that never changes
#[derive(Clone, Copy, Debug)]
pub struct FixedConnectivity(pub bool);

impl Connectivity for FixedConnectivity {
    fn is_online(&self) -> bool {
        self.0
    }
}

/// Remote identity provider
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Create the account for a first device
    async fn submit_setup_code(
        &self,
        code: &str,
        profile: &ProfileFragment,
        email: &str,
    ) -> Result<SetupOutcome, ProviderError>;

    /// Prove the account PIN from a new device
    async fn submit_link_device_code(
        &self,
        email: &str,
        code: &str,
    ) -> Result<VerificationOutcome, ProviderError>;

    /// Trigger the confirmation email; de-duplicated by the backend
    async fn send_verification_email(&self, email: &str) -> Result<(), ProviderError>;

    /// Whether this device has been marked trusted since the email went out
    async fn is_device_trusted(&self) -> Result<bool, ProviderError>;

    /// Complete the trust handshake and obtain a session
    async fn finalize_device_trust(&self) -> Result<Session, ProviderError>;

    /// Look up an existing account for this user
    async fn fetch_remote_gate_info(&self) -> Result<Option<RemoteGateInfo>, ProviderError>;
}

/// Mask the local part of an email: `alice@example.com` → `a***e@example.com`
///
/// Already-masked addresses are returned unchanged.
pub fn mask_email(email: &str) -> String {
    let Some((local, domain)) = email.split_once('@') else {
        return email.to_string();
    };

    if local.contains('*') {
        return email.to_string();
    }

    let chars: Vec<char> = local.chars().collect();
    let masked = match chars.len() {
        0 => String::new(),
        1 | 2 => format!("{}***", chars[0]),
        n => format!("{}***{}", chars[0], chars[n - 1]),
    };

    format!("{}@{}", masked, domain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_email() {
        assert_eq!(mask_email("alice@example.com"), "a***e@example.com");
        assert_eq!(mask_email("al@example.com"), "a***@example.com");
        assert_eq!(mask_email("a***e@example.com"), "a***e@example.com");
        assert_eq!(mask_email("not-an-email"), "not-an-email");
    }

    #[test]
    fn test_display_name() {
        assert_eq!(ProfileFragment::new("Ada", "Lovelace").display_name(), "Ada Lovelace");
        assert_eq!(ProfileFragment::new("Ada", "").display_name(), "Ada");
    }

    #[test]
    fn test_gate_info_from_json() {
        let info: RemoteGateInfo = serde_json::from_str(
            r#"{"email":"ada@example.com","code_length":8,"profile":{"first_name":"Ada"}}"#,
        )
        .unwrap();
        assert_eq!(info.code_length, 8);
        assert_eq!(info.display_email(), "a***a@example.com");
        assert_eq!(info.profile.last_name, "");
    }
}
