//! Error types for the Notegate core

use thiserror::Error;

/// Result type alias for gate operations
pub type Result<T> = std::result::Result<T, GateError>;

/// Errors that can occur while driving an unlock or device-trust flow
#[derive(Debug, Error)]
pub enum GateError {
    /// Local credential store error
    #[error("Credential error: {0}")]
    Credential(#[from] crate::credential::CredentialError),

    /// External collaborator failure
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Device trust coordinator rejected the request
    #[error("Coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Entered code has the wrong shape
    #[error("Code must be {expected} digits")]
    InvalidCodeLength { expected: usize },

    /// The requested action is not valid in the current mode
    #[error("Action not available: {0}")]
    NotAvailable(String),

    /// Input is disabled while a lockout is running
    #[error("Too many attempts - try again in {0} seconds")]
    LockedOut(u64),
}

/// Failures reported by an external collaborator (identity provider,
/// email sender, trust-status endpoint)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Transport failed or the backend could not be reached
    #[error("Network error: {0}")]
    Network(String),

    /// The backend understood the request and refused it
    #[error("{0}")]
    Rejected(String),

    /// The backend is throttling this client
    #[error("Rate limited for {retry_after_ms} ms")]
    RateLimited { retry_after_ms: u64 },

    /// The collaborator is not present in this environment
    #[error("Provider unavailable")]
    Unavailable,
}

impl ProviderError {
    /// Message suitable for the inline error field
    pub fn user_message(&self) -> String {
        match self {
            ProviderError::Network(_) | ProviderError::Unavailable => {
                "Something went wrong. Check your connection and try again.".to_string()
            }
            ProviderError::Rejected(message) => message.clone(),
            ProviderError::RateLimited { retry_after_ms } => {
                format!(
                    "Too many attempts - try again in {} seconds",
                    crate::timer::ceil_secs(*retry_after_ms)
                )
            }
        }
    }
}

/// Errors returned by the device trust coordinator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    /// The coordinator is not waiting for an email confirmation
    #[error("Not awaiting verification")]
    NotAwaiting,

    /// Resend requested before the cooldown elapsed
    #[error("Resend available in {0} seconds")]
    CooldownActive(u64),

    /// Verification was already started for this coordinator
    #[error("Verification already started")]
    AlreadyStarted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_message_rounds_up() {
        let err = ProviderError::RateLimited { retry_after_ms: 14_001 };
        assert_eq!(err.user_message(), "Too many attempts - try again in 15 seconds");
    }

    #[test]
    fn test_network_message_is_generic() {
        let err = ProviderError::Network("connection reset by peer".into());
        assert!(!err.user_message().contains("reset"));
    }
}
