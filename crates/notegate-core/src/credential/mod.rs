//! Local device record and offline PIN verification
//!
//! # Security Model
//!
//! - PIN is hashed using Argon2id and never stored or logged in clear
//! - The device record is written atomically with owner-only permissions
//! - Progressive lockout protects against brute force, and survives restarts
//!   because it is computed from the persisted failure timestamp

mod lockout;
mod store;

pub use lockout::LockoutPolicy;
pub use store::{LocalCredentialStore, MAX_PIN_LENGTH, MIN_PIN_LENGTH};

/// Local credential errors
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("This device has not been set up")]
    NotEnrolled,

    #[error("PIN must be {0}-{1} digits")]
    InvalidPinLength(usize, usize),

    #[error("PIN must contain only digits")]
    InvalidPinFormat,

    #[error("PINs do not match")]
    PinMismatch,

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Crypto error: {0}")]
    CryptoError(String),
}

impl From<std::io::Error> for CredentialError {
    fn from(e: std::io::Error) -> Self {
        CredentialError::StorageError(e.to_string())
    }
}
