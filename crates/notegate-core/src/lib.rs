//! Notegate Core - PIN unlock and device trust for the Notegate client
//!
//! This crate provides:
//! - Fixed-length digit entry with paste and delayed completion
//! - Lockout and resend countdowns
//! - Mode resolution (setup, unlock, link device, offline)
//! - Device-trust coordination racing a poll loop against a cross-tab broadcast
//! - A local device record with Argon2id PIN hashing and progressive lockout
//!
//! # Optional Features
//!
//! - `mock` - In-memory collaborators for tests in dependent crates

pub mod channel;
pub mod config;
pub mod coordinator;
pub mod credential;
pub mod digit_input;
pub mod error;
pub mod flow;
pub mod mode;
pub mod provider;
pub mod session;
pub mod timer;

#[cfg(any(test, feature = "mock"))]
pub mod testing;

pub use channel::{AuthMessage, BroadcastHub, CrossTabChannel, WindowFocus, AUTH_CHANNEL};
pub use config::GateConfig;
pub use coordinator::{DeviceTrustCoordinator, TerminalReason, TrustListener, TrustState};
pub use credential::{CredentialError, LocalCredentialStore, LockoutPolicy};
pub use digit_input::{DigitArray, DigitCodeInput, DigitInputListener};
pub use error::{GateError, ProviderError, Result};
pub use flow::{GateFlow, GateListener, GateServices, GateStep};
pub use mode::{AuthMode, ModeResolution, ModeResolver};
pub use provider::{
    mask_email, Connectivity, DeviceStore, FixedConnectivity, IdentityProvider, PinVerifier,
    ProfileFragment, RemoteGateInfo, SetupOutcome, VerificationOutcome,
};
pub use session::{Session, SessionConfig};
pub use timer::CountdownTimer;
