//! Device record persistence and offline PIN checks
//!
//! The record is the proof that this device was set up before: it holds the
//! Argon2id PIN hash, the account email, a cached profile for greetings and
//! the failed-attempt counter.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::{CredentialError, LockoutPolicy};
use crate::error::ProviderError;
use crate::provider::{mask_email, DeviceStore, PinVerifier, ProfileFragment, VerificationOutcome};
use crate::session::{Session, SessionConfig};

/// Minimum PIN length
pub const MIN_PIN_LENGTH: usize = 4;
/// Maximum PIN length
pub const MAX_PIN_LENGTH: usize = 12;

const RECORD_VERSION: u32 = 1;

/// Device record format (persisted to disk)
#[derive(Clone, Serialize, Deserialize)]
struct DeviceRecord {
    /// Argon2id hash of the PIN
    hash: String,
    /// Account email
    email: String,
    /// Cached greeting fragment
    #[serde(default)]
    profile: ProfileFragment,
    /// Whether the second factor has been completed on this device
    trusted: bool,
    /// Number of failed attempts
    failed_attempts: u32,
    /// Timestamp of last failed attempt (Unix epoch milliseconds)
    last_failed_attempt_ms: Option<i64>,
    /// Timestamp of enrollment (Unix epoch seconds)
    enrolled_at: i64,
    /// Version for future migrations
    version: u32,
}

/// File-backed device record with offline PIN verification
pub struct LocalCredentialStore {
    path: PathBuf,
    policy: LockoutPolicy,
    session_config: SessionConfig,
    record: Mutex<Option<DeviceRecord>>,
}

impl LocalCredentialStore {
    /// Open the store at `path`, loading an existing record if present
    pub fn open(
        path: impl Into<PathBuf>,
        policy: LockoutPolicy,
        session_config: SessionConfig,
    ) -> Result<Self, CredentialError> {
        let path = path.into();

        let record = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            let record: DeviceRecord = serde_json::from_str(&contents).map_err(|e| {
                CredentialError::StorageError(format!("Failed to parse device record: {}", e))
            })?;
            debug!("Loaded device record from {:?}", path);
            Some(record)
        } else {
            None
        };

        Ok(Self {
            path,
            policy,
            session_config,
            record: Mutex::new(record),
        })
    }

    /// Location of the device record
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the record exists and the second factor was completed
    pub fn is_trusted(&self) -> bool {
        self.lock()
            .map(|record| record.as_ref().is_some_and(|r| r.trusted))
            .unwrap_or(false)
    }

    /// Consecutive wrong PINs since the last success
    pub fn failed_attempts(&self) -> u32 {
        self.lock()
            .map(|record| record.as_ref().map_or(0, |r| r.failed_attempts))
            .unwrap_or(0)
    }

    /// Time left on the current lockout, if any
    pub fn lockout_remaining(&self) -> Option<Duration> {
        let record = self.lock().ok()?;
        record
            .as_ref()
            .and_then(|r| lockout_remaining(&self.policy, r))
    }

    /// Write a fresh device record
    pub fn enroll(
        &self,
        pin: &str,
        email: &str,
        profile: &ProfileFragment,
        trusted: bool,
    ) -> Result<(), CredentialError> {
        validate_pin(pin)?;

        let salt = SaltString::generate(&mut OsRng);
        let pin_bytes = Zeroizing::new(pin.as_bytes().to_vec());
        let hash = Argon2::default()
            .hash_password(&pin_bytes, &salt)
            .map_err(|e| CredentialError::CryptoError(format!("Failed to hash PIN: {}", e)))?
            .to_string();

        let record = DeviceRecord {
            hash,
            email: email.to_string(),
            profile: profile.clone(),
            trusted,
            failed_attempts: 0,
            last_failed_attempt_ms: None,
            enrolled_at: Utc::now().timestamp(),
            version: RECORD_VERSION,
        };

        self.save(&record)?;
        *self.lock()? = Some(record);

        info!(email = %mask_email(email), trusted, "Device enrolled");
        Ok(())
    }

    /// Check `pin` against the stored hash
    ///
    /// Attempts during an active lockout are refused without checking the hash.
    pub fn verify(&self, pin: &str) -> Result<VerificationOutcome, CredentialError> {
        let mut guard = self.lock()?;
        let record = guard.as_mut().ok_or(CredentialError::NotEnrolled)?;

        if let Some(remaining) = lockout_remaining(&self.policy, record) {
            debug!("PIN attempt during lockout");
            return Ok(VerificationOutcome::Failure {
                message: format!(
                    "Too many attempts - try again in {}",
                    LockoutPolicy::describe(remaining)
                ),
                retry_after_ms: Some(duration_ms(remaining)),
            });
        }

        let parsed_hash = PasswordHash::new(&record.hash)
            .map_err(|e| CredentialError::CryptoError(format!("Invalid stored hash: {}", e)))?;
        let pin_bytes = Zeroizing::new(pin.as_bytes().to_vec());
        let is_correct = Argon2::default()
            .verify_password(&pin_bytes, &parsed_hash)
            .is_ok();

        if is_correct {
            record.failed_attempts = 0;
            record.last_failed_attempt_ms = None;
            self.save(record)?;

            if !record.trusted {
                info!("PIN accepted, device trust still pending");
                return Ok(VerificationOutcome::SecondFactorRequired {
                    masked_email: mask_email(&record.email),
                });
            }

            let mut session = Session::new(record.email.clone(), self.session_config.clone());
            let name = record.profile.display_name();
            if !name.is_empty() {
                session = session.with_display_name(name);
            }
            info!("Unlocked with local PIN");
            return Ok(VerificationOutcome::Success(session));
        }

        record.failed_attempts += 1;
        record.last_failed_attempt_ms = Some(Utc::now().timestamp_millis());
        self.save(record)?;

        warn!(failed_attempts = record.failed_attempts, "Incorrect PIN");

        let outcome = match self.policy.lockout_duration(record.failed_attempts) {
            Some(duration) => VerificationOutcome::Failure {
                message: format!(
                    "Incorrect PIN - locked for {}",
                    LockoutPolicy::describe(duration)
                ),
                retry_after_ms: Some(duration_ms(duration)),
            },
            None => VerificationOutcome::Failure {
                message: format!(
                    "Incorrect PIN ({} attempts remaining)",
                    self.policy.attempts_before_lockout(record.failed_attempts)
                ),
                retry_after_ms: None,
            },
        };
        Ok(outcome)
    }

    /// Mark the record trusted after the second factor completes
    pub fn set_trusted(&self) -> Result<(), CredentialError> {
        let mut guard = self.lock()?;
        let record = guard.as_mut().ok_or(CredentialError::NotEnrolled)?;
        record.trusted = true;
        self.save(record)
    }

    /// Remove the device record
    ///
    /// The next load resolves to Setup or Link-Device again.
    pub fn factory_reset(&self) -> Result<(), CredentialError> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        *self.lock()? = None;
        info!("Device record removed");
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<DeviceRecord>>, CredentialError> {
        self.record
            .lock()
            .map_err(|_| CredentialError::StorageError("Device record lock poisoned".into()))
    }

    /// Save the record to file
    fn save(&self, record: &DeviceRecord) -> Result<(), CredentialError> {
        let contents = serde_json::to_string_pretty(record)
            .map_err(|e| CredentialError::StorageError(format!("Failed to serialize: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write atomically
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, &contents)?;
        fs::rename(&temp_path, &self.path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }
}

fn validate_pin(pin: &str) -> Result<(), CredentialError> {
    if pin.len() < MIN_PIN_LENGTH || pin.len() > MAX_PIN_LENGTH {
        return Err(CredentialError::InvalidPinLength(MIN_PIN_LENGTH, MAX_PIN_LENGTH));
    }

    if !pin.chars().all(|c| c.is_ascii_digit()) {
        return Err(CredentialError::InvalidPinFormat);
    }

    Ok(())
}

fn lockout_remaining(policy: &LockoutPolicy, record: &DeviceRecord) -> Option<Duration> {
    policy.remaining(
        record.failed_attempts,
        record.last_failed_attempt_ms?,
        Utc::now().timestamp_millis(),
    )
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl PinVerifier for LocalCredentialStore {
    async fn verify_pin(&self, code: &str) -> Result<VerificationOutcome, ProviderError> {
        self.verify(code)
            .map_err(|e| ProviderError::Rejected(e.to_string()))
    }
}

impl DeviceStore for LocalCredentialStore {
    fn has_device_record(&self) -> bool {
        self.lock().map(|record| record.is_some()).unwrap_or(false)
    }

    fn cached_profile(&self) -> Option<ProfileFragment> {
        self.lock().ok()?.as_ref().map(|r| r.profile.clone())
    }

    fn account_email(&self) -> Option<String> {
        self.lock().ok()?.as_ref().map(|r| r.email.clone())
    }

    fn record_device(
        &self,
        pin: &str,
        email: &str,
        profile: &ProfileFragment,
        trusted: bool,
    ) -> Result<(), CredentialError> {
        self.enroll(pin, email, profile, trusted)
    }

    fn mark_trusted(&self) -> Result<(), CredentialError> {
        self.set_trusted()
    }
}
