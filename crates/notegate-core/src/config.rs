//! Gate configuration
//!
//! Stored as JSON. The file location is `$NOTEGATE_CONFIG` when set, otherwise
//! `config.json` under the XDG config directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::channel::AUTH_CHANNEL;
use crate::coordinator::{CoordinatorConfig, POLL_INTERVAL, RESEND_COOLDOWN_SECS};
use crate::credential::{LockoutPolicy, MAX_PIN_LENGTH, MIN_PIN_LENGTH};
use crate::digit_input::{COMPLETION_DELAY, DEFAULT_CODE_LENGTH};
use crate::session::SessionConfig;

/// Environment variable overriding the config file location
pub const CONFIG_ENV_VAR: &str = "NOTEGATE_CONFIG";

const CONFIG_FILE_NAME: &str = "config.json";
const APP_DIR_NAME: &str = "notegate";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Failed to serialize config: {0}")]
    Serialize(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Session timeouts in seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    pub idle_timeout_secs: u64,
    pub max_duration_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let defaults = SessionConfig::default();
        Self {
            idle_timeout_secs: defaults.idle_timeout.as_secs(),
            max_duration_secs: defaults.max_duration.as_secs(),
        }
    }
}

/// Gate configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Digits in a PIN
    pub code_length: usize,

    /// Pause after the last digit before the code is submitted (milliseconds)
    pub completion_delay_ms: u64,

    /// Device-trust poll interval (milliseconds)
    pub poll_interval_ms: u64,

    /// Seconds before the confirmation email may be resent
    pub resend_cooldown_secs: u64,

    /// Cross-tab channel for authentication events
    pub channel_name: String,

    /// Location of the local device record
    pub store_path: PathBuf,

    /// Local wrong-PIN lockout
    pub lockout: LockoutPolicy,

    /// Session timeouts
    pub session: SessionSettings,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            code_length: DEFAULT_CODE_LENGTH,
            completion_delay_ms: duration_ms(COMPLETION_DELAY),
            poll_interval_ms: duration_ms(POLL_INTERVAL),
            resend_cooldown_secs: RESEND_COOLDOWN_SECS,
            channel_name: AUTH_CHANNEL.to_string(),
            store_path: Self::default_store_path(),
            lockout: LockoutPolicy::default(),
            session: SessionSettings::default(),
        }
    }
}

impl GateConfig {
    fn default_store_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR_NAME)
            .join("device.json")
    }

    /// Configuration directory
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(APP_DIR_NAME))
    }

    /// Config file path, honouring `NOTEGATE_CONFIG`
    pub fn config_file_path() -> Option<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_ENV_VAR) {
            return Some(PathBuf::from(path));
        }
        Self::config_dir().map(|d| d.join(CONFIG_FILE_NAME))
    }

    /// Load configuration from `path`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Self =
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Load from the default location
    ///
    /// Falls back to defaults if the file is missing or unusable.
    pub fn load_or_default() -> Self {
        let Some(path) = Self::config_file_path() else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        Self::load(&path).unwrap_or_else(|e| {
            warn!("Ignoring config file {:?}: {}", path, e);
            Self::default()
        })
    }

    /// Save configuration to `path`
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;
        fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))?;

        debug!("Saved config to {:?}", path);
        Ok(())
    }

    /// Reject values the gate cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_PIN_LENGTH..=MAX_PIN_LENGTH).contains(&self.code_length) {
            return Err(ConfigError::Invalid(format!(
                "code_length must be {}-{}",
                MIN_PIN_LENGTH, MAX_PIN_LENGTH
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be positive".into()));
        }
        if self.channel_name.is_empty() {
            return Err(ConfigError::Invalid("channel_name must not be empty".into()));
        }
        Ok(())
    }

    pub fn completion_delay(&self) -> Duration {
        Duration::from_millis(self.completion_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            idle_timeout: Duration::from_secs(self.session.idle_timeout_secs),
            max_duration: Duration::from_secs(self.session.max_duration_secs),
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            poll_interval: self.poll_interval(),
            resend_cooldown_secs: self.resend_cooldown_secs,
            channel_name: self.channel_name.clone(),
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
