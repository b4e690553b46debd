//! Authenticated sessions handed to the rest of the client
//!
//! Sessions have idle and absolute timeouts. Any access token is kept in
//! memory only and zeroized on drop.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use zeroize::Zeroize;

/// Session configuration
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Idle timeout duration
    pub idle_timeout: Duration,
    /// Maximum session duration (absolute timeout)
    pub max_duration: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30 * 60),
            max_duration: Duration::from_secs(12 * 3600),
        }
    }
}

/// Session established by an unlock, link or trust handshake
pub struct Session {
    account_id: String,
    display_name: Option<String>,
    access_token: Option<String>,
    established_at: DateTime<Utc>,
    created_at: Instant,
    last_activity: Instant,
    config: SessionConfig,
}

impl Session {
    /// Create a new session
    pub fn new(account_id: impl Into<String>, config: SessionConfig) -> Self {
        let now = Instant::now();
        Self {
            account_id: account_id.into(),
            display_name: None,
            access_token: None,
            established_at: Utc::now(),
            created_at: now,
            last_activity: now,
            config,
        }
    }

    /// Attach a display name
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Attach a backend access token
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// Wall-clock time the session was established
    pub fn established_at(&self) -> DateTime<Utc> {
        self.established_at
    }

    /// Touch the session (update last activity time)
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Check if the session is still valid
    pub fn is_valid(&self) -> bool {
        let now = Instant::now();

        if now.duration_since(self.created_at) > self.config.max_duration {
            return false;
        }

        now.duration_since(self.last_activity) <= self.config.idle_timeout
    }

    /// Time until the session expires (minimum of idle and absolute timeout)
    pub fn time_until_expiry(&self) -> Duration {
        let now = Instant::now();

        let absolute_remaining = self
            .config
            .max_duration
            .saturating_sub(now.duration_since(self.created_at));

        let idle_remaining = self
            .config
            .idle_timeout
            .saturating_sub(now.duration_since(self.last_activity));

        absolute_remaining.min(idle_remaining)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("account_id", &self.account_id)
            .field("display_name", &self.display_name)
            .field("established_at", &self.established_at)
            .finish_non_exhaustive()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(token) = self.access_token.as_mut() {
            token.zeroize();
        }
    }
}
