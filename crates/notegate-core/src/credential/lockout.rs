//! Wrong-PIN lockout ladder for the local device record
//!
//! Two typos are free. From the third consecutive wrong PIN the record locks
//! for 30 seconds, then 5 minutes, 30 minutes and finally a day per failure.
//! A lockout is measured from the time of the last failure, so it holds across
//! restarts of the client.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lockout ladder applied after consecutive wrong PINs
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutPolicy {
    /// Consecutive failures that trigger the first step
    pub threshold: u32,
    /// Step lengths in seconds; the last one repeats
    pub lockout_durations: Vec<u64>,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            threshold: 3,
            lockout_durations: vec![30, 5 * 60, 30 * 60, 24 * 3600],
        }
    }
}

impl LockoutPolicy {
    /// Lockout length after `failed_attempts` consecutive failures
    pub fn lockout_duration(&self, failed_attempts: u32) -> Option<Duration> {
        let step = failed_attempts.checked_sub(self.threshold)? as usize;
        let last = self.lockout_durations.len().checked_sub(1)?;
        let secs = self.lockout_durations[step.min(last)];

        Some(Duration::from_secs(secs))
    }

    /// Time left on a lockout that began at `last_failed_ms`, as seen at `now_ms`
    ///
    /// Both timestamps are Unix epoch milliseconds.
    pub fn remaining(&self, failed_attempts: u32, last_failed_ms: i64, now_ms: i64) -> Option<Duration> {
        let length = self.lockout_duration(failed_attempts)?;
        let length_ms = i64::try_from(length.as_millis()).unwrap_or(i64::MAX);
        let until = last_failed_ms.saturating_add(length_ms);

        (until > now_ms).then(|| Duration::from_millis(until.abs_diff(now_ms)))
    }

    /// Wrong PINs left before the ladder starts
    pub fn attempts_before_lockout(&self, failed_attempts: u32) -> u32 {
        self.threshold.saturating_sub(failed_attempts).max(1)
    }

    /// Coarse human form: "30 seconds", "5 minutes", "1 day"
    pub fn describe(duration: Duration) -> String {
        let secs = duration.as_secs();
        let (count, unit) = match secs {
            0..=59 => (secs, "second"),
            60..=3599 => (secs / 60, "minute"),
            3600..=86399 => (secs / 3600, "hour"),
            _ => (secs / 86400, "day"),
        };

        if count == 1 {
            format!("1 {}", unit)
        } else {
            format!("{} {}s", count, unit)
        }
    }
}
