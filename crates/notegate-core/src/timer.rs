//! Once-per-second countdowns for lockouts and resend cooldowns
//!
//! A [`CountdownTimer`] owns at most one ticking task. Restarting it aborts the
//! previous task before spawning the next, and it resets itself to zero when
//! the count runs out.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Tick period
pub const TICK: Duration = Duration::from_secs(1);

/// Seconds shown for a millisecond duration, rounded up
pub fn ceil_secs(ms: u64) -> u64 {
    ms.div_ceil(1000)
}

/// Observer of a running countdown
pub trait TimerListener: Send + Sync {
    /// One second elapsed; `remaining` is the new count
    fn on_tick(&self, _name: &str, _remaining: u64) {}

    /// The count reached zero
    fn on_expired(&self, _name: &str) {}
}

/// Reusable countdown with an observable remaining-seconds value
pub struct CountdownTimer {
    name: String,
    remaining: Arc<watch::Sender<u64>>,
    listener: Option<Arc<dyn TimerListener>>,
    task: Option<JoinHandle<()>>,
}

impl CountdownTimer {
    /// Create an idle timer
    pub fn new(name: impl Into<String>) -> Self {
        let (remaining, _) = watch::channel(0);
        Self {
            name: name.into(),
            remaining: Arc::new(remaining),
            listener: None,
            task: None,
        }
    }

    /// Create an idle timer that reports ticks to `listener`
    pub fn with_listener(name: impl Into<String>, listener: Arc<dyn TimerListener>) -> Self {
        let mut timer = Self::new(name);
        timer.listener = Some(listener);
        timer
    }

    /// Timer name, used in logs and listener callbacks
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Seconds left, zero when idle
    pub fn remaining(&self) -> u64 {
        *self.remaining.borrow()
    }

    /// Whether the countdown is above zero
    pub fn is_running(&self) -> bool {
        self.remaining() > 0
    }

    /// Watch the remaining seconds
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.remaining.subscribe()
    }

    /// Start counting down from `seconds`, replacing any running countdown
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self, seconds: u64) {
        self.abort_task();
        self.remaining.send_replace(seconds);

        if seconds == 0 {
            return;
        }

        debug!(timer = %self.name, seconds, "Countdown started");

        let remaining = Arc::clone(&self.remaining);
        let listener = self.listener.clone();
        let name = self.name.clone();
        let first_tick = Instant::now() + TICK;

        self.task = Some(tokio::spawn(async move {
            let mut ticks = tokio::time::interval_at(first_tick, TICK);
            loop {
                ticks.tick().await;

                let left = remaining.borrow().saturating_sub(1);
                remaining.send_replace(left);

                if let Some(listener) = &listener {
                    listener.on_tick(&name, left);
                }

                if left == 0 {
                    debug!(timer = %name, "Countdown expired");
                    if let Some(listener) = &listener {
                        listener.on_expired(&name);
                    }
                    break;
                }
            }
        }));
    }

    /// Stop ticking and reset to zero
    pub fn stop(&mut self) {
        self.abort_task();
        self.remaining.send_replace(0);
    }

    fn abort_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for CountdownTimer {
    fn drop(&mut self) {
        self.abort_task();
    }
}

impl std::fmt::Debug for CountdownTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CountdownTimer")
            .field("name", &self.name)
            .field("remaining", &self.remaining())
            .finish()
    }
}
