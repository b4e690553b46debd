//! Same-origin cross-tab broadcast
//!
//! A [`BroadcastHub`] plays the role of the origin: every tab that opens the
//! same channel name sees messages posted by the others, never its own.
//! Messages travel as JSON so a page that only knows the wire shape
//! (`{"type":"AUTH_CONFIRMED"}`) can take part.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// Default channel name for authentication events
pub const AUTH_CHANNEL: &str = "notegate-auth";

/// Buffered messages per channel before slow subscribers lag
const CHANNEL_CAPACITY: usize = 16;

/// Messages exchanged on the authentication channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthMessage {
    /// The emailed device-confirmation link was followed
    AuthConfirmed,
}

/// Cross-tab channel errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("Broadcast channels are not available")]
    Unavailable,

    #[error("Failed to encode message: {0}")]
    Encode(String),
}

/// Best-effort request to raise the current window or tab
pub trait WindowFocus: Send + Sync {
    /// Returns false when the environment cannot honour the request
    fn bring_to_front(&self) -> bool;
}

#[derive(Debug, Clone)]
struct Envelope {
    sender: Uuid,
    payload: String,
}

/// Registry of named channels for one origin
#[derive(Debug, Default)]
pub struct BroadcastHub {
    channels: Mutex<HashMap<String, broadcast::Sender<Envelope>>>,
    closed: AtomicBool,
}

impl BroadcastHub {
    /// Create an empty hub
    pub fn new() -> Self {
        Self::default()
    }

    /// Join channel `name`, creating it on first use
    pub fn open(&self, name: &str) -> Result<CrossTabChannel, ChannelError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ChannelError::Unavailable);
        }

        let mut channels = self.channels.lock().map_err(|_| ChannelError::Unavailable)?;
        let tx = channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone();
        let rx = tx.subscribe();

        Ok(CrossTabChannel {
            name: name.to_string(),
            id: Uuid::new_v4(),
            tx,
            rx,
        })
    }

    /// Stop handing out channels; tabs already subscribed keep their handles
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Ok(mut channels) = self.channels.lock() {
            channels.clear();
        }
    }
}

/// One tab's handle on a named channel
pub struct CrossTabChannel {
    name: String,
    id: Uuid,
    tx: broadcast::Sender<Envelope>,
    rx: broadcast::Receiver<Envelope>,
}

impl CrossTabChannel {
    /// Channel name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Deliver `message` to every other subscriber of this channel
    pub fn post(&self, message: &AuthMessage) -> Result<(), ChannelError> {
        let payload =
            serde_json::to_string(message).map_err(|e| ChannelError::Encode(e.to_string()))?;
        // No other tab listening is not an error
        let _ = self.tx.send(Envelope {
            sender: self.id,
            payload,
        });
        Ok(())
    }

    /// Next message from another tab; `None` once the channel is gone
    ///
    /// Unknown message shapes are skipped.
    pub async fn recv(&mut self) -> Option<AuthMessage> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) if envelope.sender == self.id => continue,
                Ok(envelope) => match serde_json::from_str(&envelope.payload) {
                    Ok(message) => return Some(message),
                    Err(e) => {
                        debug!(channel = %self.name, "Ignoring unknown message: {}", e);
                    }
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(channel = %self.name, skipped, "Subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Post a raw JSON payload (used by pages that build messages by hand)
    pub fn post_raw(&self, payload: impl Into<String>) {
        let _ = self.tx.send(Envelope {
            sender: self.id,
            payload: payload.into(),
        });
    }
}

impl std::fmt::Debug for CrossTabChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossTabChannel")
            .field("name", &self.name)
            .field("id", &self.id)
            .finish()
    }
}
