//! Correlated request/response calls over a shared channel.
//!
//! Requests and responses travel on the same channel name, so the
//! correlation id is the only demultiplexing key. A request frame is
//! `{"correlationId", "params"}`; a response frame carries the same id
//! plus `"data"` or `"error"`. Frames for other ids pass by without
//! disturbing a pending call.

use std::time::Duration;

use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bus::Bus;

/// The demultiplexing key every request and response frame carries.
pub const CORRELATION_KEY: &str = "correlationId";

/// Errors a correlated call can fail with.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// No matching response arrived within the ceiling. Distinct from
    /// `Remote` so callers can tell "no answer" from "answered with
    /// error".
    #[error("no response on channel {channel:?} within {ceiling:?}")]
    Timeout { channel: String, ceiling: Duration },

    /// The responder reported an error object.
    #[error("remote error: {0}")]
    Remote(String),

    #[error("channel {0:?} closed")]
    Closed(String),
}

/// Extract the id and params of a request frame. Returns `None` for
/// response frames (which carry `data` or `error`) and for frames with
/// no correlation id — responders use this to skip everything that is
/// not addressed to them.
pub fn request_params(frame: &Value) -> Option<(&str, &Value)> {
    if frame.get("data").is_some() || frame.get("error").is_some() {
        return None;
    }
    let id = frame.get(CORRELATION_KEY)?.as_str()?;
    Some((id, frame.get("params").unwrap_or(&Value::Null)))
}

/// Build a success response frame.
pub fn response_frame(correlation_id: &str, data: Value) -> Value {
    json!({ CORRELATION_KEY: correlation_id, "data": data })
}

/// Build an error response frame.
pub fn error_frame(correlation_id: &str, message: &str) -> Value {
    json!({ CORRELATION_KEY: correlation_id, "error": message })
}

/// Turns the bus's publish/subscribe into synchronous-looking calls
/// with a fixed timeout ceiling.
#[derive(Clone)]
pub struct CallBroker {
    bus: Bus,
    ceiling: Duration,
}

impl CallBroker {
    pub fn new(bus: Bus, ceiling: Duration) -> Self {
        Self { bus, ceiling }
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Publish `params` on `channel` and wait for the response carrying
    /// our correlation id.
    ///
    /// Subscribes before publishing, so the response cannot be missed.
    /// On timeout the subscription is dropped; a late response then has
    /// nowhere to land and no effect.
    pub async fn call(&self, channel: &str, params: Value) -> Result<Value, BrokerError> {
        let correlation_id = Uuid::new_v4().to_string();
        let mut rx = self.bus.subscribe(channel);
        let deadline = Instant::now() + self.ceiling;

        self.bus.publish(
            channel,
            json!({ CORRELATION_KEY: correlation_id, "params": params }),
        );

        loop {
            let frame = match timeout_at(deadline, rx.recv()).await {
                Err(_) => {
                    debug!(channel, %correlation_id, "call timed out");
                    return Err(BrokerError::Timeout {
                        channel: channel.to_string(),
                        ceiling: self.ceiling,
                    });
                }
                Ok(Err(RecvError::Lagged(skipped))) => {
                    warn!(channel, skipped, "call receiver lagged");
                    continue;
                }
                Ok(Err(RecvError::Closed)) => {
                    return Err(BrokerError::Closed(channel.to_string()));
                }
                Ok(Ok(frame)) => frame,
            };

            // Only frames carrying our id matter; everything else —
            // our own request echo, other calls' traffic — passes by.
            if frame.get(CORRELATION_KEY).and_then(Value::as_str) != Some(correlation_id.as_str()) {
                continue;
            }
            if let Some(error) = frame.get("error") {
                let message = error
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string());
                return Err(BrokerError::Remote(message));
            }
            if let Some(data) = frame.get("data") {
                return Ok(data.clone());
            }
            // Our own request frame; keep waiting.
        }
    }
}
