//! Named broadcast channels of JSON payloads.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

const DEFAULT_CAPACITY: usize = 256;

/// An in-process pub/sub transport. Channels are created lazily on
/// first use and live for the life of the bus. Cloning is cheap; all
/// clones share the same channels.
#[derive(Clone)]
pub struct Bus {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<Value>>>>,
    capacity: usize,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Bus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Value> {
        if let Some(sender) = self.channels.read().expect("bus lock").get(channel) {
            return sender.clone();
        }
        let mut channels = self.channels.write().expect("bus lock");
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Publish a payload. Returns the number of subscribers that will
    /// see it; publishing to a channel nobody listens on is not an
    /// error.
    pub fn publish(&self, channel: &str, payload: Value) -> usize {
        let delivered = self.sender(channel).send(payload).unwrap_or(0);
        trace!(channel, delivered, "published");
        delivered
    }

    /// Subscribe to a channel. The receiver sees payloads published
    /// after this call.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<Value> {
        self.sender(channel).subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_reaches_all_subscribers() {
        let bus = Bus::default();
        let mut first = bus.subscribe("system/responses");
        let mut second = bus.subscribe("system/responses");

        let delivered = bus.publish("system/responses", json!({"duration": 12}));
        assert_eq!(delivered, 2);

        assert_eq!(first.recv().await.unwrap()["duration"], 12);
        assert_eq!(second.recv().await.unwrap()["duration"], 12);
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let bus = Bus::default();
        let mut other = bus.subscribe("other");

        bus.publish("system/responses", json!(1));
        bus.publish("other", json!(2));

        assert_eq!(other.recv().await.unwrap(), json!(2));
    }

    #[test]
    fn publish_without_subscribers_is_a_no_op() {
        let bus = Bus::default();
        assert_eq!(bus.publish("empty", serde_json::json!(null)), 0);
    }
}
