//! Domain types shared across the Flotilla crates.
//!
//! These types cross crate boundaries and the wire: instances are
//! serialized into supervisor identity markers, response events arrive
//! JSON-encoded on the `system/responses` channel. All of them are
//! serde round-trippable.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// A service category name, e.g. `"prime-number"`.
pub type ServiceType = String;

/// The synthetic service type that aggregates stats across every type.
pub const ALL_SERVICES: &str = "all";

/// Pub/sub channel carrying per-request outcome events.
pub const RESPONSES_CHANNEL: &str = "system/responses";

// ── Instances ──────────────────────────────────────────────────────

/// A running service instance.
///
/// Created when the supervisor confirms a launch, destroyed when a stop
/// succeeds. Never mutated in place: a changed instance is a new
/// instance with a new identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// Globally unique name, derived from type and port: `"prime-number-6101"`.
    pub name: String,
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    pub ip: String,
    pub port: u16,
    /// Unix timestamp (milliseconds) when the launch was confirmed.
    #[serde(rename = "startTimestamp")]
    pub start_timestamp_ms: u64,
}

impl ServiceInstance {
    /// The `ip:port` address used for load-balancer membership.
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// Derive the instance name for a type/port pair, zero-padded to
    /// a fixed width so names sort the way ports do.
    pub fn derive_name(service_type: &str, port: u16) -> String {
        format!("{service_type}-{port:04}")
    }
}

// ── Response events ────────────────────────────────────────────────

/// The service identity embedded in a response event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRef {
    pub name: String,
    #[serde(rename = "type")]
    pub service_type: ServiceType,
}

/// A single per-request outcome reported by a service instance.
///
/// Wire shape (JSON): `{url, timestamp, duration, service: {name, type}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEvent {
    pub url: String,
    #[serde(rename = "timestamp")]
    pub timestamp_ms: u64,
    #[serde(rename = "duration")]
    pub duration_ms: u64,
    pub service: ServiceRef,
}

impl ResponseEvent {
    /// Parse a response event from an untyped JSON payload.
    ///
    /// Returns `None` for malformed payloads; the caller decides whether
    /// to log and drop or reject outright.
    pub fn from_value(value: serde_json::Value) -> Option<Self> {
        serde_json::from_value(value).ok()
    }
}

/// Current Unix time in milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
