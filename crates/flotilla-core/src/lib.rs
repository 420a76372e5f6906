//! flotilla-core — shared domain types and configuration.
//!
//! Everything the other Flotilla crates agree on lives here: the
//! `ServiceInstance` identity record, the `ResponseEvent` wire shape,
//! the `flotilla.toml` configuration model, and the keyed-lock
//! primitive that serializes per-type fleet mutations.

pub mod config;
pub mod sync;
pub mod types;

pub use config::{FlotillaConfig, ServiceSpec};
pub use sync::KeyedLocks;
pub use types::*;
