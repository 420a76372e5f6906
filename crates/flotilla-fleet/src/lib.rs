//! flotilla-fleet — the instance fleet controller.
//!
//! Owns instance identity allocation and per-type capacity enforcement.
//! The fleet itself is never stored: it is reconstructed on every read
//! from the supervisor's process list, using the identity marker each
//! instance carries in its environment.

mod controller;
mod error;

pub use controller::FleetController;
pub use error::{FleetError, FleetResult};
