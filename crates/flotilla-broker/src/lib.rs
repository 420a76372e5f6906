//! flotilla-broker — the asynchronous transport and its synchronous face.
//!
//! `Bus` is a set of named broadcast channels carrying JSON payloads —
//! the in-process stand-in for the system's pub/sub transport. On top
//! of it, `CallBroker` turns publish/subscribe into synchronous-looking
//! calls: a fresh correlation id per call, id-matched demultiplexing on
//! a shared channel, and a fixed timeout ceiling as the only
//! cancellation primitive.

mod broker;
mod bus;

pub use broker::{
    BrokerError, CallBroker, error_frame, request_params, response_frame, CORRELATION_KEY,
};
pub use bus::Bus;
