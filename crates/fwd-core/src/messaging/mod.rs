//! Messenger-facing abstractions: the inbound item model and the outbound port.

pub mod port;
pub mod throttled;
pub mod types;
