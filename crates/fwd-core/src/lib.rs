//! Core domain + relay engine for the Telegram forwarding bot.
//!
//! This crate is intentionally framework-agnostic. Telegram and the AI
//! rewriter live behind ports (traits) implemented in adapter crates.

pub mod aggregator;
pub mod batch;
pub mod classify;
pub mod config;
pub mod delivery_log;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod messaging;
pub mod notifier;
pub mod relay;
pub mod settings;
pub mod stats;
pub mod text;
pub mod utils;

#[cfg(test)]
mod testing;

pub use errors::{Error, Result};
