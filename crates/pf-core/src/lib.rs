//! # pf-core
//!
//! Core crate for the price-feed system, providing:
//!
//! - **Types** (`types`) — market definitions, price ladders, order changes, feed events
//! - **Configuration** (`config`) — JSON config deserialization
//! - **Error types** (`error`) — transport, protocol, request and store errors via thiserror
//! - **Throttle** (`throttle`) — per-market last-write gate for persistence
//! - **JSON helpers** (`json_util`) — tolerant numeric parsing, non-finite token handling
//! - **Time utilities** (`time_util`) — wall-clock timestamps
//! - **Logging** (`logging`) — tracing-based structured logging

pub mod config;
pub mod error;
pub mod json_util;
pub mod logging;
pub mod throttle;
pub mod time_util;
pub mod types;

// Re-export types at crate root for convenience.
pub use types::*;
