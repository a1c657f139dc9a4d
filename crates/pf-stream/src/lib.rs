//! # pf-stream
//!
//! Client for the exchange's streaming API: a persistent TLS socket carrying
//! one JSON message per line.
//!
//! ## Architecture
//!
//! [`StreamClient`] opens the socket, authenticates and subscribes. Each
//! connection runs one read loop that decodes lines and dispatches them:
//! `status` responses go to the [`correlator`], change messages go through
//! the [`processor`] and out on a bounded event channel.
//!
//! - [`transport`] — TLS connect and line framing
//! - [`codec`] — line codec, message encode/decode
//! - [`protocol`] — wire message types
//! - [`correlator`] — request ids, outstanding requests, writer lock
//! - [`subscription`] — tracked market/order subscriptions and replay
//! - [`processor`] / [`ladder`] — market state and runner ladders
//! - [`connection`] / [`client`] — connection lifecycle, caller API

pub mod client;
pub mod codec;
pub mod connection;
pub mod correlator;
pub mod ladder;
pub mod processor;
pub mod protocol;
pub mod subscription;
pub mod transport;

pub use client::StreamClient;
pub use subscription::SubscriptionAck;
