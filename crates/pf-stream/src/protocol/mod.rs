//! Wire messages of the streaming protocol.
//!
//! Every line on the socket is one JSON object whose `op` field selects the
//! variant. Requests (`authentication`, `marketSubscription`,
//! `orderSubscription`, `heartbeat`) carry an integer `id`; the feed answers
//! each with a `status` echoing that id. `connection`, `mcm` and `ocm` are
//! pushed by the feed.

pub mod market;
pub mod order;
pub mod request;

use serde::{Deserialize, Serialize};

pub use market::{MarketChange, MarketChangeMessage, RunnerChange, SegmentType};
pub use order::OrderChangeMessage;
pub use pf_core::types::{StatusCode, StatusMessage};
pub use request::{
    AuthenticationMessage, HeartbeatMessage, MarketDataField, MarketDataFilter, MarketFilter,
    MarketSubscriptionMessage, OrderFilter, OrderSubscriptionMessage,
};

/// Every `op` this client understands.
pub const KNOWN_OPS: [&str; 8] = [
    "authentication",
    "marketSubscription",
    "orderSubscription",
    "heartbeat",
    "connection",
    "status",
    "mcm",
    "ocm",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Message {
    Authentication(AuthenticationMessage),
    MarketSubscription(MarketSubscriptionMessage),
    OrderSubscription(OrderSubscriptionMessage),
    Heartbeat(HeartbeatMessage),
    Connection(ConnectionMessage),
    Status(StatusMessage),
    Mcm(MarketChangeMessage),
    Ocm(OrderChangeMessage),
}

impl Message {
    /// The `op` discriminator of this message.
    pub fn op(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "authentication",
            Self::MarketSubscription(_) => "marketSubscription",
            Self::OrderSubscription(_) => "orderSubscription",
            Self::Heartbeat(_) => "heartbeat",
            Self::Connection(_) => "connection",
            Self::Status(_) => "status",
            Self::Mcm(_) => "mcm",
            Self::Ocm(_) => "ocm",
        }
    }

    /// The request / correlation id, if this message carries one.
    pub fn id(&self) -> Option<u64> {
        match self {
            Self::Authentication(m) => Some(m.id),
            Self::MarketSubscription(m) => Some(m.id),
            Self::OrderSubscription(m) => Some(m.id),
            Self::Heartbeat(m) => Some(m.id),
            Self::Connection(_) => None,
            Self::Status(m) => m.id,
            Self::Mcm(m) => m.id,
            Self::Ocm(m) => m.id,
        }
    }
}

/// First message on every connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionMessage {
    pub connection_id: String,
}
