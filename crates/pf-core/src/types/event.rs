//! Events emitted by the stream client to downstream consumers.
//!
//! Consumers (the persistence writer, strategies) read a [`FeedEventReceiver`]
//! and react to market changes, order changes, status notices and connection
//! lifecycle transitions.

use std::sync::Arc;

use super::enums::{ChangeType, ConnectionState, RunnerStatus};
use super::market::MarketDefinition;
use super::order::OrderMarketChange;
use super::price::PriceSize;
use super::status::StatusMessage;

/// A typed event emitted by the stream client.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// One market's share of an `mcm` message.
    MarketChanged(MarketChangeEvent),

    /// An `ocm` message, forwarded unchanged.
    OrderChanged(OrderChangeEvent),

    /// An unsolicited `status` (no pending request matched it).
    Status(StatusMessage),

    /// Connection lifecycle transition.
    ConnectionState(ConnectionState),
}

/// Sender half of the feed event channel.
pub type FeedEventSender = tokio::sync::mpsc::Sender<FeedEvent>;

/// Receiver half of the feed event channel.
///
/// The channel is bounded; a consumer that falls behind loses events (with a
/// warning on the producer side) rather than stalling the read loop.
pub type FeedEventReceiver = tokio::sync::mpsc::Receiver<FeedEvent>;

/// Processed change for a single market.
#[derive(Debug, Clone)]
pub struct MarketChangeEvent {
    pub market_id: String,
    /// Change-token of the message this event came from.
    pub clk: Option<String>,
    /// Publish time, epoch millis.
    pub publish_time: u64,
    pub change_type: Option<ChangeType>,
    /// `true` only when the feed marked this market change as a full image.
    pub full_image: bool,
    /// Latest cached definition; `None` until the feed has sent one.
    pub definition: Option<Arc<MarketDefinition>>,
    /// Whether this change carried a new definition.
    pub definition_changed: bool,
    /// Updates for active runners only.
    pub runners: Vec<RunnerUpdate>,
    /// Market-level traded volume, when sent.
    pub total_matched: Option<f64>,
    /// The feed conflated several changes into this one.
    pub conflated: bool,
}

impl MarketChangeEvent {
    /// The market is closed according to the cached definition.
    pub fn is_closed(&self) -> bool {
        self.definition.as_ref().is_some_and(|d| d.is_closed())
    }
}

/// Current state of one runner after a change was applied.
///
/// Ladders are the runner's full current state (not just the delta), best
/// price first.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerUpdate {
    pub selection_id: u64,
    pub handicap: Option<f64>,
    pub status: RunnerStatus,
    pub back: Vec<PriceSize>,
    pub lay: Vec<PriceSize>,
    pub traded: Vec<PriceSize>,
    pub last_traded: Option<f64>,
    pub traded_volume: Option<f64>,
    /// Starting-price projection (near); `None` when unavailable.
    pub sp_near: Option<f64>,
    /// Starting-price projection (far); `None` when unavailable.
    pub sp_far: Option<f64>,
}

/// An `ocm` message.
#[derive(Debug, Clone)]
pub struct OrderChangeEvent {
    pub clk: Option<String>,
    pub publish_time: u64,
    pub change_type: Option<ChangeType>,
    pub markets: Vec<OrderMarketChange>,
}
