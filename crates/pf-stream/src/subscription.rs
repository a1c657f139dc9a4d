//! Market and order subscription bookkeeping.
//!
//! The feed replaces a connection's whole market subscription on every
//! `marketSubscription`, so the manager tracks the union of requested market
//! ids and always sends the full set. The tracked state outlives a
//! connection and is replayed after the next successful authentication.

use std::collections::BTreeSet;

use pf_core::error::RequestError;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::correlator::Correlator;
use crate::protocol::{
    MarketDataField, MarketDataFilter, MarketFilter, MarketSubscriptionMessage, Message,
    OrderFilter, OrderSubscriptionMessage,
};

/// Outcome of a subscribe call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionAck {
    /// The request with this id was acknowledged by the feed.
    Sent { id: u64 },
    /// Identical to the subscription already active on this connection.
    Unchanged,
}

/// The tracked market filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketSubscription {
    pub market_ids: BTreeSet<String>,
    pub fields: BTreeSet<MarketDataField>,
    pub ladder_levels: Option<u32>,
}

impl MarketSubscription {
    pub fn is_empty(&self) -> bool {
        self.market_ids.is_empty()
    }

    fn to_message(&self, id: u64, conflate_ms: Option<u64>, heartbeat_ms: Option<u64>) -> Message {
        Message::MarketSubscription(MarketSubscriptionMessage {
            id,
            clk: None,
            initial_clk: None,
            segmentation_enabled: Some(true),
            conflate_ms,
            heartbeat_ms,
            market_filter: MarketFilter {
                market_ids: self.market_ids.iter().cloned().collect(),
                ..Default::default()
            },
            market_data_filter: MarketDataFilter {
                ladder_levels: self.ladder_levels,
                fields: self.fields.iter().copied().collect(),
            },
        })
    }
}

#[derive(Default)]
struct State {
    markets: MarketSubscription,
    /// `markets` was acknowledged on the current connection.
    markets_active: bool,
    orders: Option<OrderFilter>,
    orders_active: bool,
}

/// Tracks the active subscriptions of one client.
///
/// All subscribe calls go through one lock held for the duration of the
/// request, so concurrent calls cannot interleave their unions.
pub struct SubscriptionManager {
    label: String,
    conflate_ms: Option<u64>,
    heartbeat_ms: Option<u64>,
    state: Mutex<State>,
}

impl SubscriptionManager {
    pub fn new(label: impl Into<String>, conflate_ms: Option<u64>, heartbeat_ms: Option<u64>) -> Self {
        Self {
            label: label.into(),
            conflate_ms,
            heartbeat_ms,
            state: Mutex::new(State::default()),
        }
    }

    /// Add `market_ids` to the subscription and send the full filter.
    ///
    /// Empty `fields` keeps the tracked fields (or the defaults when none are
    /// tracked yet); `ladder_levels` of `None` keeps the tracked depth. On
    /// failure the tracked state is left as it was.
    pub async fn subscribe_markets(
        &self,
        corr: &Correlator,
        market_ids: &[String],
        fields: &[MarketDataField],
        ladder_levels: Option<u32>,
    ) -> Result<SubscriptionAck, RequestError> {
        let mut state = self.state.lock().await;

        let mut candidate = state.markets.clone();
        candidate.market_ids.extend(market_ids.iter().cloned());
        if !fields.is_empty() {
            candidate.fields = fields.iter().copied().collect();
        } else if candidate.fields.is_empty() {
            candidate.fields = MarketDataField::DEFAULT.into_iter().collect();
        }
        if ladder_levels.is_some() {
            candidate.ladder_levels = ladder_levels;
        }

        if state.markets_active && candidate == state.markets {
            debug!("[{}] market subscription unchanged", self.label);
            return Ok(SubscriptionAck::Unchanged);
        }

        let (conflate_ms, heartbeat_ms) = (self.conflate_ms, self.heartbeat_ms);
        let status = corr
            .send("marketSubscription", |id| {
                candidate.to_message(id, conflate_ms, heartbeat_ms)
            })
            .await?;

        info!(
            "[{}] subscribed to {} market(s)",
            self.label,
            candidate.market_ids.len()
        );
        state.markets = candidate;
        state.markets_active = true;
        Ok(SubscriptionAck::Sent {
            id: status.id.unwrap_or_default(),
        })
    }

    /// Subscribe to the account's order stream.
    pub async fn subscribe_orders(
        &self,
        corr: &Correlator,
        filter: Option<OrderFilter>,
    ) -> Result<SubscriptionAck, RequestError> {
        let mut state = self.state.lock().await;
        let filter = filter.unwrap_or_default();
        if state.orders_active && state.orders.as_ref() == Some(&filter) {
            return Ok(SubscriptionAck::Unchanged);
        }

        let status = corr
            .send("orderSubscription", |id| self.order_message(id, &filter))
            .await?;

        info!("[{}] subscribed to orders", self.label);
        state.orders = Some(filter);
        state.orders_active = true;
        Ok(SubscriptionAck::Sent {
            id: status.id.unwrap_or_default(),
        })
    }

    fn order_message(&self, id: u64, filter: &OrderFilter) -> Message {
        Message::OrderSubscription(OrderSubscriptionMessage {
            id,
            clk: None,
            initial_clk: None,
            segmentation_enabled: Some(true),
            conflate_ms: self.conflate_ms,
            heartbeat_ms: self.heartbeat_ms,
            order_filter: Some(filter.clone()),
        })
    }

    /// Stop tracking a market. Local only: the feed keeps streaming it until
    /// the next subscription request replaces the filter.
    pub async fn unsubscribe(&self, market_id: &str) -> bool {
        let mut state = self.state.lock().await;
        let removed = state.markets.market_ids.remove(market_id);
        if removed {
            // Force the next subscribe to go out even if it re-adds the same id.
            state.markets_active = false;
            debug!("[{}] untracked market {market_id}", self.label);
        }
        removed
    }

    /// Mark every subscription inactive (a new connection starts bare).
    pub async fn reset_connection(&self) {
        let mut state = self.state.lock().await;
        state.markets_active = false;
        state.orders_active = false;
    }

    /// Re-send every tracked subscription on the current connection.
    ///
    /// Returns how many requests were sent.
    pub async fn replay(&self, corr: &Correlator) -> Result<usize, RequestError> {
        let mut state = self.state.lock().await;
        let mut sent = 0;

        if !state.markets.is_empty() && !state.markets_active {
            let markets = state.markets.clone();
            let (conflate_ms, heartbeat_ms) = (self.conflate_ms, self.heartbeat_ms);
            corr.send("marketSubscription", |id| {
                markets.to_message(id, conflate_ms, heartbeat_ms)
            })
            .await?;
            state.markets_active = true;
            sent += 1;
        }
        if let Some(filter) = state.orders.clone() {
            if !state.orders_active {
                corr.send("orderSubscription", |id| self.order_message(id, &filter))
                    .await?;
                state.orders_active = true;
                sent += 1;
            }
        }
        if sent > 0 {
            info!("[{}] replayed {sent} subscription(s)", self.label);
        }
        Ok(sent)
    }

    /// Snapshot of the tracked market subscription.
    pub async fn markets(&self) -> MarketSubscription {
        self.state.lock().await.markets.clone()
    }
}
