//! Enumerations used throughout the price-feed system.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

/// Feed host selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    #[default]
    Production,
    Integration,
}

impl Endpoint {
    pub fn host(&self) -> &'static str {
        match self {
            Self::Production => "stream-api.betfair.com",
            Self::Integration => "stream-api-integration.betfair.com",
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Integration => write!(f, "integration"),
        }
    }
}

// ---------------------------------------------------------------------------
// Change messages
// ---------------------------------------------------------------------------

/// Change-type tag on `mcm` / `ocm` messages.
///
/// Absent on ordinary incremental updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    /// Initial image after a (re)subscription.
    SubImage,
    /// Delta replay after a resubscription from a `clk`.
    ResubDelta,
    /// Keep-alive carrying only a new `clk`.
    Heartbeat,
}

// ---------------------------------------------------------------------------
// Market / runner status
// ---------------------------------------------------------------------------

/// Market lifecycle status from the market definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketStatus {
    Inactive,
    Open,
    Suspended,
    Closed,
}

impl MarketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inactive => "INACTIVE",
            Self::Open => "OPEN",
            Self::Suspended => "SUSPENDED",
            Self::Closed => "CLOSED",
        }
    }
}

/// Runner status from the market definition's roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunnerStatus {
    Active,
    Winner,
    Loser,
    Placed,
    RemovedVacant,
    Removed,
    Hidden,
}

impl RunnerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Winner => "WINNER",
            Self::Loser => "LOSER",
            Self::Placed => "PLACED",
            Self::RemovedVacant => "REMOVED_VACANT",
            Self::Removed => "REMOVED",
            Self::Hidden => "HIDDEN",
        }
    }

    /// Whether price changes for this runner should still be forwarded.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Which ladder a persisted price row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceType {
    /// Available to back.
    Back,
    /// Available to lay.
    Lay,
    /// Traded volume at price.
    Traded,
}

impl PriceType {
    pub const ALL: [PriceType; 3] = [Self::Back, Self::Lay, Self::Traded];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Back => "BACK",
            Self::Lay => "LAY",
            Self::Traded => "TRADED",
        }
    }
}

impl std::fmt::Display for PriceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Connection lifecycle
// ---------------------------------------------------------------------------

/// Caller-visible connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// Socket open, no successful authentication yet.
    Connected,
    Authenticating,
    Authenticated,
}
