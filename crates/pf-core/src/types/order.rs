//! Order-change payloads (`ocm`).
//!
//! Order changes are forwarded to consumers unchanged; the client keeps no
//! order cache of its own.

use serde::{Deserialize, Serialize};

use super::price::PriceSize;

/// Changes for one market's orders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderMarketChange {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acc_id: Option<u64>,
    #[serde(default)]
    pub full_image: bool,
    #[serde(default)]
    pub closed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub orc: Vec<OrderRunnerChange>,
}

/// Changes for one runner's orders and matched positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRunnerChange {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hc: Option<f64>,
    #[serde(default)]
    pub full_image: bool,
    /// Unmatched (and recently completed) orders.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uo: Vec<UnmatchedOrder>,
    /// Matched backs, `[price, size]`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mb: Vec<PriceSize>,
    /// Matched lays, `[price, size]`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ml: Vec<PriceSize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    #[serde(rename = "B")]
    Back,
    #[serde(rename = "L")]
    Lay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Executable.
    #[serde(rename = "E")]
    Executable,
    /// Execution complete.
    #[serde(rename = "EC")]
    ExecutionComplete,
}

/// One order as reported by the order stream. Field names follow the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnmatchedOrder {
    pub id: String,
    pub p: f64,
    pub s: f64,
    pub side: OrderSide,
    pub status: OrderStatus,
    /// Persistence type (`L`, `P`, `MOC`).
    pub pt: String,
    /// Order type (`L`, `LOC`, `MOC`).
    pub ot: String,
    /// Placed date, epoch millis.
    pub pd: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bsp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rfo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rfs: Option<String>,
    /// Matched date, epoch millis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md: Option<u64>,
    /// Cancelled date, epoch millis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cd: Option<u64>,
    /// Lapsed date, epoch millis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ld: Option<u64>,
    /// Average matched price.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avp: Option<f64>,
    #[serde(default)]
    pub sm: f64,
    #[serde(default)]
    pub sr: f64,
    #[serde(default)]
    pub sl: f64,
    #[serde(default)]
    pub sc: f64,
    #[serde(default)]
    pub sv: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lsrc: Option<String>,
}
