//! `mcm`: market change messages.

use pf_core::types::{ChangeType, LevelPriceSize, MarketDefinition, PriceSize, Projected};
use serde::{Deserialize, Serialize};

/// Marks a message as part of a multi-line image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SegmentType {
    SegStart,
    Seg,
    SegEnd,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketChangeMessage {
    /// Id of the subscription this message belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_clk: Option<String>,
    /// Publish time, epoch millis.
    #[serde(default)]
    pub pt: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ct: Option<ChangeType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflate_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_type: Option<SegmentType>,
    /// Set (to 503) while the feed is lagging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mc: Vec<MarketChange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketChange {
    pub id: String,
    /// Full image: replace cached state instead of merging.
    #[serde(default)]
    pub img: bool,
    /// Conflated.
    #[serde(default)]
    pub con: bool,
    /// Market traded volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tv: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_definition: Option<MarketDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rc: Vec<RunnerChange>,
}

/// Price changes for one runner. Ladders carry only the changed levels; a
/// size of zero removes a level.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunnerChange {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hc: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub batb: Vec<LevelPriceSize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub batl: Vec<LevelPriceSize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bdatb: Vec<LevelPriceSize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bdatl: Vec<LevelPriceSize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub atb: Vec<PriceSize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub atl: Vec<PriceSize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spb: Vec<PriceSize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spl: Vec<PriceSize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trd: Vec<PriceSize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ltp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tv: Option<f64>,
    /// Starting price, near projection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spn: Option<Projected>,
    /// Starting price, far projection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spf: Option<Projected>,
}
