//! Market definition as carried on `mcm` market changes.
//!
//! The definition is forwarded to consumers as-is, so it keeps the feed's
//! field names. Unknown fields are ignored.

use serde::{Deserialize, Serialize};

use super::enums::{MarketStatus, RunnerStatus};
use super::price::Projected;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketDefinition {
    pub status: MarketStatus,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub in_play: bool,
    #[serde(default)]
    pub bsp_market: bool,
    #[serde(default)]
    pub turn_in_play_enabled: bool,
    #[serde(default)]
    pub complete: bool,
    #[serde(default)]
    pub bsp_reconciled: bool,
    #[serde(default)]
    pub cross_matching: bool,
    #[serde(default)]
    pub runners_voidable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_winners: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_active_runners: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub betting_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspend_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settled_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_base_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regulators: Vec<String>,
    #[serde(default)]
    pub runners: Vec<RunnerDefinition>,
}

impl MarketDefinition {
    /// Find a runner by selection id and handicap.
    pub fn runner(&self, selection_id: u64, handicap: Option<f64>) -> Option<&RunnerDefinition> {
        self.runners
            .iter()
            .find(|r| r.id == selection_id && same_handicap(r.hc, handicap))
    }

    /// Status of a runner, or `None` when it is not on the roster.
    pub fn runner_status(&self, selection_id: u64, handicap: Option<f64>) -> Option<RunnerStatus> {
        self.runner(selection_id, handicap).map(|r| r.status)
    }

    pub fn is_closed(&self) -> bool {
        self.status == MarketStatus::Closed
    }
}

/// Handicaps compare equal when both are absent/zero or numerically equal.
#[inline]
pub fn same_handicap(a: Option<f64>, b: Option<f64>) -> bool {
    let a = a.unwrap_or(0.0);
    let b = b.unwrap_or(0.0);
    (a - b).abs() < 1e-9
}

/// One runner on a market's roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerDefinition {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hc: Option<f64>,
    pub status: RunnerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_priority: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjustment_factor: Option<f64>,
    /// Reconciled starting price, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bsp: Option<Projected>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removal_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}
