//! Row types of the price store and the write plan for one market event.
//!
//! Runners are keyed by selection id and handicap, so both lines of an
//! Asian-handicap runner keep their own rows. A missing handicap is stored
//! as `0`.

use std::fmt;

use pf_core::types::{MarketChangeEvent, MarketDefinition, PriceSize, PriceType, RunnerUpdate};

use crate::catalog::CatalogMarket;

/// Baseline "runner exists" row.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct RunnerRow {
    pub market_id: String,
    pub selection_id: i64,
    pub handicap: f64,
    pub runner_name: Option<String>,
    pub runner_status: String,
    pub sort_priority: Option<i64>,
    pub market_name: Option<String>,
    pub event_name: Option<String>,
    pub venue: Option<String>,
    pub market_status: String,
    pub in_play: bool,
    pub definition_version: i64,
    pub updated_at: i64,
}

/// One persisted ladder level.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct PriceRow {
    pub market_id: String,
    pub selection_id: i64,
    pub handicap: f64,
    pub price_type: String,
    pub price: f64,
    pub size: f64,
    pub runner_name: Option<String>,
    pub market_status: Option<String>,
    pub in_play: bool,
    pub updated_at: i64,
}

/// Starting-price projections and last-traded state of one runner.
/// `None` means "not available", never zero.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ProjectionRow {
    pub market_id: String,
    pub selection_id: i64,
    pub handicap: f64,
    pub sp_near: Option<f64>,
    pub sp_far: Option<f64>,
    pub last_traded: Option<f64>,
    pub traded_volume: Option<f64>,
    pub updated_at: i64,
}

/// Replace one side of one runner's ladder: zero the existing rows of that
/// price type, then upsert `levels`.
#[derive(Debug, Clone, PartialEq)]
pub struct SideReplacement {
    pub market_id: String,
    pub selection_id: i64,
    pub handicap: f64,
    pub price_type: PriceType,
    pub levels: Vec<PriceSize>,
    pub runner_name: Option<String>,
    pub market_status: Option<String>,
    pub in_play: bool,
    pub updated_at: i64,
}

/// One unit of work for the store. Each op is applied (and retried)
/// independently.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    EnsureRunners {
        market_id: String,
        version: u64,
        rows: Vec<RunnerRow>,
    },
    ReplaceSide(SideReplacement),
    UpsertProjection(ProjectionRow),
}

impl fmt::Display for WriteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EnsureRunners {
                market_id,
                version,
                rows,
            } => write!(f, "baseline {market_id} v{version} ({} runners)", rows.len()),
            Self::ReplaceSide(s) => write!(
                f,
                "replace {} {}/{}@{} ({} levels)",
                s.price_type,
                s.market_id,
                s.selection_id,
                s.handicap,
                s.levels.len()
            ),
            Self::UpsertProjection(p) => write!(
                f,
                "projection {}/{}@{}",
                p.market_id, p.selection_id, p.handicap
            ),
        }
    }
}

/// Key form of an optional handicap.
#[inline]
pub fn handicap_key(hc: Option<f64>) -> f64 {
    // `+ 0.0` folds -0.0 into 0.0.
    hc.unwrap_or(0.0) + 0.0
}

/// Build the ordered writes for one event.
///
/// `baseline` requests the roster rows (the definition version has not been
/// persisted yet). Names fall back from the definition to `catalog`.
pub fn plan_writes(
    event: &MarketChangeEvent,
    catalog: Option<&CatalogMarket>,
    baseline: bool,
    now_ms: i64,
) -> Vec<WriteOp> {
    let definition = event.definition.as_deref();
    let mut ops = Vec::with_capacity(1 + event.runners.len() * 4);

    if baseline {
        if let Some(def) = definition {
            ops.push(WriteOp::EnsureRunners {
                market_id: event.market_id.clone(),
                version: def.version,
                rows: baseline_rows(&event.market_id, def, catalog, now_ms),
            });
        }
    }

    let market_status = definition.map(|d| d.status.as_str().to_string());
    let in_play = definition.is_some_and(|d| d.in_play);

    for runner in &event.runners {
        let runner_name = runner_name(definition, catalog, runner.selection_id, runner.handicap);
        let handicap = handicap_key(runner.handicap);
        for price_type in PriceType::ALL {
            ops.push(WriteOp::ReplaceSide(SideReplacement {
                market_id: event.market_id.clone(),
                selection_id: runner.selection_id as i64,
                handicap,
                price_type,
                levels: side(runner, price_type),
                runner_name: runner_name.clone(),
                market_status: market_status.clone(),
                in_play,
                updated_at: now_ms,
            }));
        }
        ops.push(WriteOp::UpsertProjection(ProjectionRow {
            market_id: event.market_id.clone(),
            selection_id: runner.selection_id as i64,
            handicap,
            sp_near: runner.sp_near,
            sp_far: runner.sp_far,
            last_traded: runner.last_traded,
            traded_volume: runner.traded_volume,
            updated_at: now_ms,
        }));
    }
    ops
}

fn side(runner: &RunnerUpdate, price_type: PriceType) -> Vec<PriceSize> {
    match price_type {
        PriceType::Back => runner.back.clone(),
        PriceType::Lay => runner.lay.clone(),
        PriceType::Traded => runner.traded.clone(),
    }
}

fn runner_name(
    definition: Option<&MarketDefinition>,
    catalog: Option<&CatalogMarket>,
    selection_id: u64,
    handicap: Option<f64>,
) -> Option<String> {
    definition
        .and_then(|d| d.runner(selection_id, handicap))
        .and_then(|r| r.name.clone())
        .or_else(|| catalog.and_then(|c| c.runner_name(selection_id)).map(str::to_string))
}

fn baseline_rows(
    market_id: &str,
    def: &MarketDefinition,
    catalog: Option<&CatalogMarket>,
    now_ms: i64,
) -> Vec<RunnerRow> {
    def.runners
        .iter()
        .map(|r| RunnerRow {
            market_id: market_id.to_string(),
            selection_id: r.id as i64,
            handicap: handicap_key(r.hc),
            runner_name: r
                .name
                .clone()
                .or_else(|| catalog.and_then(|c| c.runner_name(r.id)).map(str::to_string)),
            runner_status: r.status.as_str().to_string(),
            sort_priority: r.sort_priority.map(i64::from),
            market_name: catalog.and_then(|c| c.market_name.clone()),
            event_name: catalog.and_then(|c| c.event_name.clone()),
            venue: def
                .venue
                .clone()
                .or_else(|| catalog.and_then(|c| c.venue.clone())),
            market_status: def.status.as_str().to_string(),
            in_play: def.in_play,
            definition_version: def.version as i64,
            updated_at: now_ms,
        })
        .collect()
}
