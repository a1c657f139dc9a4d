//! Per-runner price ladders rebuilt from incremental runner changes.
//!
//! The feed sends only the levels that changed. Two ladder shapes exist:
//!
//! - **Positioned** (`batb`, `batl`, `bdatb`, `bdatl`): `[level, price, size]`,
//!   level 0 is best. A size of zero clears the level.
//! - **Price-keyed** (`atb`, `atl`, `trd`, `spb`, `spl`): `[price, size]`.
//!   A size of zero removes the price.
//!
//! [`RunnerBook`] keeps every ladder of one runner and exposes the current
//! best back/lay view for downstream consumers.

use pf_core::types::{LevelPriceSize, PriceSize, Projected};

use crate::protocol::RunnerChange;

/// Tolerance for floating-point price comparison.
const PRICE_EPS: f64 = 1e-10;

/// Ladder keyed by position (level 0 = best).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LevelLadder {
    /// Sorted ascending by level.
    levels: Vec<LevelPriceSize>,
}

impl LevelLadder {
    pub fn apply(&mut self, changes: &[LevelPriceSize]) {
        for change in changes {
            let pos = self.levels.binary_search_by_key(&change.level(), |l| l.level());
            match (pos, change.size() == 0.0) {
                (Ok(idx), true) => {
                    self.levels.remove(idx);
                }
                (Ok(idx), false) => self.levels[idx] = *change,
                (Err(_), true) => {}
                (Err(idx), false) => self.levels.insert(idx, *change),
            }
        }
    }

    /// Levels best first, as `[price, size]`.
    pub fn to_vec(&self) -> Vec<PriceSize> {
        self.levels
            .iter()
            .map(|l| PriceSize(l.price(), l.size()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn clear(&mut self) {
        self.levels.clear();
    }
}

/// Sort direction of a [`PriceLadder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    /// Highest price first (back side).
    Descending,
    /// Lowest price first (lay side, traded).
    #[default]
    Ascending,
}

/// Ladder keyed by price.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceLadder {
    order: Order,
    levels: Vec<PriceSize>,
}

impl PriceLadder {
    pub fn new(order: Order) -> Self {
        Self {
            order,
            levels: Vec::new(),
        }
    }

    pub fn apply(&mut self, changes: &[PriceSize]) {
        for change in changes {
            match self.order {
                Order::Descending => update_side_desc(&mut self.levels, change.price(), change.size()),
                Order::Ascending => update_side_asc(&mut self.levels, change.price(), change.size()),
            }
        }
    }

    pub fn levels(&self) -> &[PriceSize] {
        &self.levels
    }

    pub fn best(&self) -> Option<PriceSize> {
        self.levels.first().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn clear(&mut self) {
        self.levels.clear();
    }
}

/// Current ladders and scalar prices of one runner.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerBook {
    pub batb: LevelLadder,
    pub batl: LevelLadder,
    pub bdatb: LevelLadder,
    pub bdatl: LevelLadder,
    pub atb: PriceLadder,
    pub atl: PriceLadder,
    pub trd: PriceLadder,
    pub spb: PriceLadder,
    pub spl: PriceLadder,
    pub ltp: Option<f64>,
    pub tv: Option<f64>,
    pub spn: Option<Projected>,
    pub spf: Option<Projected>,
}

impl Default for RunnerBook {
    fn default() -> Self {
        Self {
            batb: LevelLadder::default(),
            batl: LevelLadder::default(),
            bdatb: LevelLadder::default(),
            bdatl: LevelLadder::default(),
            atb: PriceLadder::new(Order::Descending),
            atl: PriceLadder::new(Order::Ascending),
            trd: PriceLadder::new(Order::Ascending),
            // Starting-price back side is offered from the top like `atb`.
            spb: PriceLadder::new(Order::Descending),
            spl: PriceLadder::new(Order::Ascending),
            ltp: None,
            tv: None,
            spn: None,
            spf: None,
        }
    }
}

impl RunnerBook {
    /// Merge one runner change into the book.
    pub fn apply(&mut self, rc: &RunnerChange) {
        self.batb.apply(&rc.batb);
        self.batl.apply(&rc.batl);
        self.bdatb.apply(&rc.bdatb);
        self.bdatl.apply(&rc.bdatl);
        self.atb.apply(&rc.atb);
        self.atl.apply(&rc.atl);
        self.trd.apply(&rc.trd);
        self.spb.apply(&rc.spb);
        self.spl.apply(&rc.spl);
        if rc.ltp.is_some() {
            self.ltp = rc.ltp;
        }
        if rc.tv.is_some() {
            self.tv = rc.tv;
        }
        if rc.spn.is_some() {
            self.spn = rc.spn;
        }
        if rc.spf.is_some() {
            self.spf = rc.spf;
        }
    }

    /// Available-to-back, best first, from whichever ladder the subscription
    /// populates (`batb`, then `bdatb`, then full depth).
    pub fn back(&self) -> Vec<PriceSize> {
        if !self.batb.is_empty() {
            self.batb.to_vec()
        } else if !self.bdatb.is_empty() {
            self.bdatb.to_vec()
        } else {
            self.atb.levels().to_vec()
        }
    }

    /// Available-to-lay, best first.
    pub fn lay(&self) -> Vec<PriceSize> {
        if !self.batl.is_empty() {
            self.batl.to_vec()
        } else if !self.bdatl.is_empty() {
            self.bdatl.to_vec()
        } else {
            self.atl.levels().to_vec()
        }
    }

    pub fn traded(&self) -> Vec<PriceSize> {
        self.trd.levels().to_vec()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Update a side sorted **descending** by price.
fn update_side_desc(levels: &mut Vec<PriceSize>, price: f64, size: f64) {
    if let Some(idx) = levels.iter().position(|l| (l.0 - price).abs() < PRICE_EPS) {
        if size == 0.0 {
            levels.remove(idx);
        } else {
            levels[idx].1 = size;
        }
    } else if size > 0.0 {
        let pos = levels
            .iter()
            .position(|l| l.0 < price)
            .unwrap_or(levels.len());
        levels.insert(pos, PriceSize(price, size));
    }
}

/// Update a side sorted **ascending** by price.
fn update_side_asc(levels: &mut Vec<PriceSize>, price: f64, size: f64) {
    if let Some(idx) = levels.iter().position(|l| (l.0 - price).abs() < PRICE_EPS) {
        if size == 0.0 {
            levels.remove(idx);
        } else {
            levels[idx].1 = size;
        }
    } else if size > 0.0 {
        let pos = levels
            .iter()
            .position(|l| l.0 > price)
            .unwrap_or(levels.len());
        levels.insert(pos, PriceSize(price, size));
    }
}
