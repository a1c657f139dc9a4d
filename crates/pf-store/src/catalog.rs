//! Read-only market metadata from the catalog collaborator.
//!
//! Market definitions on the stream carry no market or event names and often
//! no runner names. The writer falls back to a [`CatalogLookup`] for those.
//! Whoever owns the catalog client fills an [`InMemoryCatalog`]; lookups that
//! miss are recorded so the owner knows what to fetch next, and the whole
//! catalog is reset explicitly at a session boundary.

use std::sync::{Mutex, RwLock};

use ahash::{AHashMap, AHashSet};
use tracing::debug;

/// Catalog metadata for one market.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogMarket {
    pub market_id: String,
    pub market_name: Option<String>,
    pub event_name: Option<String>,
    pub venue: Option<String>,
    /// Selection id → runner name.
    pub runner_names: AHashMap<u64, String>,
}

impl CatalogMarket {
    pub fn runner_name(&self, selection_id: u64) -> Option<&str> {
        self.runner_names.get(&selection_id).map(String::as_str)
    }
}

/// Read-only access to catalog metadata by market id.
pub trait CatalogLookup: Send + Sync {
    fn lookup(&self, market_id: &str) -> Option<CatalogMarket>;

    /// Record that metadata for `market_id` was wanted but absent.
    fn note_missing(&self, _market_id: &str) {}
}

/// Catalog with no entries.
pub struct NoCatalog;

impl CatalogLookup for NoCatalog {
    fn lookup(&self, _market_id: &str) -> Option<CatalogMarket> {
        None
    }
}

#[derive(Default)]
pub struct InMemoryCatalog {
    markets: RwLock<AHashMap<String, CatalogMarket>>,
    missing: Mutex<AHashSet<String>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, market: CatalogMarket) {
        let id = market.market_id.clone();
        self.markets
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), market);
        self.missing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }

    /// Market ids looked up but not present, drained.
    pub fn take_missing(&self) -> Vec<String> {
        let mut missing = self.missing.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = missing.drain().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.markets.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget everything (new trading day / session).
    pub fn reset_session(&self) {
        self.markets.write().unwrap_or_else(|e| e.into_inner()).clear();
        self.missing.lock().unwrap_or_else(|e| e.into_inner()).clear();
        debug!("[catalog] session reset");
    }
}

impl CatalogLookup for InMemoryCatalog {
    fn lookup(&self, market_id: &str) -> Option<CatalogMarket> {
        self.markets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(market_id)
            .cloned()
    }

    fn note_missing(&self, market_id: &str) {
        self.missing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(market_id.to_string());
    }
}
