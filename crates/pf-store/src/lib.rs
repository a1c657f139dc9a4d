//! # pf-store
//!
//! Throttled persistence of market-change events into SQLite.
//!
//! - [`writer`] — per-market throttle, bounded queue, single worker, retries
//! - [`rows`] — row types and the write plan for one event
//! - [`store`] — [`PriceStore`] trait and the sqlx SQLite implementation
//! - [`schema`] — table definitions
//! - [`catalog`] — read-only market/runner names

pub mod catalog;
pub mod rows;
pub mod schema;
pub mod store;
pub mod writer;

pub use catalog::{CatalogLookup, CatalogMarket, InMemoryCatalog, NoCatalog};
pub use store::{PriceStore, SqliteStore};
pub use writer::{SubmitOutcome, ThrottledWriter, WriterStatsSnapshot, run_event_pump};
