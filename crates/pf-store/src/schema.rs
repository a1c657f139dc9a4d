//! Relational schema of the price store.
//!
//! Three tables, each keyed so that every write is an upsert:
//!
//! - `runners`: one baseline row per roster entry, `(market_id, selection_id, handicap)`
//! - `price_rows`: one row per ladder level,
//!   `(market_id, selection_id, handicap, price_type, price)`
//! - `runner_projections`: starting-price projections and last-traded price,
//!   `(market_id, selection_id, handicap)`
//!
//! Runners without a handicap are stored with `handicap = 0`.

use sqlx::SqlitePool;
use tracing::info;

pub const SCHEMA_VERSION: i64 = 2;

const CREATE_RUNNERS: &str = r#"
CREATE TABLE IF NOT EXISTS runners (
    market_id      TEXT    NOT NULL,
    selection_id   INTEGER NOT NULL,
    handicap       REAL    NOT NULL DEFAULT 0,
    runner_name    TEXT,
    runner_status  TEXT    NOT NULL,
    sort_priority  INTEGER,
    market_name    TEXT,
    event_name     TEXT,
    venue          TEXT,
    market_status  TEXT    NOT NULL,
    in_play        INTEGER NOT NULL DEFAULT 0,
    definition_version INTEGER NOT NULL DEFAULT 0,
    updated_at     INTEGER NOT NULL,
    PRIMARY KEY (market_id, selection_id, handicap)
)
"#;

const CREATE_PRICE_ROWS: &str = r#"
CREATE TABLE IF NOT EXISTS price_rows (
    market_id      TEXT    NOT NULL,
    selection_id   INTEGER NOT NULL,
    handicap       REAL    NOT NULL DEFAULT 0,
    price_type     TEXT    NOT NULL,
    price          REAL    NOT NULL,
    size           REAL    NOT NULL,
    runner_name    TEXT,
    market_status  TEXT,
    in_play        INTEGER NOT NULL DEFAULT 0,
    updated_at     INTEGER NOT NULL,
    PRIMARY KEY (market_id, selection_id, handicap, price_type, price)
)
"#;

const CREATE_PROJECTIONS: &str = r#"
CREATE TABLE IF NOT EXISTS runner_projections (
    market_id      TEXT    NOT NULL,
    selection_id   INTEGER NOT NULL,
    handicap       REAL    NOT NULL DEFAULT 0,
    sp_near        REAL,
    sp_far         REAL,
    last_traded    REAL,
    traded_volume  REAL,
    updated_at     INTEGER NOT NULL,
    PRIMARY KEY (market_id, selection_id, handicap)
)
"#;

const CREATE_META: &str = r#"
CREATE TABLE IF NOT EXISTS schema_meta (
    id      INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL
)
"#;

/// Create all tables if they do not exist and record the schema version.
pub async fn initialize_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for ddl in [CREATE_RUNNERS, CREATE_PRICE_ROWS, CREATE_PROJECTIONS, CREATE_META] {
        sqlx::query(ddl).execute(pool).await?;
    }
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_price_rows_market ON price_rows (market_id, updated_at)",
    )
    .execute(pool)
    .await?;
    sqlx::query("INSERT OR IGNORE INTO schema_meta (id, version) VALUES (1, ?)")
        .bind(SCHEMA_VERSION)
        .execute(pool)
        .await?;
    info!("[store] schema ready (version {SCHEMA_VERSION})");
    Ok(())
}

pub async fn get_schema_version(pool: &SqlitePool) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar("SELECT version FROM schema_meta WHERE id = 1")
        .fetch_optional(pool)
        .await
}
