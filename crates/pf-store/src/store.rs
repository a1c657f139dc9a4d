//! SQLite-backed price store.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use pf_core::config::StoreConfig;
use pf_core::error::StoreError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::rows::{PriceRow, ProjectionRow, RunnerRow, SideReplacement, WriteOp};
use crate::schema;

/// Destination of planned writes.
///
/// Implementations must report contention as [`StoreError::Transient`] so the
/// writer retries; anything else is abandoned after one attempt.
#[async_trait]
pub trait PriceStore: Send + Sync {
    async fn apply(&self, op: &WriteOp) -> Result<(), StoreError>;
}

// SQLite primary result codes (low byte of the extended code).
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Map a driver error onto the writer's retry classes.
pub fn classify(err: sqlx::Error) -> StoreError {
    let transient = match &err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|c| c.parse::<i32>().ok())
            .map(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
            .unwrap_or_else(|| db.message().contains("database is locked")),
        _ => false,
    };
    if transient {
        StoreError::Transient(err.to_string())
    } else {
        StoreError::Fatal(err.to_string())
    }
}

const UPSERT_RUNNER: &str = r#"
INSERT INTO runners (market_id, selection_id, handicap, runner_name, runner_status,
    sort_priority, market_name, event_name, venue, market_status, in_play,
    definition_version, updated_at)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT (market_id, selection_id, handicap) DO UPDATE SET
    runner_name = COALESCE(excluded.runner_name, runners.runner_name),
    runner_status = excluded.runner_status,
    sort_priority = excluded.sort_priority,
    market_name = COALESCE(excluded.market_name, runners.market_name),
    event_name = COALESCE(excluded.event_name, runners.event_name),
    venue = COALESCE(excluded.venue, runners.venue),
    market_status = excluded.market_status,
    in_play = excluded.in_play,
    definition_version = excluded.definition_version,
    updated_at = excluded.updated_at
"#;

const ZERO_SIDE: &str = r#"
UPDATE price_rows SET size = 0, updated_at = ?
WHERE market_id = ? AND selection_id = ? AND handicap = ? AND price_type = ? AND size <> 0
"#;

const UPSERT_PRICE: &str = r#"
INSERT INTO price_rows (market_id, selection_id, handicap, price_type, price, size,
    runner_name, market_status, in_play, updated_at)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT (market_id, selection_id, handicap, price_type, price) DO UPDATE SET
    size = excluded.size,
    runner_name = COALESCE(excluded.runner_name, price_rows.runner_name),
    market_status = COALESCE(excluded.market_status, price_rows.market_status),
    in_play = excluded.in_play,
    updated_at = excluded.updated_at
"#;

const UPSERT_PROJECTION: &str = r#"
INSERT INTO runner_projections (market_id, selection_id, handicap, sp_near, sp_far,
    last_traded, traded_volume, updated_at)
VALUES (?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT (market_id, selection_id, handicap) DO UPDATE SET
    sp_near = excluded.sp_near,
    sp_far = excluded.sp_far,
    last_traded = excluded.last_traded,
    traded_volume = excluded.traded_volume,
    updated_at = excluded.updated_at
"#;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database named by `config` and make sure
    /// the schema exists.
    pub async fn open(config: &StoreConfig) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        // Every connection to an in-memory database is a separate database.
        let max_connections = if config.database_url.contains(":memory:") {
            1
        } else {
            config.max_connections.max(1)
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        info!(
            "[store] opened {} ({} connections)",
            config.database_url, max_connections
        );
        Ok(Self::from_pool(pool).await?)
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, sqlx::Error> {
        schema::initialize_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn ensure_runners(&self, rows: &[RunnerRow]) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(UPSERT_RUNNER)
                .bind(&row.market_id)
                .bind(row.selection_id)
                .bind(row.handicap)
                .bind(&row.runner_name)
                .bind(&row.runner_status)
                .bind(row.sort_priority)
                .bind(&row.market_name)
                .bind(&row.event_name)
                .bind(&row.venue)
                .bind(&row.market_status)
                .bind(row.in_play)
                .bind(row.definition_version)
                .bind(row.updated_at)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await
    }

    /// Zero the side, then upsert the current levels, in one transaction.
    /// Levels that left the ladder keep their row with size 0.
    async fn replace_side(&self, side: &SideReplacement) -> Result<(), sqlx::Error> {
        let price_type = side.price_type.as_str();
        let mut tx = self.pool.begin().await?;
        sqlx::query(ZERO_SIDE)
            .bind(side.updated_at)
            .bind(&side.market_id)
            .bind(side.selection_id)
            .bind(side.handicap)
            .bind(price_type)
            .execute(&mut *tx)
            .await?;
        for level in &side.levels {
            sqlx::query(UPSERT_PRICE)
                .bind(&side.market_id)
                .bind(side.selection_id)
                .bind(side.handicap)
                .bind(price_type)
                .bind(level.price())
                .bind(level.size())
                .bind(&side.runner_name)
                .bind(&side.market_status)
                .bind(side.in_play)
                .bind(side.updated_at)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await
    }

    async fn upsert_projection(&self, row: &ProjectionRow) -> Result<(), sqlx::Error> {
        sqlx::query(UPSERT_PROJECTION)
            .bind(&row.market_id)
            .bind(row.selection_id)
            .bind(row.handicap)
            .bind(row.sp_near)
            .bind(row.sp_far)
            .bind(row.last_traded)
            .bind(row.traded_volume)
            .bind(row.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn runners(&self, market_id: &str) -> Result<Vec<RunnerRow>, sqlx::Error> {
        sqlx::query_as::<_, RunnerRow>(
            "SELECT * FROM runners WHERE market_id = ? ORDER BY selection_id, handicap",
        )
        .bind(market_id)
        .fetch_all(&self.pool)
        .await
    }

    /// All price rows of a market, zero-size rows included.
    pub async fn price_rows(&self, market_id: &str) -> Result<Vec<PriceRow>, sqlx::Error> {
        sqlx::query_as::<_, PriceRow>(
            "SELECT * FROM price_rows WHERE market_id = ? \
             ORDER BY selection_id, handicap, price_type, price",
        )
        .bind(market_id)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn projection(
        &self,
        market_id: &str,
        selection_id: i64,
        handicap: f64,
    ) -> Result<Option<ProjectionRow>, sqlx::Error> {
        sqlx::query_as::<_, ProjectionRow>(
            "SELECT * FROM runner_projections \
             WHERE market_id = ? AND selection_id = ? AND handicap = ?",
        )
        .bind(market_id)
        .bind(selection_id)
        .bind(handicap)
        .fetch_optional(&self.pool)
        .await
    }
}

#[async_trait]
impl PriceStore for SqliteStore {
    async fn apply(&self, op: &WriteOp) -> Result<(), StoreError> {
        match op {
            WriteOp::EnsureRunners { rows, .. } => self.ensure_runners(rows).await,
            WriteOp::ReplaceSide(side) => self.replace_side(side).await,
            WriteOp::UpsertProjection(row) => self.upsert_projection(row).await,
        }
        .map_err(classify)
    }
}
