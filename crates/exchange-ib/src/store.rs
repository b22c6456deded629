//! Execution history persistence, deduplicated by execution id.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{debug, info};

use crate::error::Result;
use crate::types::{Execution, OrderSide, SecType};

/// Append-only store of executions.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Insert unless an execution with the same dedup key exists.
    /// Returns true when a new row was written.
    async fn insert_if_absent(&self, execution: &Execution) -> Result<bool>;

    /// Stored executions, oldest first.
    async fn list(&self) -> Result<Vec<Execution>>;
}

/// Process-local store used by tests and the paper CLI.
#[derive(Default)]
pub struct InMemoryExecutionStore {
    rows: Mutex<(HashSet<String>, Vec<Execution>)>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().1.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn insert_if_absent(&self, execution: &Execution) -> Result<bool> {
        let mut rows = self.rows.lock();
        let (keys, executions) = &mut *rows;
        if !keys.insert(execution.dedup_key()) {
            return Ok(false);
        }
        executions.push(execution.clone());
        Ok(true)
    }

    async fn list(&self) -> Result<Vec<Execution>> {
        let mut executions = self.rows.lock().1.clone();
        executions.sort_by_key(|e| e.time);
        Ok(executions)
    }
}

const CREATE_EXECUTIONS_TABLE: &str = r"
    CREATE TABLE IF NOT EXISTS ib_executions (
        dedup_key   TEXT PRIMARY KEY,
        exec_id     TEXT NOT NULL,
        order_id    BIGINT NOT NULL,
        symbol      TEXT NOT NULL,
        sec_type    TEXT NOT NULL,
        side        TEXT NOT NULL,
        shares      NUMERIC NOT NULL,
        price       NUMERIC NOT NULL,
        executed_at TIMESTAMPTZ NOT NULL,
        commission  NUMERIC,
        recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
";

/// PostgreSQL-backed execution store.
pub struct PgExecutionStore {
    pool: PgPool,
}

impl PgExecutionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and make sure the table exists.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        let store = Self::new(pool);
        store.ensure_schema().await?;
        info!("Execution store connected");
        Ok(store)
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(CREATE_EXECUTIONS_TABLE)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn sec_type_code(sec_type: SecType) -> String {
    sec_type.to_string()
}

fn parse_sec_type(code: &str) -> SecType {
    match code {
        "OPT" => SecType::Option,
        "BAG" => SecType::Bag,
        _ => SecType::Stock,
    }
}

fn parse_side(code: &str) -> OrderSide {
    match code {
        "SELL" => OrderSide::Sell,
        _ => OrderSide::Buy,
    }
}

type ExecutionRow = (
    String,          // exec_id
    i64,             // order_id
    String,          // symbol
    String,          // sec_type
    String,          // side
    Decimal,         // shares
    Decimal,         // price
    DateTime<Utc>,   // executed_at
    Option<Decimal>, // commission
);

#[async_trait]
impl ExecutionStore for PgExecutionStore {
    async fn insert_if_absent(&self, execution: &Execution) -> Result<bool> {
        let result = sqlx::query(
            r"
            INSERT INTO ib_executions
                (dedup_key, exec_id, order_id, symbol, sec_type, side,
                 shares, price, executed_at, commission)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (dedup_key) DO NOTHING
            ",
        )
        .bind(execution.dedup_key())
        .bind(&execution.exec_id)
        .bind(execution.order_id)
        .bind(&execution.symbol)
        .bind(sec_type_code(execution.sec_type))
        .bind(execution.side.to_string())
        .bind(execution.shares)
        .bind(execution.price)
        .bind(execution.time)
        .bind(execution.commission)
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() > 0;
        if !inserted {
            debug!(exec_id = execution.exec_id, "Execution already stored");
        }
        Ok(inserted)
    }

    async fn list(&self) -> Result<Vec<Execution>> {
        let rows = sqlx::query_as::<_, ExecutionRow>(
            r"
            SELECT exec_id, order_id, symbol, sec_type, side,
                   shares, price, executed_at, commission
            FROM ib_executions
            ORDER BY executed_at ASC
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Execution {
                exec_id: row.0,
                order_id: row.1,
                symbol: row.2,
                sec_type: parse_sec_type(&row.3),
                side: parse_side(&row.4),
                shares: row.5,
                price: row.6,
                time: row.7,
                commission: row.8,
            })
            .collect())
    }
}
