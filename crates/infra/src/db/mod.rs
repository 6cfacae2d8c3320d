//! PostgreSQL connection pool and schema bootstrap.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::store::StoreError;

/// Connection pool parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl PoolSettings {
    pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
    pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: Self::DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: Self::DEFAULT_ACQUIRE_TIMEOUT,
        }
    }
}

pub async fn connect(settings: &PoolSettings) -> Result<PgPool, StoreError> {
    PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.acquire_timeout)
        .connect(&settings.url)
        .await
        .map_err(|e| StoreError::Unavailable(format!("failed to connect to database: {e}")))
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS products (
        id UUID PRIMARY KEY,
        sku TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        description TEXT,
        unit_price BIGINT NOT NULL DEFAULT 0 CHECK (unit_price >= 0),
        stock BIGINT NOT NULL DEFAULT 0 CHECK (stock >= 0),
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS stock_movements (
        id BIGSERIAL PRIMARY KEY,
        product_id UUID NOT NULL REFERENCES products (id) ON DELETE CASCADE,
        type TEXT NOT NULL CHECK (type IN ('in', 'out', 'adjustment')),
        quantity BIGINT NOT NULL,
        stock_before BIGINT NOT NULL,
        stock_after BIGINT NOT NULL CHECK (stock_after >= 0),
        reference TEXT NOT NULL DEFAULT '',
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        CHECK (stock_after = stock_before + quantity)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_stock_movements_product_created
        ON stock_movements (product_id, created_at DESC)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_stock_movements_created
        ON stock_movements (created_at DESC, id DESC)
    "#,
];

/// Create the tables and indexes if they do not exist yet. Idempotent.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), StoreError> {
    for statement in SCHEMA {
        sqlx::query(*statement)
            .execute(pool)
            .await
            .map_err(|e| StoreError::Database(format!("schema bootstrap failed: {e}")))?;
    }
    info!(statements = SCHEMA.len(), "database schema ensured");
    Ok(())
}
