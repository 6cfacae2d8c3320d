//! Postgres-backed engine for products and the movement ledger.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `UniqueViolation` |
//! | Database (foreign key violation) | `23503` | `ForeignKeyViolation` |
//! | Database (check constraint violation) | `23514` | `CheckViolation` |
//! | Database (other) | Any other | `Database` |
//! | PoolClosed / PoolTimedOut / Io | N/A | `Unavailable` |
//! | Other | N/A | `Database` |
//!
//! ## Locking
//!
//! A ledger transaction reads the product with `SELECT ... FOR UPDATE`, so a
//! second writer on the same product blocks until the first commits or rolls
//! back and then sees the committed stock.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use stockflow_core::{MovementId, ProductId};
use stockflow_inventory::{MovementType, NewMovement, Product, StockMovement};

use super::{
    LedgerStore, LedgerTransaction, MovementEntry, MovementFilter, ProductStore, StoreError,
};

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Open transaction on a [`PostgresStore`]. Dropping it rolls back.
pub struct PostgresLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTransaction for PostgresLedgerTx {
    #[instrument(skip(self), fields(product_id = %product_id))]
    async fn lock_product_stock(&mut self, product_id: ProductId) -> Result<Option<i64>, StoreError> {
        let row = sqlx::query("SELECT stock FROM products WHERE id = $1 FOR UPDATE")
            .bind(product_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_product_stock", e))?;

        row.map(|r| r.try_get::<i64, _>("stock"))
            .transpose()
            .map_err(|e| StoreError::Database(format!("failed to read stock: {e}")))
    }

    #[instrument(skip(self), fields(product_id = %product_id))]
    async fn update_product_stock(&mut self, product_id: ProductId, stock: i64) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE products SET stock = $2, updated_at = NOW() WHERE id = $1")
            .bind(product_id.as_uuid())
            .bind(stock)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("update_product_stock", e))?;

        if result.rows_affected() != 1 {
            return Err(StoreError::Database(format!(
                "update_product_stock matched {} rows for product {product_id}",
                result.rows_affected()
            )));
        }
        Ok(())
    }

    #[instrument(
        skip(self, movement),
        fields(product_id = %movement.product_id, movement_type = %movement.movement_type)
    )]
    async fn insert_movement(&mut self, movement: NewMovement) -> Result<StockMovement, StoreError> {
        // created_at is bumped past the product's latest row so the
        // per-product order is strict even when the clock repeats.
        let row = sqlx::query(
            r#"
            INSERT INTO stock_movements (
                product_id,
                type,
                quantity,
                stock_before,
                stock_after,
                reference,
                created_at
            )
            VALUES (
                $1, $2, $3, $4, $5, $6,
                GREATEST(
                    clock_timestamp(),
                    (SELECT MAX(created_at) FROM stock_movements WHERE product_id = $1)
                        + INTERVAL '1 microsecond'
                )
            )
            RETURNING id, created_at
            "#,
        )
        .bind(movement.product_id.as_uuid())
        .bind(movement.movement_type.as_str())
        .bind(movement.change.quantity)
        .bind(movement.change.stock_before)
        .bind(movement.change.stock_after)
        .bind(&movement.reference)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_movement", e))?;

        let id: i64 = row
            .try_get("id")
            .map_err(|e| StoreError::Database(format!("failed to read movement id: {e}")))?;
        let created_at: DateTime<Utc> = row
            .try_get("created_at")
            .map_err(|e| StoreError::Database(format!("failed to read created_at: {e}")))?;

        Ok(StockMovement::from_new(movement, MovementId::new(id), created_at))
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

#[async_trait]
impl LedgerStore for PostgresStore {
    type Tx = PostgresLedgerTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(PostgresLedgerTx { tx })
    }

    #[instrument(skip(self), fields(product_id = ?filter.product_id, limit = filter.limit))]
    async fn list_movements(&self, filter: MovementFilter) -> Result<Vec<MovementEntry>, StoreError> {
        let limit = i64::try_from(filter.limit).unwrap_or(i64::MAX);

        let rows = match filter.product_id {
            Some(product_id) => sqlx::query(
                r#"
                SELECT
                    m.id, m.product_id, m.type, m.quantity, m.stock_before,
                    m.stock_after, m.reference, m.created_at,
                    NULL::text AS product_name
                FROM stock_movements m
                WHERE m.product_id = $1
                ORDER BY m.created_at DESC, m.id DESC
                LIMIT $2
                "#,
            )
            .bind(product_id.as_uuid())
            .bind(limit)
            .fetch_all(&*self.pool)
            .await,
            None => sqlx::query(
                r#"
                SELECT
                    m.id, m.product_id, m.type, m.quantity, m.stock_before,
                    m.stock_after, m.reference, m.created_at,
                    p.name AS product_name
                FROM stock_movements m
                LEFT JOIN products p ON p.id = m.product_id
                ORDER BY m.created_at DESC, m.id DESC
                LIMIT $1
                "#,
            )
            .bind(limit)
            .fetch_all(&*self.pool)
            .await,
        }
        .map_err(|e| map_sqlx_error("list_movements", e))?;

        rows.iter()
            .map(|row| -> Result<MovementEntry, StoreError> {
                MovementRow::from_row(row)
                    .map_err(|e| StoreError::Database(format!("failed to deserialize movement row: {e}")))?
                    .try_into()
            })
            .collect()
    }
}

#[async_trait]
impl ProductStore for PostgresStore {
    #[instrument(skip(self, product), fields(product_id = %product.id, sku = %product.sku))]
    async fn insert_product(&self, product: Product) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO products (
                id, sku, name, description, unit_price, stock, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.sku)
        .bind(&product.name)
        .bind(&product.description)
        .bind(price_to_db(product.unit_price)?)
        .bind(product.stock)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_product", e))?;

        Ok(())
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, sku, name, description, unit_price, stock, created_at, updated_at
            FROM products
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_product", e))?;

        row.map(|r| product_from_row(&r)).transpose()
    }

    async fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, sku, name, description, unit_price, stock, created_at, updated_at
            FROM products
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_products", e))?;

        rows.iter().map(product_from_row).collect()
    }

    #[instrument(skip(self, product), fields(product_id = %product.id))]
    async fn update_product(&self, product: &Product) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE products
            SET name = $2, description = $3, unit_price = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(&product.description)
        .bind(price_to_db(product.unit_price)?)
        .bind(product.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_product", e))?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(product_id = %id))]
    async fn delete_product(&self, id: ProductId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_product", e))?;

        Ok(result.rows_affected() > 0)
    }
}

fn price_to_db(price: u64) -> Result<i64, StoreError> {
    i64::try_from(price)
        .map_err(|_| StoreError::CheckViolation(format!("unit_price {price} exceeds BIGINT")))
}

fn product_from_row(row: &sqlx::postgres::PgRow) -> Result<Product, StoreError> {
    ProductRow::from_row(row)
        .map_err(|e| StoreError::Database(format!("failed to deserialize product row: {e}")))?
        .try_into()
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("{} in {}", db_err.message(), operation);
            match db_err.code().as_deref() {
                Some("23505") => StoreError::UniqueViolation(msg),
                Some("23503") => StoreError::ForeignKeyViolation(msg),
                Some("23514") => StoreError::CheckViolation(msg),
                _ => StoreError::Database(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(format!("timed out acquiring a connection in {operation}"))
        }
        sqlx::Error::Io(e) => StoreError::Unavailable(format!("io error in {operation}: {e}")),
        _ => StoreError::Database(format!("sqlx error in {operation}: {err}")),
    }
}

// SQLx row types

#[derive(Debug)]
struct MovementRow {
    id: i64,
    product_id: uuid::Uuid,
    movement_type: String,
    quantity: i64,
    stock_before: i64,
    stock_after: i64,
    reference: String,
    created_at: DateTime<Utc>,
    product_name: Option<String>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for MovementRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(MovementRow {
            id: row.try_get("id")?,
            product_id: row.try_get("product_id")?,
            movement_type: row.try_get("type")?,
            quantity: row.try_get("quantity")?,
            stock_before: row.try_get("stock_before")?,
            stock_after: row.try_get("stock_after")?,
            reference: row.try_get("reference")?,
            created_at: row.try_get("created_at")?,
            product_name: row.try_get("product_name")?,
        })
    }
}

impl TryFrom<MovementRow> for MovementEntry {
    type Error = StoreError;

    fn try_from(row: MovementRow) -> Result<Self, Self::Error> {
        let movement_type = MovementType::from_str(&row.movement_type).map_err(|_| {
            StoreError::Database(format!(
                "movement {} has unknown type '{}'",
                row.id, row.movement_type
            ))
        })?;

        Ok(MovementEntry {
            movement: StockMovement {
                id: MovementId::new(row.id),
                product_id: ProductId::from_uuid(row.product_id),
                movement_type,
                quantity: row.quantity,
                stock_before: row.stock_before,
                stock_after: row.stock_after,
                reference: row.reference,
                created_at: row.created_at,
            },
            product_name: row.product_name,
        })
    }
}

#[derive(Debug)]
struct ProductRow {
    id: uuid::Uuid,
    sku: String,
    name: String,
    description: Option<String>,
    unit_price: i64,
    stock: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for ProductRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(ProductRow {
            id: row.try_get("id")?,
            sku: row.try_get("sku")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            unit_price: row.try_get("unit_price")?,
            stock: row.try_get("stock")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<ProductRow> for Product {
    type Error = StoreError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        let unit_price = u64::try_from(row.unit_price).map_err(|_| {
            StoreError::Database(format!("product {} has negative unit_price", row.id))
        })?;

        Ok(Product {
            id: ProductId::from_uuid(row.id),
            sku: row.sku,
            name: row.name,
            description: row.description,
            unit_price,
            stock: row.stock,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
