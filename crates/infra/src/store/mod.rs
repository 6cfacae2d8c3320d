//! Persistence boundary for products and the stock-movement ledger.
//!
//! The ledger never touches a database handle directly. It opens a
//! [`LedgerTransaction`] through a [`LedgerStore`], runs its sequential
//! statements against it, and commits or rolls back as a unit. Engines decide
//! how a transaction keeps concurrent writers on the same product apart.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use stockflow_core::ProductId;
use stockflow_inventory::{NewMovement, Product, StockMovement};

pub mod in_memory;
pub mod postgres;

pub use in_memory::{InMemoryLedgerTx, InMemoryStore};
pub use postgres::{PostgresLedgerTx, PostgresStore};

/// Infrastructure failure inside a persistence engine.
///
/// A transaction that returns any of these is discarded by the engine; no
/// staged write survives it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Connection could not be acquired or was lost (pool closed, timeout, IO).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("referenced row missing: {0}")]
    ForeignKeyViolation(String),

    #[error("check constraint violated: {0}")]
    CheckViolation(String),

    /// Any other engine error (bad row shape, unexpected statement failure).
    #[error("database error: {0}")]
    Database(String),
}

/// Which slice of the ledger to read, newest first.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MovementFilter {
    pub product_id: Option<ProductId>,
    pub limit: usize,
}

/// A ledger row as returned by listings.
///
/// `product_name` is a read-only join filled in for the cross-product
/// listing only; it is `None` when filtering by product or when the product
/// row no longer exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MovementEntry {
    #[serde(flatten)]
    pub movement: StockMovement,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
}

/// Transactional access to product stock and the movement table.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    type Tx: LedgerTransaction;

    /// Open a transaction. Dropping it without `commit` discards its writes.
    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    /// Read committed movements, newest first (`created_at`, then `id`).
    async fn list_movements(&self, filter: MovementFilter) -> Result<Vec<MovementEntry>, StoreError>;
}

/// One open ledger transaction.
#[async_trait]
pub trait LedgerTransaction: Send {
    /// Read a product's stock and hold it against other writers until this
    /// transaction ends. `None` if the product does not exist.
    async fn lock_product_stock(&mut self, product_id: ProductId) -> Result<Option<i64>, StoreError>;

    async fn update_product_stock(&mut self, product_id: ProductId, stock: i64) -> Result<(), StoreError>;

    /// Append a movement row; the engine assigns `id` and `created_at`.
    async fn insert_movement(&mut self, movement: NewMovement) -> Result<StockMovement, StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

/// Product rows (the catalog side of the ledger).
#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn insert_product(&self, product: Product) -> Result<(), StoreError>;

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError>;

    /// All products, newest first.
    async fn list_products(&self) -> Result<Vec<Product>, StoreError>;

    /// Persist descriptive fields (`name`, `description`, `unit_price`,
    /// `updated_at`). Never writes `stock`. Returns `false` if no row matched.
    async fn update_product(&self, product: &Product) -> Result<bool, StoreError>;

    /// Delete a product and its movements. Returns `false` if no row matched.
    async fn delete_product(&self, id: ProductId) -> Result<bool, StoreError>;
}

#[async_trait]
impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore,
{
    type Tx = S::Tx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        (**self).begin().await
    }

    async fn list_movements(&self, filter: MovementFilter) -> Result<Vec<MovementEntry>, StoreError> {
        (**self).list_movements(filter).await
    }
}

#[async_trait]
impl<S> ProductStore for Arc<S>
where
    S: ProductStore,
{
    async fn insert_product(&self, product: Product) -> Result<(), StoreError> {
        (**self).insert_product(product).await
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        (**self).get_product(id).await
    }

    async fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        (**self).list_products().await
    }

    async fn update_product(&self, product: &Product) -> Result<bool, StoreError> {
        (**self).update_product(product).await
    }

    async fn delete_product(&self, id: ProductId) -> Result<bool, StoreError> {
        (**self).delete_product(id).await
    }
}
