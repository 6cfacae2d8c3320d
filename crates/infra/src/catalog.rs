//! Product catalog operations.
//!
//! Stock is set once at creation as the opening balance; every later change
//! goes through [`crate::ledger::StockLedger`].

use chrono::Utc;
use tracing::{info, instrument};

use stockflow_core::ProductId;
use stockflow_inventory::{NewProduct, Product, ProductUpdate};

use crate::ledger::LedgerError;
use crate::store::{ProductStore, StoreError};

#[derive(Debug, Clone)]
pub struct ProductCatalog<S> {
    store: S,
}

impl<S> ProductCatalog<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S> ProductCatalog<S>
where
    S: ProductStore,
{
    #[instrument(skip(self, cmd), fields(sku = %cmd.sku))]
    pub async fn create(&self, cmd: NewProduct) -> Result<Product, LedgerError> {
        let product = cmd.into_product(ProductId::new(), Utc::now())?;

        self.store
            .insert_product(product.clone())
            .await
            .map_err(|e| match e {
                StoreError::UniqueViolation(_) => {
                    LedgerError::Conflict("Product SKU already exists".to_string())
                }
                other => LedgerError::PersistenceFailure(other),
            })?;

        info!(product_id = %product.id, stock = product.stock, "product created");
        Ok(product)
    }

    pub async fn get(&self, id: ProductId) -> Result<Product, LedgerError> {
        self.store.get_product(id).await?.ok_or(LedgerError::NotFound)
    }

    pub async fn list(&self) -> Result<Vec<Product>, LedgerError> {
        Ok(self.store.list_products().await?)
    }

    #[instrument(skip(self, update), fields(product_id = %id))]
    pub async fn update(&self, id: ProductId, update: ProductUpdate) -> Result<Product, LedgerError> {
        update.validate()?;

        let mut product = self.get(id).await?;
        update.apply_to(&mut product, Utc::now())?;

        if !self.store.update_product(&product).await? {
            return Err(LedgerError::NotFound);
        }
        info!("product updated");
        Ok(product)
    }

    /// Delete a product together with its movement history.
    #[instrument(skip(self), fields(product_id = %id))]
    pub async fn delete(&self, id: ProductId) -> Result<(), LedgerError> {
        if !self.store.delete_product(id).await? {
            return Err(LedgerError::NotFound);
        }
        info!("product deleted");
        Ok(())
    }
}
