use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{DomainError, DomainResult, Entity, ProductId};

/// Largest price either persistence engine can store (`BIGINT`).
pub const MAX_UNIT_PRICE: u64 = i64::MAX as u64;

/// A catalog product and its current stock.
///
/// After creation `stock` is only changed through the movement ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    /// Price in smallest currency unit (e.g., cents).
    pub unit_price: u64,
    pub stock: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Command: create a product with an opening stock balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub unit_price: u64,
    pub initial_stock: i64,
}

impl NewProduct {
    pub fn validate(&self) -> DomainResult<()> {
        if self.sku.trim().is_empty() {
            return Err(DomainError::validation("sku cannot be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if self.initial_stock < 0 {
            return Err(DomainError::validation("initial stock cannot be negative"));
        }
        validate_unit_price(self.unit_price)
    }

    /// Build the product row, assigning identity and timestamps.
    pub fn into_product(self, id: ProductId, now: DateTime<Utc>) -> DomainResult<Product> {
        self.validate()?;
        Ok(Product {
            id,
            sku: self.sku.trim().to_string(),
            name: self.name.trim().to_string(),
            description: normalize_description(self.description),
            unit_price: self.unit_price,
            stock: self.initial_stock,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Command: change a product's descriptive fields. Stock is not touched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductUpdate {
    pub name: String,
    pub description: Option<String>,
    pub unit_price: u64,
}

impl ProductUpdate {
    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        validate_unit_price(self.unit_price)
    }

    pub fn apply_to(self, product: &mut Product, now: DateTime<Utc>) -> DomainResult<()> {
        self.validate()?;
        product.name = self.name.trim().to_string();
        product.description = normalize_description(self.description);
        product.unit_price = self.unit_price;
        product.updated_at = now;
        Ok(())
    }
}

fn validate_unit_price(unit_price: u64) -> DomainResult<()> {
    if unit_price > MAX_UNIT_PRICE {
        return Err(DomainError::validation("unit price is too large"));
    }
    Ok(())
}

fn normalize_description(description: Option<String>) -> Option<String> {
    description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
}
