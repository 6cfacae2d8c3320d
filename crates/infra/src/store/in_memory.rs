use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use stockflow_core::{Entity, MovementId, ProductId};
use stockflow_inventory::{NewMovement, Product, StockMovement};

use super::{
    LedgerStore, LedgerTransaction, MovementEntry, MovementFilter, ProductStore, StoreError,
};

#[derive(Debug, Default)]
struct State {
    products: HashMap<ProductId, Product>,
    /// Commit order.
    movements: Vec<StockMovement>,
    last_movement_id: i64,
}

impl State {
    fn latest_created_at(&self, product_id: ProductId) -> Option<DateTime<Utc>> {
        self.movements
            .iter()
            .rev()
            .find(|m| m.product_id == product_id)
            .map(|m| m.created_at)
    }
}

/// In-memory engine for products and the movement ledger.
///
/// Intended for tests/dev. A ledger transaction holds the store's single
/// async lock from `begin` until it ends, so writers are fully serialized.
/// Writes are staged on the transaction and published only on `commit`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Open transaction on an [`InMemoryStore`].
#[derive(Debug)]
pub struct InMemoryLedgerTx {
    guard: OwnedMutexGuard<State>,
    staged_stock: HashMap<ProductId, i64>,
    staged_movements: Vec<StockMovement>,
}

impl InMemoryLedgerTx {
    fn next_created_at(&self, product_id: ProductId) -> DateTime<Utc> {
        let latest = self
            .staged_movements
            .iter()
            .rev()
            .find(|m| m.product_id == product_id)
            .map(|m| m.created_at)
            .or_else(|| self.guard.latest_created_at(product_id));

        let now = Utc::now();
        match latest {
            Some(prev) if prev >= now => prev + Duration::microseconds(1),
            _ => now,
        }
    }
}

#[async_trait]
impl LedgerTransaction for InMemoryLedgerTx {
    async fn lock_product_stock(&mut self, product_id: ProductId) -> Result<Option<i64>, StoreError> {
        if let Some(stock) = self.staged_stock.get(&product_id) {
            return Ok(Some(*stock));
        }
        Ok(self.guard.products.get(&product_id).map(|p| p.stock))
    }

    async fn update_product_stock(&mut self, product_id: ProductId, stock: i64) -> Result<(), StoreError> {
        if stock < 0 {
            return Err(StoreError::CheckViolation(format!(
                "products.stock >= 0 (product {product_id}, value {stock})"
            )));
        }
        if !self.guard.products.contains_key(&product_id) {
            return Err(StoreError::Database(format!(
                "no product row {product_id} to update"
            )));
        }
        self.staged_stock.insert(product_id, stock);
        Ok(())
    }

    async fn insert_movement(&mut self, movement: NewMovement) -> Result<StockMovement, StoreError> {
        if !self.guard.products.contains_key(&movement.product_id) {
            return Err(StoreError::ForeignKeyViolation(format!(
                "stock_movements.product_id -> products.id ({})",
                movement.product_id
            )));
        }
        if movement.change.stock_after < 0 {
            return Err(StoreError::CheckViolation(
                "stock_movements.stock_after >= 0".to_string(),
            ));
        }

        let id = self.guard.last_movement_id + self.staged_movements.len() as i64 + 1;
        let created_at = self.next_created_at(movement.product_id);
        let stored = StockMovement::from_new(movement, MovementId::new(id), created_at);
        self.staged_movements.push(stored.clone());
        Ok(stored)
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        let now = Utc::now();
        let staged_stock = std::mem::take(&mut self.staged_stock);
        let staged_movements = std::mem::take(&mut self.staged_movements);

        // Validate before publishing anything so a failed commit changes nothing.
        for product_id in staged_stock.keys() {
            if !self.guard.products.contains_key(product_id) {
                return Err(StoreError::Database(format!(
                    "product {product_id} vanished before commit"
                )));
            }
        }

        for (product_id, stock) in staged_stock {
            if let Some(product) = self.guard.products.get_mut(&product_id) {
                product.stock = stock;
                product.updated_at = now;
            }
        }
        self.guard.last_movement_id += staged_movements.len() as i64;
        self.guard.movements.extend(staged_movements);
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        // Staged writes are dropped with the transaction; the lock is released.
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    type Tx = InMemoryLedgerTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        Ok(InMemoryLedgerTx {
            guard,
            staged_stock: HashMap::new(),
            staged_movements: Vec::new(),
        })
    }

    async fn list_movements(&self, filter: MovementFilter) -> Result<Vec<MovementEntry>, StoreError> {
        let state = self.state.lock().await;

        let mut rows: Vec<&StockMovement> = state
            .movements
            .iter()
            .filter(|m| filter.product_id.is_none_or(|id| m.product_id == id))
            .collect();
        rows.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        Ok(rows
            .into_iter()
            .take(filter.limit)
            .map(|m| MovementEntry {
                movement: m.clone(),
                product_name: match filter.product_id {
                    Some(_) => None,
                    None => state.products.get(&m.product_id).map(|p| p.name.clone()),
                },
            })
            .collect())
    }
}

#[async_trait]
impl ProductStore for InMemoryStore {
    async fn insert_product(&self, product: Product) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let id = *product.id();

        if state.products.contains_key(&id) {
            return Err(StoreError::UniqueViolation(format!("products.id ({id})")));
        }
        if state.products.values().any(|p| p.sku == product.sku) {
            return Err(StoreError::UniqueViolation(format!("products.sku ({})", product.sku)));
        }
        if product.stock < 0 {
            return Err(StoreError::CheckViolation("products.stock >= 0".to_string()));
        }

        state.products.insert(id, product);
        Ok(())
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self.state.lock().await.products.get(&id).cloned())
    }

    async fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        let state = self.state.lock().await;
        let mut products: Vec<Product> = state.products.values().cloned().collect();
        products.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(products)
    }

    async fn update_product(&self, product: &Product) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match state.products.get_mut(&product.id) {
            Some(existing) => {
                existing.name = product.name.clone();
                existing.description = product.description.clone();
                existing.unit_price = product.unit_price;
                existing.updated_at = product.updated_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_product(&self, id: ProductId) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        if state.products.remove(&id).is_none() {
            return Ok(false);
        }
        state.movements.retain(|m| m.product_id != id);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockflow_inventory::{MovementType, StockChange};

    fn product(sku: &str, stock: i64) -> Product {
        let now = Utc::now();
        Product {
            id: ProductId::new(),
            sku: sku.to_string(),
            name: format!("Product {sku}"),
            description: None,
            unit_price: 100,
            stock,
            created_at: now,
            updated_at: now,
        }
    }

    fn new_movement(product_id: ProductId, before: i64, quantity: i64) -> NewMovement {
        NewMovement {
            product_id,
            movement_type: MovementType::Adjustment,
            change: StockChange::compute(before, quantity).unwrap(),
            reference: String::new(),
        }
    }

    fn all(limit: usize) -> MovementFilter {
        MovementFilter {
            product_id: None,
            limit,
        }
    }

    #[tokio::test]
    async fn dropped_transaction_publishes_nothing() {
        let store = InMemoryStore::new();
        let p = product("A", 5);
        store.insert_product(p.clone()).await.unwrap();

        {
            let mut tx = store.begin().await.unwrap();
            tx.update_product_stock(p.id, 9).await.unwrap();
            tx.insert_movement(new_movement(p.id, 5, 4)).await.unwrap();
            assert_eq!(tx.lock_product_stock(p.id).await.unwrap(), Some(9));
        }

        assert_eq!(store.get_product(p.id).await.unwrap().unwrap().stock, 5);
        assert!(store.list_movements(all(100)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn commit_publishes_stock_and_movement_together() {
        let store = InMemoryStore::new();
        let p = product("A", 5);
        store.insert_product(p.clone()).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.update_product_stock(p.id, 9).await.unwrap();
        let m = tx.insert_movement(new_movement(p.id, 5, 4)).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(m.id, MovementId::new(1));
        assert_eq!(store.get_product(p.id).await.unwrap().unwrap().stock, 9);
        let listed = store.list_movements(all(100)).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].movement, m);
        assert_eq!(listed[0].product_name.as_deref(), Some("Product A"));
    }

    #[tokio::test]
    async fn insert_movement_requires_existing_product() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let err = tx
            .insert_movement(new_movement(ProductId::new(), 0, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ForeignKeyViolation(_)));
    }

    #[tokio::test]
    async fn negative_stock_is_refused_by_the_engine() {
        let store = InMemoryStore::new();
        let p = product("A", 5);
        store.insert_product(p.clone()).await.unwrap();
        let mut tx = store.begin().await.unwrap();
        let err = tx.update_product_stock(p.id, -1).await.unwrap_err();
        assert!(matches!(err, StoreError::CheckViolation(_)));
    }

    #[tokio::test]
    async fn created_at_strictly_increases_per_product() {
        let store = InMemoryStore::new();
        let p = product("A", 0);
        store.insert_product(p.clone()).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let mut stock = 0;
        for _ in 0..20 {
            tx.insert_movement(new_movement(p.id, stock, 1)).await.unwrap();
            stock += 1;
        }
        tx.update_product_stock(p.id, stock).await.unwrap();
        tx.commit().await.unwrap();

        let listed = store
            .list_movements(MovementFilter {
                product_id: Some(p.id),
                limit: 50,
            })
            .await
            .unwrap();
        assert_eq!(listed.len(), 20);
        for pair in listed.windows(2) {
            assert!(pair[0].movement.created_at > pair[1].movement.created_at);
        }
        assert!(listed.iter().all(|e| e.product_name.is_none()));
    }

    #[tokio::test]
    async fn list_respects_limit() {
        let store = InMemoryStore::new();
        let p = product("A", 0);
        store.insert_product(p.clone()).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        for i in 0..5 {
            tx.insert_movement(new_movement(p.id, i, 1)).await.unwrap();
        }
        tx.update_product_stock(p.id, 5).await.unwrap();
        tx.commit().await.unwrap();

        let listed = store.list_movements(all(3)).await.unwrap();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].movement.id, MovementId::new(5));
    }

    #[tokio::test]
    async fn duplicate_sku_is_a_unique_violation() {
        let store = InMemoryStore::new();
        store.insert_product(product("DUP", 0)).await.unwrap();
        let err = store.insert_product(product("DUP", 0)).await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));
    }

    #[tokio::test]
    async fn delete_cascades_to_movements() {
        let store = InMemoryStore::new();
        let keep = product("KEEP", 1);
        let gone = product("GONE", 1);
        store.insert_product(keep.clone()).await.unwrap();
        store.insert_product(gone.clone()).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.insert_movement(new_movement(keep.id, 1, 1)).await.unwrap();
        tx.update_product_stock(keep.id, 2).await.unwrap();
        tx.insert_movement(new_movement(gone.id, 1, 1)).await.unwrap();
        tx.update_product_stock(gone.id, 2).await.unwrap();
        tx.commit().await.unwrap();

        assert!(store.delete_product(gone.id).await.unwrap());
        assert!(!store.delete_product(gone.id).await.unwrap());

        let listed = store.list_movements(all(100)).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].movement.product_id, keep.id);
    }

    #[tokio::test]
    async fn update_product_never_writes_stock() {
        let store = InMemoryStore::new();
        let p = product("A", 7);
        store.insert_product(p.clone()).await.unwrap();

        let mut stale = p.clone();
        stale.stock = 999;
        stale.name = "Renamed".to_string();
        assert!(store.update_product(&stale).await.unwrap());

        let stored = store.get_product(p.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "Renamed");
        assert_eq!(stored.stock, 7);
    }
}
