//! Stock-movement ledger orchestration.
//!
//! Every stock change runs as one store transaction:
//!
//! ```text
//! lock product row -> compute change -> write product stock -> append movement -> commit
//! ```
//!
//! Any rejection or store fault before `commit` rolls the whole transaction
//! back, so a product's stock and its movement history never diverge.

use thiserror::Error;
use tracing::{error, info, instrument, warn};

use stockflow_core::{DomainError, ProductId};
use stockflow_inventory::{
    MovementType, NewMovement, RecordMovement, SetStock, StockChange, StockMovement,
};

use crate::store::{LedgerStore, LedgerTransaction, MovementEntry, MovementFilter, StoreError};

/// Most recent movements returned for a single product.
pub const PRODUCT_HISTORY_LIMIT: usize = 50;

/// Most recent movements returned across all products.
pub const RECENT_MOVEMENTS_LIMIT: usize = 100;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Malformed or missing input. Nothing was written.
    #[error("{0}")]
    InvalidArgument(String),

    #[error("Product not found")]
    NotFound,

    /// The change would leave negative stock. Nothing was written.
    #[error(
        "Insufficient stock. Cannot reduce below 0. (stock: {stock_before}, requested change: {quantity})"
    )]
    InsufficientStock { stock_before: i64, quantity: i64 },

    #[error("{0}")]
    Conflict(String),

    /// The engine failed; the transaction was rolled back and a retry is safe.
    #[error("persistence failure: {0}")]
    PersistenceFailure(#[from] StoreError),
}

impl From<DomainError> for LedgerError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => LedgerError::InvalidArgument(msg),
            DomainError::InvalidId(msg) => LedgerError::InvalidArgument(msg),
            DomainError::InvariantViolation(msg) => LedgerError::InvalidArgument(msg),
            DomainError::NotFound => LedgerError::NotFound,
            DomainError::Conflict(msg) => LedgerError::Conflict(msg),
            DomainError::InsufficientStock {
                stock_before,
                quantity,
            } => LedgerError::InsufficientStock {
                stock_before,
                quantity,
            },
        }
    }
}

/// Result of [`StockLedger::set_stock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetStockOutcome {
    /// Stock already had the requested value; nothing was recorded.
    Unchanged { stock: i64 },
    Moved(StockMovement),
}

/// Owns the rule that a product's stock equals its opening balance plus the
/// signed sum of its committed movements.
#[derive(Debug, Clone)]
pub struct StockLedger<S> {
    store: S,
}

impl<S> StockLedger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S> StockLedger<S>
where
    S: LedgerStore,
{
    /// Apply a signed quantity to a product's stock and journal it.
    #[instrument(
        skip(self, cmd),
        fields(product_id = %cmd.product_id, movement_type = %cmd.movement_type, quantity = cmd.quantity)
    )]
    pub async fn record_movement(&self, cmd: RecordMovement) -> Result<StockMovement, LedgerError> {
        let mut tx = self.store.begin().await.map_err(log_store_fault)?;
        let outcome = apply_movement(
            &mut tx,
            cmd.product_id,
            cmd.movement_type,
            cmd.quantity,
            cmd.reference,
        )
        .await;

        let movement = finish(tx, outcome).await?;
        info!(
            movement_id = %movement.id,
            stock_before = movement.stock_before,
            stock_after = movement.stock_after,
            "stock movement recorded"
        );
        Ok(movement)
    }

    /// Set a product's stock to `target`, journaling the difference as an
    /// `in` or `out` movement.
    #[instrument(skip(self, cmd), fields(product_id = %cmd.product_id, target = cmd.target))]
    pub async fn set_stock(&self, cmd: SetStock) -> Result<SetStockOutcome, LedgerError> {
        if cmd.target < 0 {
            let err = LedgerError::InvalidArgument("Invalid stock value".to_string());
            warn!(error = %err, "stock update rejected");
            return Err(err);
        }

        let reference = cmd.reference_or_default();
        let mut tx = self.store.begin().await.map_err(log_store_fault)?;
        let outcome = plan_and_apply_target(&mut tx, cmd.product_id, cmd.target, reference).await;

        let outcome = finish(tx, outcome).await?;
        match &outcome {
            SetStockOutcome::Unchanged { stock } => {
                info!(stock, "stock already at target; nothing recorded");
            }
            SetStockOutcome::Moved(movement) => {
                info!(
                    movement_id = %movement.id,
                    movement_type = %movement.movement_type,
                    stock_before = movement.stock_before,
                    stock_after = movement.stock_after,
                    "stock set"
                );
            }
        }
        Ok(outcome)
    }

    /// Newest movements first: the last 50 for one product, or the last 100
    /// overall annotated with product names.
    ///
    /// An unknown product simply has no movements.
    #[instrument(skip(self), fields(product_id = ?product_id))]
    pub async fn list_movements(
        &self,
        product_id: Option<ProductId>,
    ) -> Result<Vec<MovementEntry>, LedgerError> {
        let limit = match product_id {
            Some(_) => PRODUCT_HISTORY_LIMIT,
            None => RECENT_MOVEMENTS_LIMIT,
        };

        self.store
            .list_movements(MovementFilter { product_id, limit })
            .await
            .map_err(log_store_fault)
    }
}

async fn apply_movement<T>(
    tx: &mut T,
    product_id: ProductId,
    movement_type: MovementType,
    quantity: i64,
    reference: String,
) -> Result<StockMovement, LedgerError>
where
    T: LedgerTransaction,
{
    let stock_before = tx
        .lock_product_stock(product_id)
        .await?
        .ok_or(LedgerError::NotFound)?;

    let change = StockChange::compute(stock_before, quantity)?;
    write_change(tx, product_id, movement_type, change, reference).await
}

async fn plan_and_apply_target<T>(
    tx: &mut T,
    product_id: ProductId,
    target: i64,
    reference: String,
) -> Result<SetStockOutcome, LedgerError>
where
    T: LedgerTransaction,
{
    let current = tx
        .lock_product_stock(product_id)
        .await?
        .ok_or(LedgerError::NotFound)?;

    match StockChange::toward_target(current, target)? {
        None => Ok(SetStockOutcome::Unchanged { stock: current }),
        Some((movement_type, change)) => {
            let movement = write_change(tx, product_id, movement_type, change, reference).await?;
            Ok(SetStockOutcome::Moved(movement))
        }
    }
}

async fn write_change<T>(
    tx: &mut T,
    product_id: ProductId,
    movement_type: MovementType,
    change: StockChange,
    reference: String,
) -> Result<StockMovement, LedgerError>
where
    T: LedgerTransaction,
{
    tx.update_product_stock(product_id, change.stock_after).await?;

    let movement = tx
        .insert_movement(NewMovement {
            product_id,
            movement_type,
            change,
            reference,
        })
        .await?;

    Ok(movement)
}

/// Commit on success, roll back on any error.
async fn finish<T, R>(tx: T, outcome: Result<R, LedgerError>) -> Result<R, LedgerError>
where
    T: LedgerTransaction,
    R: Send,
{
    match outcome {
        Ok(value) => {
            tx.commit().await.map_err(log_store_fault)?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                // The engine discards the transaction anyway once it is dropped.
                warn!(error = %rollback_err, "rollback failed");
            }
            match &err {
                LedgerError::PersistenceFailure(store_err) => {
                    error!(error = %store_err, "ledger transaction aborted");
                }
                other => warn!(error = %other, "stock change rejected"),
            }
            Err(err)
        }
    }
}

fn log_store_fault(err: StoreError) -> LedgerError {
    error!(error = %err, "ledger store failure");
    LedgerError::PersistenceFailure(err)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;

    use stockflow_inventory::{check_chain, Product, MANUAL_UPDATE_REFERENCE};

    use super::*;
    use crate::store::{InMemoryLedgerTx, InMemoryStore, ProductStore};

    async fn seeded(stock: i64) -> (StockLedger<InMemoryStore>, ProductId) {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let id = ProductId::new();
        store
            .insert_product(Product {
                id,
                sku: format!("SKU-{id}"),
                name: "Widget".to_string(),
                description: None,
                unit_price: 100,
                stock,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        (StockLedger::new(store), id)
    }

    fn movement(product_id: ProductId, movement_type: MovementType, quantity: i64) -> RecordMovement {
        RecordMovement {
            product_id,
            movement_type,
            quantity,
            reference: String::new(),
        }
    }

    async fn stock_of(ledger: &StockLedger<InMemoryStore>, id: ProductId) -> i64 {
        ledger.store().get_product(id).await.unwrap().unwrap().stock
    }

    /// Oldest-first history for one product.
    async fn history(ledger: &StockLedger<InMemoryStore>, id: ProductId) -> Vec<StockMovement> {
        let mut rows: Vec<StockMovement> = ledger
            .list_movements(Some(id))
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.movement)
            .collect();
        rows.reverse();
        rows
    }

    #[tokio::test]
    async fn scenario_out_rejected_then_in_then_adjustment_to_zero() {
        let (ledger, id) = seeded(10).await;

        let err = ledger
            .record_movement(movement(id, MovementType::Out, -15))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientStock {
                stock_before: 10,
                quantity: -15
            }
        );
        assert!(err.to_string().starts_with("Insufficient stock. Cannot reduce below 0."));
        assert_eq!(stock_of(&ledger, id).await, 10);
        assert!(ledger.list_movements(Some(id)).await.unwrap().is_empty());

        let m = ledger
            .record_movement(movement(id, MovementType::In, 5))
            .await
            .unwrap();
        assert_eq!((m.stock_before, m.stock_after), (10, 15));

        let m = ledger
            .record_movement(movement(id, MovementType::Adjustment, -15))
            .await
            .unwrap();
        assert_eq!((m.stock_before, m.stock_after), (15, 0));
        assert_eq!(stock_of(&ledger, id).await, 0);

        let rows = history(&ledger, id).await;
        assert_eq!(rows.len(), 2);
        check_chain(&rows).unwrap();
    }

    #[tokio::test]
    async fn unknown_product_is_not_found_and_writes_nothing() {
        let (ledger, id) = seeded(1).await;
        let err = ledger
            .record_movement(movement(ProductId::new(), MovementType::In, 3))
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::NotFound);
        assert_eq!(err.to_string(), "Product not found");
        assert!(ledger.list_movements(None).await.unwrap().is_empty());
        assert_eq!(stock_of(&ledger, id).await, 1);
    }

    #[tokio::test]
    async fn negative_in_is_accepted_when_stock_allows() {
        let (ledger, id) = seeded(5).await;
        let m = ledger
            .record_movement(movement(id, MovementType::In, -2))
            .await
            .unwrap();
        assert_eq!(m.stock_after, 3);
    }

    #[tokio::test]
    async fn overflowing_quantity_is_invalid_argument() {
        let (ledger, id) = seeded(1).await;
        let err = ledger
            .record_movement(movement(id, MovementType::In, i64::MAX))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidArgument(_)));
        assert_eq!(stock_of(&ledger, id).await, 1);
    }

    #[tokio::test]
    async fn unknown_product_lists_empty() {
        let (ledger, _) = seeded(1).await;
        assert!(ledger.list_movements(Some(ProductId::new())).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn global_listing_is_newest_first_with_names() {
        let (ledger, a) = seeded(0).await;
        for q in 1..=3 {
            ledger
                .record_movement(movement(a, MovementType::In, q))
                .await
                .unwrap();
        }

        let rows = ledger.list_movements(None).await.unwrap();
        assert_eq!(rows.len(), 3);
        for pair in rows.windows(2) {
            assert!(pair[0].movement.created_at > pair[1].movement.created_at);
        }
        assert!(rows.iter().all(|e| e.product_name.as_deref() == Some("Widget")));
        assert_eq!(rows[0].movement.stock_after, 6);
    }

    #[tokio::test]
    async fn listings_are_capped() {
        let (ledger, id) = seeded(0).await;
        for _ in 0..(RECENT_MOVEMENTS_LIMIT + 5) {
            ledger
                .record_movement(movement(id, MovementType::In, 1))
                .await
                .unwrap();
        }
        assert_eq!(
            ledger.list_movements(Some(id)).await.unwrap().len(),
            PRODUCT_HISTORY_LIMIT
        );
        assert_eq!(
            ledger.list_movements(None).await.unwrap().len(),
            RECENT_MOVEMENTS_LIMIT
        );
    }

    #[tokio::test]
    async fn set_stock_records_signed_difference() {
        let (ledger, id) = seeded(10).await;

        let outcome = ledger
            .set_stock(SetStock {
                product_id: id,
                target: 4,
                reference: None,
            })
            .await
            .unwrap();
        let SetStockOutcome::Moved(m) = outcome else {
            panic!("expected a movement");
        };
        assert_eq!(m.movement_type, MovementType::Out);
        assert_eq!((m.quantity, m.stock_before, m.stock_after), (-6, 10, 4));
        assert_eq!(m.reference, MANUAL_UPDATE_REFERENCE);

        let outcome = ledger
            .set_stock(SetStock {
                product_id: id,
                target: 9,
                reference: Some("cycle count".to_string()),
            })
            .await
            .unwrap();
        let SetStockOutcome::Moved(m) = outcome else {
            panic!("expected a movement");
        };
        assert_eq!(m.movement_type, MovementType::In);
        assert_eq!(m.quantity, 5);
        assert_eq!(m.reference, "cycle count");
        assert_eq!(stock_of(&ledger, id).await, 9);
    }

    #[tokio::test]
    async fn set_stock_to_current_value_records_nothing() {
        let (ledger, id) = seeded(7).await;
        let outcome = ledger
            .set_stock(SetStock {
                product_id: id,
                target: 7,
                reference: None,
            })
            .await
            .unwrap();
        assert_eq!(outcome, SetStockOutcome::Unchanged { stock: 7 });
        assert!(ledger.list_movements(Some(id)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn set_stock_rejects_negative_target_before_lookup() {
        let (ledger, _) = seeded(7).await;
        let err = ledger
            .set_stock(SetStock {
                product_id: ProductId::new(),
                target: -1,
                reference: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::InvalidArgument("Invalid stock value".to_string()));

        let err = ledger
            .set_stock(SetStock {
                product_id: ProductId::new(),
                target: 1,
                reference: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::NotFound);
    }

    /// In-memory store whose transactions fail the movement insert on demand.
    #[derive(Debug, Clone, Default)]
    struct FaultyStore {
        inner: InMemoryStore,
        fail_insert: Arc<AtomicBool>,
    }

    struct FaultyTx {
        inner: InMemoryLedgerTx,
        fail_insert: bool,
    }

    #[async_trait]
    impl LedgerStore for FaultyStore {
        type Tx = FaultyTx;

        async fn begin(&self) -> Result<Self::Tx, StoreError> {
            Ok(FaultyTx {
                inner: self.inner.begin().await?,
                fail_insert: self.fail_insert.load(Ordering::SeqCst),
            })
        }

        async fn list_movements(&self, filter: MovementFilter) -> Result<Vec<MovementEntry>, StoreError> {
            self.inner.list_movements(filter).await
        }
    }

    #[async_trait]
    impl LedgerTransaction for FaultyTx {
        async fn lock_product_stock(&mut self, product_id: ProductId) -> Result<Option<i64>, StoreError> {
            self.inner.lock_product_stock(product_id).await
        }

        async fn update_product_stock(&mut self, product_id: ProductId, stock: i64) -> Result<(), StoreError> {
            self.inner.update_product_stock(product_id, stock).await
        }

        async fn insert_movement(&mut self, movement: NewMovement) -> Result<StockMovement, StoreError> {
            if self.fail_insert {
                return Err(StoreError::Unavailable("connection reset".to_string()));
            }
            self.inner.insert_movement(movement).await
        }

        async fn commit(self) -> Result<(), StoreError> {
            self.inner.commit().await
        }

        async fn rollback(self) -> Result<(), StoreError> {
            self.inner.rollback().await
        }
    }

    #[tokio::test]
    async fn store_fault_after_stock_write_rolls_back_everything() {
        let store = FaultyStore::default();
        let now = Utc::now();
        let id = ProductId::new();
        store
            .inner
            .insert_product(Product {
                id,
                sku: "FAULT".to_string(),
                name: "Fragile".to_string(),
                description: None,
                unit_price: 0,
                stock: 10,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        let ledger = StockLedger::new(store.clone());

        store.fail_insert.store(true, Ordering::SeqCst);
        let err = ledger
            .record_movement(movement(id, MovementType::Out, -3))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::PersistenceFailure(StoreError::Unavailable(_))));
        assert_eq!(store.inner.get_product(id).await.unwrap().unwrap().stock, 10);
        assert!(ledger.list_movements(None).await.unwrap().is_empty());

        // Nothing was committed, so the retry starts from the same state.
        store.fail_insert.store(false, Ordering::SeqCst);
        let m = ledger
            .record_movement(movement(id, MovementType::Out, -3))
            .await
            .unwrap();
        assert_eq!((m.stock_before, m.stock_after), (10, 7));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_conflicting_movements_serialize() {
        let (ledger, id) = seeded(10).await;
        let ledger = Arc::new(ledger);

        let a = tokio::spawn({
            let ledger = ledger.clone();
            async move { ledger.record_movement(movement(id, MovementType::Out, -6)).await }
        });
        let b = tokio::spawn({
            let ledger = ledger.clone();
            async move { ledger.record_movement(movement(id, MovementType::Out, -7)).await }
        });
        let results = [a.await.unwrap(), b.await.unwrap()];

        let ok = results.iter().filter(|r| r.is_ok()).count();
        let insufficient = results
            .iter()
            .filter(|r| matches!(r, Err(LedgerError::InsufficientStock { .. })))
            .count();
        assert_eq!((ok, insufficient), (1, 1));

        let rows = history(&ledger, id).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(stock_of(&ledger, id).await, rows[0].stock_after);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn many_concurrent_decrements_never_oversell() {
        let (ledger, id) = seeded(30).await;
        let ledger = Arc::new(ledger);

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move {
                    ledger.record_movement(movement(id, MovementType::Out, -1)).await
                })
            })
            .collect();

        let mut ok = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(LedgerError::InsufficientStock { stock_before, .. }) => assert_eq!(stock_before, 0),
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!(ok, 30);
        assert_eq!(stock_of(&ledger, id).await, 0);

        let rows = history(&ledger, id).await;
        assert_eq!(rows.len(), 30);
        check_chain(&rows).unwrap();
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;
        use stockflow_inventory::replay_stock;

        fn movement_type() -> impl Strategy<Value = MovementType> {
            prop_oneof![
                Just(MovementType::In),
                Just(MovementType::Out),
                Just(MovementType::Adjustment),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

            #[test]
            fn random_sequences_keep_ledger_and_stock_consistent(
                initial in 0i64..50,
                ops in prop::collection::vec((movement_type(), -20i64..=20), 0..40),
            ) {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap();

                rt.block_on(async {
                    let (ledger, id) = seeded(initial).await;
                    let mut expected = initial;
                    let mut accepted = 0usize;

                    for (movement_type, quantity) in ops {
                        match ledger.record_movement(movement(id, movement_type, quantity)).await {
                            Ok(m) => {
                                prop_assert_eq!(m.stock_before, expected);
                                expected += quantity;
                                accepted += 1;
                            }
                            Err(LedgerError::InsufficientStock { .. }) => {
                                prop_assert!(expected + quantity < 0);
                            }
                            Err(other) => prop_assert!(false, "unexpected error: {other:?}"),
                        }
                        prop_assert!(stock_of(&ledger, id).await >= 0);
                    }

                    let rows = history(&ledger, id).await;
                    prop_assert_eq!(rows.len(), accepted);
                    prop_assert!(check_chain(&rows).is_ok());
                    prop_assert_eq!(replay_stock(initial, &rows).unwrap(), expected);
                    prop_assert_eq!(stock_of(&ledger, id).await, expected);
                    if let Some(last) = rows.last() {
                        prop_assert_eq!(last.stock_after, expected);
                    }
                    Ok(())
                })?;
            }
        }
    }
}
