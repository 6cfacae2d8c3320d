use std::sync::Arc;

use stockflow_core::ProductId;
use stockflow_infra::{
    InMemoryStore, LedgerError, MovementEntry, PostgresStore, ProductCatalog, SetStockOutcome,
    StockLedger, StoreError, db,
};
use stockflow_inventory::{NewProduct, Product, ProductUpdate, RecordMovement, SetStock, StockMovement};

use crate::config::ApiConfig;

/// Ledger and catalog wired to one persistence engine.
///
/// Both halves share the same store so catalog deletes and ledger writes
/// see the same rows.
#[derive(Debug, Clone)]
pub enum AppServices {
    InMemory {
        ledger: StockLedger<Arc<InMemoryStore>>,
        catalog: ProductCatalog<Arc<InMemoryStore>>,
    },
    Persistent {
        ledger: StockLedger<Arc<PostgresStore>>,
        catalog: ProductCatalog<Arc<PostgresStore>>,
    },
}

/// Select the engine from configuration, connecting and bootstrapping the
/// schema when PostgreSQL is configured.
pub async fn build_services(config: &ApiConfig) -> Result<AppServices, StoreError> {
    match &config.database {
        Some(settings) => {
            let pool = db::connect(settings).await?;
            db::ensure_schema(&pool).await?;
            tracing::info!(
                max_connections = settings.max_connections,
                "using PostgreSQL stores"
            );
            Ok(AppServices::persistent(PostgresStore::new(pool)))
        }
        None => {
            tracing::info!("using in-memory stores");
            Ok(AppServices::in_memory())
        }
    }
}

impl AppServices {
    pub fn in_memory() -> Self {
        let store = Arc::new(InMemoryStore::new());
        AppServices::InMemory {
            ledger: StockLedger::new(store.clone()),
            catalog: ProductCatalog::new(store),
        }
    }

    pub fn persistent(store: PostgresStore) -> Self {
        let store = Arc::new(store);
        AppServices::Persistent {
            ledger: StockLedger::new(store.clone()),
            catalog: ProductCatalog::new(store),
        }
    }

    pub async fn record_movement(&self, cmd: RecordMovement) -> Result<StockMovement, LedgerError> {
        match self {
            AppServices::InMemory { ledger, .. } => ledger.record_movement(cmd).await,
            AppServices::Persistent { ledger, .. } => ledger.record_movement(cmd).await,
        }
    }

    pub async fn list_movements(
        &self,
        product_id: Option<ProductId>,
    ) -> Result<Vec<MovementEntry>, LedgerError> {
        match self {
            AppServices::InMemory { ledger, .. } => ledger.list_movements(product_id).await,
            AppServices::Persistent { ledger, .. } => ledger.list_movements(product_id).await,
        }
    }

    pub async fn set_stock(&self, cmd: SetStock) -> Result<SetStockOutcome, LedgerError> {
        match self {
            AppServices::InMemory { ledger, .. } => ledger.set_stock(cmd).await,
            AppServices::Persistent { ledger, .. } => ledger.set_stock(cmd).await,
        }
    }

    pub async fn create_product(&self, cmd: NewProduct) -> Result<Product, LedgerError> {
        match self {
            AppServices::InMemory { catalog, .. } => catalog.create(cmd).await,
            AppServices::Persistent { catalog, .. } => catalog.create(cmd).await,
        }
    }

    pub async fn get_product(&self, id: ProductId) -> Result<Product, LedgerError> {
        match self {
            AppServices::InMemory { catalog, .. } => catalog.get(id).await,
            AppServices::Persistent { catalog, .. } => catalog.get(id).await,
        }
    }

    pub async fn list_products(&self) -> Result<Vec<Product>, LedgerError> {
        match self {
            AppServices::InMemory { catalog, .. } => catalog.list().await,
            AppServices::Persistent { catalog, .. } => catalog.list().await,
        }
    }

    pub async fn update_product(&self, id: ProductId, update: ProductUpdate) -> Result<Product, LedgerError> {
        match self {
            AppServices::InMemory { catalog, .. } => catalog.update(id, update).await,
            AppServices::Persistent { catalog, .. } => catalog.update(id, update).await,
        }
    }

    pub async fn delete_product(&self, id: ProductId) -> Result<(), LedgerError> {
        match self {
            AppServices::InMemory { catalog, .. } => catalog.delete(id).await,
            AppServices::Persistent { catalog, .. } => catalog.delete(id).await,
        }
    }
}
