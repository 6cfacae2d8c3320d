//! Infrastructure layer: persistence engines, the stock ledger, and the
//! product catalog built on them.

pub mod catalog;
pub mod db;
pub mod ledger;
pub mod store;

pub use catalog::ProductCatalog;
pub use ledger::{LedgerError, SetStockOutcome, StockLedger};
pub use store::{
    InMemoryStore, LedgerStore, LedgerTransaction, MovementEntry, MovementFilter, PostgresStore,
    ProductStore, StoreError,
};
