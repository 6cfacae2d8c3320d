//! Inventory domain: products and the stock-movement ledger rules.
//!
//! This crate contains business rules only, implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage).

pub mod movement;
pub mod product;

pub use movement::{
    check_chain, replay_stock, MovementType, NewMovement, RecordMovement, SetStock, StockChange,
    StockMovement, MANUAL_UPDATE_REFERENCE,
};
pub use product::{NewProduct, Product, ProductUpdate, MAX_UNIT_PRICE};
