use axum::Router;

pub mod products;
pub mod stock_movements;
pub mod system;

/// Router for the ledger and catalog endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/stock-movements", stock_movements::router())
        .nest("/products", products::router())
}
