use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use serde_json::json;

use stockflow_infra::SetStockOutcome;

use crate::app::{dto, errors};
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_products).post(create_product))
        .route("/:id", get(get_product).put(update_product).delete(delete_product))
        .route("/:id/stock", put(set_stock))
}

pub async fn list_products(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.list_products().await {
        Ok(products) => Json(dto::ProductListResponse {
            success: true,
            products,
        })
        .into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn create_product(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::CreateProductRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return errors::json_rejection_to_response(rejection),
    };

    match services.create_product(body.into()).await {
        Ok(product) => (
            StatusCode::CREATED,
            Json(json!({
                "success": true,
                "id": product.id.to_string(),
                "product": product,
            })),
        )
            .into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn get_product(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match errors::parse_product_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.get_product(id).await {
        Ok(product) => Json(dto::ProductResponse {
            success: true,
            product,
        })
        .into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn update_product(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Result<Json<dto::UpdateProductRequest>, JsonRejection>,
) -> axum::response::Response {
    let id = match errors::parse_product_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return errors::json_rejection_to_response(rejection),
    };

    match services.update_product(id, body.into()).await {
        Ok(product) => Json(json!({ "success": true, "product": product })).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn delete_product(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match errors::parse_product_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.delete_product(id).await {
        Ok(()) => Json(json!({ "success": true })).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

/// Set stock to an absolute value; the difference is journaled as a movement.
pub async fn set_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Result<Json<dto::SetStockRequest>, JsonRejection>,
) -> axum::response::Response {
    let id = match errors::parse_product_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return errors::json_rejection_to_response(rejection),
    };
    let cmd = match body.into_command(id) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match services.set_stock(cmd).await {
        Ok(SetStockOutcome::Unchanged { stock }) => Json(json!({
            "success": true,
            "message": "No change in stock",
            "stock": stock,
        }))
        .into_response(),
        Ok(SetStockOutcome::Moved(movement)) => {
            Json(json!({ "success": true, "movement": movement })).into_response()
        }
        Err(e) => errors::ledger_error_to_response(e),
    }
}
