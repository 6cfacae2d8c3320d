use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use crate::app::{dto, errors};
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_movements).post(create_movement))
        .route("/product/:product_id", get(list_product_movements))
}

pub async fn list_movements(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.list_movements(None).await {
        Ok(movements) => Json(dto::MovementListResponse {
            success: true,
            movements,
        })
        .into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn list_product_movements(
    Extension(services): Extension<Arc<AppServices>>,
    Path(product_id): Path<String>,
) -> axum::response::Response {
    let product_id = match errors::parse_product_id(&product_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.list_movements(Some(product_id)).await {
        Ok(movements) => Json(dto::MovementListResponse {
            success: true,
            movements,
        })
        .into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn create_movement(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::CreateMovementRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return errors::json_rejection_to_response(rejection),
    };
    let cmd = match body.into_command() {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match services.record_movement(cmd).await {
        Ok(movement) => (
            StatusCode::CREATED,
            Json(dto::MovementCreatedResponse {
                success: true,
                id: movement.id.get(),
                stock_before: movement.stock_before,
                stock_after: movement.stock_after,
            }),
        )
            .into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
