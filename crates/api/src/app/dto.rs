use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use stockflow_infra::MovementEntry;
use stockflow_inventory::{MovementType, NewProduct, Product, ProductUpdate, RecordMovement, SetStock};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

/// Body of `POST /stock-movements`.
///
/// Fields are raw JSON values so that a missing or mistyped field is
/// reported with a field-specific message instead of a generic decode error.
#[derive(Debug, Default, Deserialize)]
pub struct CreateMovementRequest {
    pub product_id: Option<JsonValue>,
    #[serde(rename = "type")]
    pub movement_type: Option<JsonValue>,
    /// Integer, or a string holding one.
    pub quantity: Option<JsonValue>,
    pub reference: Option<JsonValue>,
}

impl CreateMovementRequest {
    pub fn into_command(self) -> Result<RecordMovement, axum::response::Response> {
        let product_id = match self.product_id {
            None | Some(JsonValue::Null) => return Err(validation("Product ID is required")),
            Some(JsonValue::String(id)) if id.trim().is_empty() => {
                return Err(validation("Product ID is required"))
            }
            Some(JsonValue::String(id)) => id,
            Some(other) => other.to_string(),
        };
        let movement_type = match self.movement_type {
            None | Some(JsonValue::Null) => {
                return Err(validation("Movement type is required (in, out, or adjustment)"))
            }
            Some(JsonValue::String(t)) if t.trim().is_empty() => {
                return Err(validation("Movement type is required (in, out, or adjustment)"))
            }
            Some(JsonValue::String(t)) => t,
            Some(other) => other.to_string(),
        };
        let quantity = match self.quantity {
            None | Some(JsonValue::Null) => return Err(validation("Quantity is required")),
            Some(raw) => parse_integer(&raw).ok_or_else(|| validation("Quantity must be an integer"))?,
        };
        let reference = match self.reference {
            None | Some(JsonValue::Null) => String::new(),
            Some(JsonValue::String(r)) => r,
            Some(JsonValue::Number(n)) => n.to_string(),
            Some(JsonValue::Bool(b)) => b.to_string(),
            Some(_) => return Err(validation("Reference must be a string")),
        };

        let product_id = errors::parse_product_id(&product_id)?;
        let movement_type: MovementType = movement_type
            .trim()
            .parse()
            .map_err(|e: stockflow_core::DomainError| match e {
                stockflow_core::DomainError::Validation(msg) => validation(msg),
                other => validation(other.to_string()),
            })?;

        Ok(RecordMovement {
            product_id,
            movement_type,
            quantity,
            reference,
        })
    }
}

/// Accepts a JSON integer or a string that parses as one. Fractions and
/// anything else are rejected.
fn parse_integer(raw: &JsonValue) -> Option<i64> {
    match raw {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn validation(message: impl Into<String>) -> axum::response::Response {
    errors::json_error(StatusCode::BAD_REQUEST, "validation_error", message)
}

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub unit_price: u64,
    #[serde(default)]
    pub stock: i64,
}

impl From<CreateProductRequest> for NewProduct {
    fn from(value: CreateProductRequest) -> Self {
        NewProduct {
            sku: value.sku,
            name: value.name,
            description: value.description,
            unit_price: value.unit_price,
            initial_stock: value.stock,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateProductRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub unit_price: u64,
}

impl From<UpdateProductRequest> for ProductUpdate {
    fn from(value: UpdateProductRequest) -> Self {
        ProductUpdate {
            name: value.name,
            description: value.description,
            unit_price: value.unit_price,
        }
    }
}

/// Body of `PUT /products/{id}/stock`.
#[derive(Debug, Deserialize)]
pub struct SetStockRequest {
    /// Integer, or a string holding one.
    pub stock: Option<JsonValue>,
    pub notes: Option<String>,
}

impl SetStockRequest {
    pub fn into_command(
        self,
        product_id: stockflow_core::ProductId,
    ) -> Result<SetStock, axum::response::Response> {
        let target = self
            .stock
            .as_ref()
            .and_then(parse_integer)
            .ok_or_else(|| validation("Invalid stock value"))?;
        Ok(SetStock {
            product_id,
            target,
            reference: self.notes,
        })
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct MovementListResponse {
    pub success: bool,
    pub movements: Vec<MovementEntry>,
}

#[derive(Debug, Serialize)]
pub struct MovementCreatedResponse {
    pub success: bool,
    pub id: i64,
    pub stock_before: i64,
    pub stock_after: i64,
}

#[derive(Debug, Serialize)]
pub struct ProductResponse {
    pub success: bool,
    pub product: Product,
}

#[derive(Debug, Serialize)]
pub struct ProductListResponse {
    pub success: bool,
    pub products: Vec<Product>,
}
