use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{DomainError, DomainResult, MovementId, ProductId};

/// Reference recorded when stock is set directly rather than moved by a delta.
pub const MANUAL_UPDATE_REFERENCE: &str = "Manual Update";

/// Semantic tag of a movement.
///
/// The tag is descriptive only: it does not constrain the sign of the
/// quantity. A negative `in` is accepted as long as stock stays non-negative.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementType {
    In,
    Out,
    Adjustment,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::In => "in",
            MovementType::Out => "out",
            MovementType::Adjustment => "adjustment",
        }
    }
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in" => Ok(MovementType::In),
            "out" => Ok(MovementType::Out),
            "adjustment" => Ok(MovementType::Adjustment),
            _ => Err(DomainError::validation(
                "Invalid type. Must be: in, out, or adjustment",
            )),
        }
    }
}

/// Before/after snapshot of a single stock change.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockChange {
    pub stock_before: i64,
    pub quantity: i64,
    pub stock_after: i64,
}

impl StockChange {
    /// Apply a signed `quantity` to `stock_before`.
    ///
    /// Rejects results below zero with `InsufficientStock` and arithmetic
    /// overflow with `Validation`; never wraps.
    pub fn compute(stock_before: i64, quantity: i64) -> DomainResult<Self> {
        let stock_after = stock_before
            .checked_add(quantity)
            .ok_or_else(|| DomainError::validation("quantity overflows the stock range"))?;

        if stock_after < 0 {
            return Err(DomainError::insufficient_stock(stock_before, quantity));
        }

        Ok(Self {
            stock_before,
            quantity,
            stock_after,
        })
    }

    /// Plan the change that takes `current` stock to `target`.
    ///
    /// Returns `None` when nothing would change. A positive difference is
    /// tagged `in`, a negative one `out`.
    pub fn toward_target(current: i64, target: i64) -> DomainResult<Option<(MovementType, Self)>> {
        if target < 0 {
            return Err(DomainError::validation("Invalid stock value"));
        }

        let quantity = target
            .checked_sub(current)
            .ok_or_else(|| DomainError::validation("stock difference overflows"))?;

        if quantity == 0 {
            return Ok(None);
        }

        let movement_type = if quantity > 0 {
            MovementType::In
        } else {
            MovementType::Out
        };

        Ok(Some((movement_type, Self::compute(current, quantity)?)))
    }
}

/// Command: record one movement against a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMovement {
    pub product_id: ProductId,
    pub movement_type: MovementType,
    pub quantity: i64,
    pub reference: String,
}

/// Command: set a product's stock to an absolute value, journaling the difference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetStock {
    pub product_id: ProductId,
    pub target: i64,
    pub reference: Option<String>,
}

impl SetStock {
    pub fn reference_or_default(&self) -> String {
        match self.reference.as_deref().map(str::trim) {
            Some(r) if !r.is_empty() => r.to_string(),
            _ => MANUAL_UPDATE_REFERENCE.to_string(),
        }
    }
}

/// A movement that has been validated but not yet committed.
///
/// The persistence engine assigns `id` and `created_at` when it writes the row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMovement {
    pub product_id: ProductId,
    pub movement_type: MovementType,
    pub change: StockChange,
    pub reference: String,
}

/// A committed ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    pub product_id: ProductId,
    #[serde(rename = "type")]
    pub movement_type: MovementType,
    pub quantity: i64,
    pub stock_before: i64,
    pub stock_after: i64,
    pub reference: String,
    pub created_at: DateTime<Utc>,
}

impl StockMovement {
    pub fn from_new(new: NewMovement, id: MovementId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            product_id: new.product_id,
            movement_type: new.movement_type,
            quantity: new.change.quantity,
            stock_before: new.change.stock_before,
            stock_after: new.change.stock_after,
            reference: new.reference,
            created_at,
        }
    }
}

/// Verify that one product's movements (oldest first) form an unbroken history.
///
/// Each row must satisfy `stock_after == stock_before + quantity`, never go
/// negative, and start where the previous row ended.
pub fn check_chain(movements: &[StockMovement]) -> DomainResult<()> {
    let mut previous: Option<&StockMovement> = None;

    for m in movements {
        if m.stock_before.checked_add(m.quantity) != Some(m.stock_after) {
            return Err(DomainError::invariant(format!(
                "movement {} does not add up: {} + {} != {}",
                m.id, m.stock_before, m.quantity, m.stock_after
            )));
        }
        if m.stock_after < 0 {
            return Err(DomainError::invariant(format!(
                "movement {} leaves negative stock",
                m.id
            )));
        }
        if let Some(prev) = previous {
            if prev.product_id == m.product_id && prev.stock_after != m.stock_before {
                return Err(DomainError::invariant(format!(
                    "movement {} starts at {} but movement {} ended at {}",
                    m.id, m.stock_before, prev.id, prev.stock_after
                )));
            }
            if m.created_at <= prev.created_at {
                return Err(DomainError::invariant(format!(
                    "movement {} is not newer than movement {}",
                    m.id, prev.id
                )));
            }
        }
        previous = Some(m);
    }

    Ok(())
}

/// Replay movements (oldest first) on top of an opening balance.
pub fn replay_stock(initial: i64, movements: &[StockMovement]) -> DomainResult<i64> {
    movements.iter().try_fold(initial, |stock, m| {
        StockChange::compute(stock, m.quantity).map(|c| c.stock_after)
    })
}
