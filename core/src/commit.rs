//! The commit event produced by a successful reservation.

use crate::types::{ProductId, Quantity, StockLevel};
use serde::{Deserialize, Serialize};

/// An immutable record of one successful reservation, queued for asynchronous
/// persistence.
///
/// `new_stock` carries the absolute post-purchase value observed by the
/// ledger at reservation time, not a delta. The sync consumer writes it to
/// the durable store with last-writer-wins semantics, so redelivering the
/// same commit is idempotent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseCommit {
    /// The product the reservation was taken against
    pub product_id: ProductId,
    /// How many units the reservation consumed
    pub quantity: Quantity,
    /// The ledger's stock value immediately after the reservation
    pub new_stock: StockLevel,
}

impl PurchaseCommit {
    /// Create a commit event for a reservation that just succeeded
    #[must_use]
    pub const fn new(product_id: ProductId, quantity: Quantity, new_stock: StockLevel) -> Self {
        Self {
            product_id,
            quantity,
            new_stock,
        }
    }
}
