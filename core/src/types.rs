//! Domain types for inventory reservation.
//!
//! Newtypes around the raw integers that flow between the ledger, the commit
//! queue, and the durable store. Construction enforces the domain constraints
//! (positive quantities, non-negative stock) so the traits in this crate can
//! state their contracts in terms of already-valid values.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier for a product whose stock is tracked.
///
/// Product ids are assigned externally; this subsystem never generates them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProductId(i64);

impl ProductId {
    /// Create a `ProductId` from its raw value
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw id
    #[must_use]
    pub const fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Quantities and stock levels
// ============================================================================

/// A purchase quantity, always greater than zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Quantity(u32);

impl Quantity {
    /// Create a `Quantity`, rejecting zero
    #[must_use]
    pub const fn new(value: u32) -> Option<Self> {
        if value == 0 { None } else { Some(Self(value)) }
    }

    /// Get the raw quantity
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stock counter value, never negative.
///
/// Produced by ledger operations (the atomic reserve primitive refuses to
/// drive stock below zero) and consumed as the absolute value written to the
/// durable store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StockLevel(i64);

impl StockLevel {
    /// Create a `StockLevel`, rejecting negative values
    #[must_use]
    pub const fn new(value: i64) -> Option<Self> {
        if value < 0 { None } else { Some(Self(value)) }
    }

    /// The zero stock level
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Get the raw stock value
    #[must_use]
    pub const fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for StockLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantity_rejects_zero() {
        assert!(Quantity::new(0).is_none());
        assert_eq!(Quantity::new(3).map(|q| q.get()), Some(3));
    }

    #[test]
    fn stock_level_rejects_negative() {
        assert!(StockLevel::new(-1).is_none());
        assert_eq!(StockLevel::new(0), Some(StockLevel::zero()));
        assert_eq!(StockLevel::new(42).map(|s| s.get()), Some(42));
    }

    #[test]
    fn display_uses_raw_values() {
        assert_eq!(ProductId::new(7).to_string(), "7");
        assert_eq!(StockLevel::zero().to_string(), "0");
    }
}
