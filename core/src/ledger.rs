//! Atomic stock ledger abstraction.
//!
//! The ledger is the fast authoritative counter store for live stock. Its
//! central primitive is [`StockLedger::reserve`]: an atomic
//! check-then-decrement that either consumes stock or refuses, with no
//! interleaving visible to concurrent callers. Everything else in the system
//! builds on that guarantee; the coordinator holds no locks of its own.
//!
//! # Key Principles
//!
//! - **Atomic reserve**: the backend executes check-and-decrement as a single
//!   indivisible unit, never as two round trips issued by the caller
//! - **Absence is not zero**: a product with no tracked stock is reported as
//!   insufficient, never silently treated as stock zero
//! - **Transport errors are not rejections**: an unreachable backend surfaces
//!   as [`LedgerError`], so callers can tell "no stock" from "system down"
//!
//! # Implementations
//!
//! - `RedisStockLedger` (holdfast-redis) - production, hash per product plus
//!   a server-side script for the conditional decrement
//! - `InMemoryStockLedger` (holdfast-testing) - deterministic fake for tests

use crate::types::{ProductId, Quantity, StockLevel};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during ledger operations.
///
/// Insufficiency is not an error: [`StockLedger::reserve`] reports it as
/// `Ok(None)`. This enum covers only transport and data faults.
#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    /// Failed to connect to the ledger backend
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),

    /// The backend returned a value outside the valid stock range
    #[error("Invalid stock value for key '{key}': {value}")]
    InvalidValue {
        /// The ledger key that held the value
        key: String,
        /// The out-of-range value the backend returned
        value: i64,
    },
}

/// Trait for atomic stock ledger implementations.
///
/// All operations are async I/O against the backing counter store. The
/// serialization of concurrent `reserve` calls for the same product is
/// delegated entirely to the backend's atomic primitive, which is what lets
/// callers scale horizontally without coordinating among themselves.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of
/// `async fn` to enable trait object usage (`Arc<dyn StockLedger>`).
pub trait StockLedger: Send + Sync {
    /// Atomically reserve `quantity` units of a product.
    ///
    /// If the tracked stock is at least `quantity`, decrements it and returns
    /// `Ok(Some(new_stock))`. If the stock is lower, or the product has no
    /// tracked stock at all, performs no mutation and returns `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the backend is unreachable or returns a
    /// value outside the valid stock range. Insufficiency is not an error.
    fn reserve(
        &self,
        product_id: ProductId,
        quantity: Quantity,
    ) -> Pin<Box<dyn Future<Output = Result<Option<StockLevel>, LedgerError>> + Send + '_>>;

    /// Restore `quantity` units to a product, returning the new stock value.
    ///
    /// Used only to compensate a reservation whose downstream commit could
    /// not be queued. This is a single increment operation on the backend,
    /// not a read-then-write, so concurrent restores and reserves on the same
    /// key compose without lost updates.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the backend is unreachable.
    fn restore(
        &self,
        product_id: ProductId,
        quantity: Quantity,
    ) -> Pin<Box<dyn Future<Output = Result<StockLevel, LedgerError>> + Send + '_>>;

    /// Overwrite a product's tracked stock.
    ///
    /// Idempotent; used for initialization and administrative correction.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the backend is unreachable.
    fn set(
        &self,
        product_id: ProductId,
        stock: StockLevel,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>>;

    /// Read a product's live stock value.
    ///
    /// Returns `Ok(None)` when the product has no tracked stock.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the backend is unreachable or the stored
    /// value is not a valid stock count.
    fn get(
        &self,
        product_id: ProductId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<StockLevel>, LedgerError>> + Send + '_>>;
}
