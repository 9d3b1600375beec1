//! Durable product store abstraction.
//!
//! The durable store is the audit-of-record mirror of the ledger. It always
//! lags the live counter: the sync consumer applies each queued commit's
//! absolute `new_stock` value, so the mirror converges to whatever the ledger
//! last observed, in delivery order.
//!
//! # Implementations
//!
//! - `PostgresProductStore` (holdfast-postgres) - production
//! - `InMemoryProductStore` (holdfast-testing) - deterministic fake for tests

use crate::types::{ProductId, StockLevel};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during durable store operations.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Failed to connect to the database
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A query failed to execute
    #[error("Query failed: {0}")]
    QueryFailed(String),
}

/// Trait for durable product store implementations.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of
/// `async fn` to enable trait object usage (`Arc<dyn ProductStore>`).
pub trait ProductStore: Send + Sync {
    /// Insert a product row, or overwrite its stock if the row exists.
    ///
    /// Used by stock initialization and administrative correction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the database is unreachable or the
    /// statement fails.
    fn upsert(
        &self,
        product_id: ProductId,
        stock: StockLevel,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;

    /// Set an existing product's stock to an absolute value.
    ///
    /// This is the write the sync consumer issues for each commit. Updating
    /// a product with no row affects nothing and is not an error; the mirror
    /// simply has no record to converge for that product.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the database is unreachable or the
    /// statement fails.
    fn set_stock(
        &self,
        product_id: ProductId,
        stock: StockLevel,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;

    /// Read a product's durable stock value.
    ///
    /// Returns `Ok(None)` when the product has no row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the database is unreachable or the query
    /// fails.
    fn get_stock(
        &self,
        product_id: ProductId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<StockLevel>, StoreError>> + Send + '_>>;
}
