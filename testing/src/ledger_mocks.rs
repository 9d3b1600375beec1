//! In-memory stock ledger for fast, deterministic testing.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use holdfast_core::ledger::{LedgerError, StockLedger};
use holdfast_core::types::{ProductId, Quantity, StockLevel};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// In-memory stock ledger for fast, deterministic testing.
///
/// Reservations take the write lock for the whole check-then-decrement, which
/// reproduces the atomicity the production ledger gets from a server-side
/// script. Failure injection lets tests reach the compensation paths that a
/// live backend only shows under outage.
///
/// # Example
///
/// ```
/// use holdfast_testing::InMemoryStockLedger;
/// use holdfast_core::{ProductId, Quantity, StockLedger, StockLevel};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let ledger = InMemoryStockLedger::new();
/// ledger.set(ProductId::new(1), StockLevel::new(5).ok_or("negative")?).await?;
///
/// let quantity = Quantity::new(2).ok_or("zero")?;
/// assert_eq!(ledger.reserve(ProductId::new(1), quantity).await?, StockLevel::new(3));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryStockLedger {
    levels: Arc<RwLock<HashMap<ProductId, i64>>>,
    fail_reserves: Arc<AtomicBool>,
    fail_restores: Arc<AtomicBool>,
}

impl InMemoryStockLedger {
    /// Create a new empty in-memory ledger
    #[must_use]
    pub fn new() -> Self {
        Self {
            levels: Arc::new(RwLock::new(HashMap::new())),
            fail_reserves: Arc::new(AtomicBool::new(false)),
            fail_restores: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make subsequent `reserve` calls fail with a transport error.
    ///
    /// Useful for driving the "ledger unreachable" path in coordinator tests.
    pub fn fail_reserves(&self, fail: bool) {
        self.fail_reserves.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `restore` calls fail with a transport error.
    ///
    /// Useful for driving the compensation-failure path, which a live backend
    /// only exhibits during an outage window.
    pub fn fail_restores(&self, fail: bool) {
        self.fail_restores.store(fail, Ordering::SeqCst);
    }

    /// Read a product's raw tracked value without going through the trait.
    ///
    /// Useful for assertions in tests.
    #[must_use]
    pub fn level(&self, product_id: ProductId) -> Option<i64> {
        self.levels.read().unwrap().get(&product_id).copied()
    }

    /// Clear all tracked stock (for test isolation)
    pub fn clear(&self) {
        self.levels.write().unwrap().clear();
    }

    /// Get the number of tracked products
    #[must_use]
    pub fn len(&self) -> usize {
        self.levels.read().unwrap().len()
    }

    /// Check if no products are tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels.read().unwrap().is_empty()
    }
}

impl Default for InMemoryStockLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl StockLedger for InMemoryStockLedger {
    fn reserve(
        &self,
        product_id: ProductId,
        quantity: Quantity,
    ) -> Pin<Box<dyn Future<Output = Result<Option<StockLevel>, LedgerError>> + Send + '_>> {
        Box::pin(async move {
            if self.fail_reserves.load(Ordering::SeqCst) {
                return Err(LedgerError::TransportError(
                    "injected reserve failure".to_string(),
                ));
            }

            let mut levels = self.levels.write().unwrap();
            let Some(current) = levels.get_mut(&product_id) else {
                return Ok(None);
            };
            let needed = i64::from(quantity.get());
            if *current < needed {
                return Ok(None);
            }
            *current -= needed;
            Ok(Some(StockLevel::new(*current).unwrap()))
        })
    }

    fn restore(
        &self,
        product_id: ProductId,
        quantity: Quantity,
    ) -> Pin<Box<dyn Future<Output = Result<StockLevel, LedgerError>> + Send + '_>> {
        Box::pin(async move {
            if self.fail_restores.load(Ordering::SeqCst) {
                return Err(LedgerError::TransportError(
                    "injected restore failure".to_string(),
                ));
            }

            // Blind increment, creating the entry if absent, matching the
            // production backend's increment primitive
            let mut levels = self.levels.write().unwrap();
            let entry = levels.entry(product_id).or_insert(0);
            *entry += i64::from(quantity.get());
            Ok(StockLevel::new(*entry).unwrap())
        })
    }

    fn set(
        &self,
        product_id: ProductId,
        stock: StockLevel,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>> {
        Box::pin(async move {
            self.levels.write().unwrap().insert(product_id, stock.get());
            Ok(())
        })
    }

    fn get(
        &self,
        product_id: ProductId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<StockLevel>, LedgerError>> + Send + '_>> {
        Box::pin(async move {
            Ok(self
                .levels
                .read()
                .unwrap()
                .get(&product_id)
                .map(|value| StockLevel::new(*value).unwrap()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quantity(value: u32) -> Quantity {
        Quantity::new(value).unwrap()
    }

    #[tokio::test]
    async fn reserve_decrements_until_refused() {
        let ledger = InMemoryStockLedger::new();
        let product = ProductId::new(1);
        ledger.set(product, StockLevel::new(5).unwrap()).await.unwrap();

        assert_eq!(
            ledger.reserve(product, quantity(3)).await.unwrap(),
            StockLevel::new(2)
        );
        assert_eq!(ledger.reserve(product, quantity(3)).await.unwrap(), None);
        assert_eq!(ledger.level(product), Some(2));
    }

    #[tokio::test]
    async fn reserve_without_tracked_stock_is_refused() {
        let ledger = InMemoryStockLedger::new();
        assert_eq!(
            ledger
                .reserve(ProductId::new(99), quantity(1))
                .await
                .unwrap(),
            None
        );
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn restore_adds_back() {
        let ledger = InMemoryStockLedger::new();
        let product = ProductId::new(1);
        ledger.set(product, StockLevel::new(5).unwrap()).await.unwrap();

        ledger.reserve(product, quantity(2)).await.unwrap();
        let restored = ledger.restore(product, quantity(2)).await.unwrap();
        assert_eq!(restored, StockLevel::new(5).unwrap());
    }

    #[tokio::test]
    async fn injected_failures_surface_as_transport_errors() {
        let ledger = InMemoryStockLedger::new();
        let product = ProductId::new(1);
        ledger.set(product, StockLevel::new(5).unwrap()).await.unwrap();

        ledger.fail_restores(true);
        assert!(ledger.restore(product, quantity(1)).await.is_err());

        ledger.fail_reserves(true);
        assert!(ledger.reserve(product, quantity(1)).await.is_err());
        // Failed calls never mutate tracked stock
        assert_eq!(ledger.level(product), Some(5));
    }
}
