//! In-memory durable product store for fast, deterministic testing.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use holdfast_core::store::{ProductStore, StoreError};
use holdfast_core::types::{ProductId, StockLevel};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// In-memory durable product store for fast, deterministic testing.
///
/// Mirrors the production store's update semantics: `set_stock` writes only
/// rows that already exist, so tests can cover the "commit for an
/// uninitialized product" path without a database.
///
/// # Example
///
/// ```
/// use holdfast_testing::InMemoryProductStore;
/// use holdfast_core::{ProductId, ProductStore, StockLevel};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryProductStore::new();
/// store.upsert(ProductId::new(1), StockLevel::new(10).ok_or("negative")?).await?;
/// store.set_stock(ProductId::new(1), StockLevel::new(7).ok_or("negative")?).await?;
/// assert_eq!(store.get_stock(ProductId::new(1)).await?, StockLevel::new(7));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryProductStore {
    rows: Arc<RwLock<HashMap<ProductId, i64>>>,
    fail_writes: Arc<AtomicBool>,
}

impl InMemoryProductStore {
    /// Create a new empty in-memory store
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: Arc::new(RwLock::new(HashMap::new())),
            fail_writes: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make subsequent write operations fail.
    ///
    /// Useful for asserting that the sync consumer withholds acknowledgment
    /// when a commit cannot be applied.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Read a product's raw stored value without going through the trait.
    ///
    /// Useful for assertions in tests.
    #[must_use]
    pub fn stock(&self, product_id: ProductId) -> Option<i64> {
        self.rows.read().unwrap().get(&product_id).copied()
    }

    /// Check if a product has a row
    #[must_use]
    pub fn contains(&self, product_id: ProductId) -> bool {
        self.rows.read().unwrap().contains_key(&product_id)
    }

    /// Clear all rows (for test isolation)
    pub fn clear(&self) {
        self.rows.write().unwrap().clear();
    }

    /// Get the number of stored products
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().unwrap().len()
    }

    /// Check if the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().unwrap().is_empty()
    }
}

impl Default for InMemoryProductStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ProductStore for InMemoryProductStore {
    fn upsert(
        &self,
        product_id: ProductId,
        stock: StockLevel,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async move {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::QueryFailed(
                    "injected write failure".to_string(),
                ));
            }
            self.rows.write().unwrap().insert(product_id, stock.get());
            Ok(())
        })
    }

    fn set_stock(
        &self,
        product_id: ProductId,
        stock: StockLevel,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async move {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::QueryFailed(
                    "injected write failure".to_string(),
                ));
            }
            let mut rows = self.rows.write().unwrap();
            if let Some(value) = rows.get_mut(&product_id) {
                *value = stock.get();
            }
            Ok(())
        })
    }

    fn get_stock(
        &self,
        product_id: ProductId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<StockLevel>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            Ok(self
                .rows
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

    #[tokio::test]
    async fn upsert_then_get() {
        let store = InMemoryProductStore::new();
        let product = ProductId::new(1);

        store.upsert(product, StockLevel::new(10).unwrap()).await.unwrap();
        assert_eq!(store.get_stock(product).await.unwrap(), StockLevel::new(10));
    }

    #[tokio::test]
    async fn set_stock_skips_missing_rows() {
        let store = InMemoryProductStore::new();
        let product = ProductId::new(1);

        store.set_stock(product, StockLevel::new(5).unwrap()).await.unwrap();
        assert!(!store.contains(product));
    }

    #[tokio::test]
    async fn set_stock_overwrites_existing_rows() {
        let store = InMemoryProductStore::new();
        let product = ProductId::new(1);

        store.upsert(product, StockLevel::new(10).unwrap()).await.unwrap();
        store.set_stock(product, StockLevel::new(7).unwrap()).await.unwrap();
        store.set_stock(product, StockLevel::new(7).unwrap()).await.unwrap();
        assert_eq!(store.stock(product), Some(7));
    }

    #[tokio::test]
    async fn injected_write_failure_surfaces() {
        let store = InMemoryProductStore::new();
        store.fail_writes(true);
        assert!(
            store
                .upsert(ProductId::new(1), StockLevel::zero())
                .await
                .is_err()
        );
        assert!(store.is_empty());
    }
}
