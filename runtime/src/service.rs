//! Product-facing service facade over the reservation pipeline.

use holdfast_core::ledger::{LedgerError, StockLedger};
use holdfast_core::queue::CommitQueue;
use holdfast_core::store::{ProductStore, StoreError};
use holdfast_core::types::{ProductId, Quantity, StockLevel};
use std::sync::Arc;
use thiserror::Error;

use crate::coordinator::{PurchaseCoordinator, PurchaseError, PurchaseOutcome};

/// Errors surfaced by the product service.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// A purchase attempt failed
    #[error("Purchase failed: {0}")]
    Purchase(#[from] PurchaseError),

    /// A ledger read or write failed
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// A durable store read or write failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// The product-facing entry point: purchases, stock reads, and
/// initialization.
///
/// Composes the ledger, the commit queue, and the durable store behind one
/// API. Purchases go through the [`PurchaseCoordinator`]; reads choose their
/// source explicitly, since the ledger answers with live stock and the
/// durable store with the lagging mirror.
///
/// # Example
///
/// ```
/// use holdfast_runtime::ProductService;
/// use holdfast_testing::{InMemoryCommitQueue, InMemoryProductStore, InMemoryStockLedger};
/// use holdfast_core::{ProductId, Quantity, StockLevel};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let service = ProductService::new(
///     Arc::new(InMemoryStockLedger::new()),
///     Arc::new(InMemoryCommitQueue::new()),
///     Arc::new(InMemoryProductStore::new()),
/// );
///
/// service.initialize(ProductId::new(1), StockLevel::new(100).ok_or("negative")?).await?;
/// let outcome = service
///     .purchase(ProductId::new(1), Quantity::new(1).ok_or("zero")?)
///     .await?;
/// assert!(outcome.is_accepted());
/// # Ok(())
/// # }
/// ```
pub struct ProductService {
    ledger: Arc<dyn StockLedger>,
    store: Arc<dyn ProductStore>,
    coordinator: PurchaseCoordinator,
}

impl ProductService {
    /// Create a service over the given backends.
    #[must_use]
    pub fn new(
        ledger: Arc<dyn StockLedger>,
        queue: Arc<dyn CommitQueue>,
        store: Arc<dyn ProductStore>,
    ) -> Self {
        let coordinator = PurchaseCoordinator::new(Arc::clone(&ledger), queue);
        Self {
            ledger,
            store,
            coordinator,
        }
    }

    /// Attempt to purchase `quantity` units of a product.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Purchase`] when the attempt failed for a
    /// system reason; insufficiency is an `Ok` outcome, not an error.
    pub async fn purchase(
        &self,
        product_id: ProductId,
        quantity: Quantity,
    ) -> Result<PurchaseOutcome, ServiceError> {
        Ok(self.coordinator.purchase(product_id, quantity).await?)
    }

    /// Read a product's live stock from the ledger.
    ///
    /// Returns `Ok(None)` when the product has no tracked stock.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Ledger`] when the ledger is unreachable.
    pub async fn stock(&self, product_id: ProductId) -> Result<Option<StockLevel>, ServiceError> {
        Ok(self.ledger.get(product_id).await?)
    }

    /// Read a product's durable stock from the lagging mirror.
    ///
    /// Returns `Ok(None)` when the product has no row. The value trails the
    /// live ledger by whatever the queue currently holds.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Store`] when the database is unreachable.
    pub async fn durable_stock(
        &self,
        product_id: ProductId,
    ) -> Result<Option<StockLevel>, ServiceError> {
        Ok(self.store.get_stock(product_id).await?)
    }

    /// Set a product's stock in both the durable store and the ledger.
    ///
    /// Writes the durable row first so that a crash between the two writes
    /// leaves a product that cannot yet be purchased, never one that can be
    /// purchased without a durable record.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] when either write fails.
    pub async fn initialize(
        &self,
        product_id: ProductId,
        stock: StockLevel,
    ) -> Result<(), ServiceError> {
        self.store.upsert(product_id, stock).await?;
        self.ledger.set(product_id, stock).await?;
        tracing::info!(
            product_id = %product_id,
            stock = %stock,
            "Initialized product stock"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use holdfast_testing::{InMemoryCommitQueue, InMemoryProductStore, InMemoryStockLedger};

    fn service() -> (
        Arc<InMemoryStockLedger>,
        Arc<InMemoryCommitQueue>,
        Arc<InMemoryProductStore>,
        ProductService,
    ) {
        let ledger = Arc::new(InMemoryStockLedger::new());
        let queue = Arc::new(InMemoryCommitQueue::new());
        let store = Arc::new(InMemoryProductStore::new());
        let service = ProductService::new(
            Arc::clone(&ledger) as Arc<dyn StockLedger>,
            Arc::clone(&queue) as Arc<dyn CommitQueue>,
            Arc::clone(&store) as Arc<dyn ProductStore>,
        );
        (ledger, queue, store, service)
    }

    #[tokio::test]
    async fn initialize_seeds_ledger_and_store() {
        let (ledger, _queue, store, service) = service();
        let product = ProductId::new(1);

        service
            .initialize(product, StockLevel::new(25).unwrap())
            .await
            .unwrap();
        assert_eq!(ledger.level(product), Some(25));
        assert_eq!(store.stock(product), Some(25));
    }

    #[tokio::test]
    async fn stock_reads_the_live_ledger() {
        let (_ledger, _queue, _store, service) = service();
        let product = ProductId::new(1);

        service
            .initialize(product, StockLevel::new(5).unwrap())
            .await
            .unwrap();
        service
            .purchase(product, Quantity::new(2).unwrap())
            .await
            .unwrap();

        assert_eq!(service.stock(product).await.unwrap(), StockLevel::new(3));
        // The mirror has not been synced yet; initialization's value stands
        assert_eq!(
            service.durable_stock(product).await.unwrap(),
            StockLevel::new(5)
        );
    }

    #[tokio::test]
    async fn unknown_product_reads_as_none_everywhere() {
        let (_ledger, _queue, _store, service) = service();
        let product = ProductId::new(404);

        assert_eq!(service.stock(product).await.unwrap(), None);
        assert_eq!(service.durable_stock(product).await.unwrap(), None);
    }
}
