//! Purchase coordination over the ledger and the commit queue.
//!
//! The coordinator implements the accept path as reserve-then-publish: stock
//! is consumed by the ledger's atomic primitive first, and only then is the
//! commit handed to the durable queue. When the hand-off fails the coordinator
//! compensates by restoring the reserved units, so a queue outage costs
//! availability, not stock accuracy.

use holdfast_core::commit::PurchaseCommit;
use holdfast_core::ledger::{LedgerError, StockLedger};
use holdfast_core::queue::{CommitQueue, QueueError};
use holdfast_core::types::{ProductId, Quantity, StockLevel};
use std::sync::Arc;
use thiserror::Error;

use crate::PURCHASE_QUEUE;

/// The result of a purchase attempt that completed without system failure.
///
/// Rejection is an ordinary outcome, not an error: it is the coordinator
/// doing its job when demand exceeds stock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PurchaseOutcome {
    /// Stock was reserved and the commit queued for durable sync
    Accepted {
        /// The live stock remaining immediately after this purchase
        new_stock: StockLevel,
    },

    /// Insufficient stock (or no tracked stock); nothing was mutated
    Rejected,
}

impl PurchaseOutcome {
    /// Check if the purchase was accepted
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    /// Check if the purchase was rejected
    #[must_use]
    pub const fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected)
    }
}

/// Errors that can occur while coordinating a purchase.
#[derive(Error, Debug)]
pub enum PurchaseError {
    /// The ledger was unreachable or returned invalid data; no stock was
    /// consumed
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// The commit could not be queued; the reservation was restored and
    /// stock is consistent
    #[error("Commit hand-off failed, reservation restored: {0}")]
    PublishFailed(QueueError),

    /// The commit could not be queued and the compensating restore also
    /// failed, leaving the ledger lower than the durable record justifies
    #[error(
        "Stock inconsistent for product {product_id}: commit hand-off failed ({publish}) and compensation failed ({restore})"
    )]
    StockInconsistent {
        /// The product whose ledger value is now suspect
        product_id: ProductId,
        /// How many units the lost reservation consumed
        quantity: Quantity,
        /// The hand-off failure that triggered compensation
        publish: QueueError,
        /// The failure of the compensating restore
        restore: LedgerError,
    },
}

/// Coordinates the purchase path: atomic reserve, commit hand-off, and
/// compensation when the hand-off fails.
///
/// The coordinator holds no state of its own and no locks; correctness under
/// concurrency comes entirely from the ledger's atomic reserve. Any number of
/// coordinators may run against the same ledger.
///
/// # Example
///
/// ```
/// use holdfast_runtime::PurchaseCoordinator;
/// use holdfast_testing::{InMemoryCommitQueue, InMemoryStockLedger};
/// use holdfast_core::{ProductId, Quantity, StockLedger, StockLevel};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let ledger = Arc::new(InMemoryStockLedger::new());
/// let queue = Arc::new(InMemoryCommitQueue::new());
/// ledger.set(ProductId::new(1), StockLevel::new(5).ok_or("negative")?).await?;
///
/// let coordinator = PurchaseCoordinator::new(ledger, queue);
/// let outcome = coordinator
///     .purchase(ProductId::new(1), Quantity::new(2).ok_or("zero")?)
///     .await?;
/// assert!(outcome.is_accepted());
/// # Ok(())
/// # }
/// ```
pub struct PurchaseCoordinator {
    ledger: Arc<dyn StockLedger>,
    queue: Arc<dyn CommitQueue>,
}

impl PurchaseCoordinator {
    /// Create a coordinator over the given ledger and commit queue.
    #[must_use]
    pub fn new(ledger: Arc<dyn StockLedger>, queue: Arc<dyn CommitQueue>) -> Self {
        Self { ledger, queue }
    }

    /// Attempt to purchase `quantity` units of a product.
    ///
    /// Reserves stock atomically, then publishes a [`PurchaseCommit`] to the
    /// purchase queue. If the publish fails, the reservation is restored
    /// before this method returns.
    ///
    /// # Errors
    ///
    /// - [`PurchaseError::Ledger`] when the reservation itself could not be
    ///   attempted
    /// - [`PurchaseError::PublishFailed`] when the commit could not be queued
    ///   but compensation succeeded
    /// - [`PurchaseError::StockInconsistent`] when both the hand-off and the
    ///   compensating restore failed; the discrepancy is logged at error
    ///   level and requires reconciliation
    pub async fn purchase(
        &self,
        product_id: ProductId,
        quantity: Quantity,
    ) -> Result<PurchaseOutcome, PurchaseError> {
        let Some(new_stock) = self.ledger.reserve(product_id, quantity).await? else {
            tracing::debug!(
                product_id = %product_id,
                quantity = %quantity,
                "Purchase rejected, insufficient stock"
            );
            metrics::counter!("purchase.rejected").increment(1);
            return Ok(PurchaseOutcome::Rejected);
        };

        let commit = PurchaseCommit::new(product_id, quantity, new_stock);
        match self.queue.publish(PURCHASE_QUEUE, &commit).await {
            Ok(()) => {
                tracing::debug!(
                    product_id = %product_id,
                    quantity = %quantity,
                    new_stock = %new_stock,
                    "Purchase accepted"
                );
                metrics::counter!("purchase.accepted").increment(1);
                Ok(PurchaseOutcome::Accepted { new_stock })
            }
            Err(publish) => self.compensate(product_id, quantity, publish).await,
        }
    }

    /// Undo a reservation whose commit could not be queued.
    async fn compensate(
        &self,
        product_id: ProductId,
        quantity: Quantity,
        publish: QueueError,
    ) -> Result<PurchaseOutcome, PurchaseError> {
        match self.ledger.restore(product_id, quantity).await {
            Ok(restored) => {
                tracing::warn!(
                    product_id = %product_id,
                    quantity = %quantity,
                    restored_stock = %restored,
                    error = %publish,
                    "Commit hand-off failed, reservation restored"
                );
                metrics::counter!("purchase.compensated").increment(1);
                Err(PurchaseError::PublishFailed(publish))
            }
            Err(restore) => {
                tracing::error!(
                    product_id = %product_id,
                    quantity = %quantity,
                    publish_error = %publish,
                    restore_error = %restore,
                    "Stock inconsistent, commit hand-off and compensation both failed"
                );
                metrics::counter!("purchase.inconsistent").increment(1);
                Err(PurchaseError::StockInconsistent {
                    product_id,
                    quantity,
                    publish,
                    restore,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use super::*;
    use holdfast_testing::{InMemoryCommitQueue, InMemoryStockLedger};

    fn quantity(value: u32) -> Quantity {
        Quantity::new(value).unwrap()
    }

    async fn seeded(
        stock: i64,
    ) -> (
        Arc<InMemoryStockLedger>,
        Arc<InMemoryCommitQueue>,
        PurchaseCoordinator,
    ) {
        let ledger = Arc::new(InMemoryStockLedger::new());
        let queue = Arc::new(InMemoryCommitQueue::new());
        ledger
            .set(ProductId::new(1), StockLevel::new(stock).unwrap())
            .await
            .unwrap();
        let coordinator = PurchaseCoordinator::new(
            Arc::clone(&ledger) as Arc<dyn StockLedger>,
            Arc::clone(&queue) as Arc<dyn CommitQueue>,
        );
        (ledger, queue, coordinator)
    }

    #[tokio::test]
    async fn accepted_purchase_publishes_the_commit() {
        let (ledger, queue, coordinator) = seeded(5).await;

        let outcome = coordinator.purchase(ProductId::new(1), quantity(2)).await.unwrap();
        assert_eq!(
            outcome,
            PurchaseOutcome::Accepted {
                new_stock: StockLevel::new(3).unwrap()
            }
        );
        assert_eq!(
            queue.published(),
            vec![PurchaseCommit::new(
                ProductId::new(1),
                quantity(2),
                StockLevel::new(3).unwrap()
            )]
        );
        assert_eq!(ledger.level(ProductId::new(1)), Some(3));
    }

    #[tokio::test]
    async fn rejected_purchase_publishes_nothing() {
        let (ledger, queue, coordinator) = seeded(1).await;

        let outcome = coordinator.purchase(ProductId::new(1), quantity(2)).await.unwrap();
        assert_eq!(outcome, PurchaseOutcome::Rejected);
        assert!(queue.published().is_empty());
        assert_eq!(ledger.level(ProductId::new(1)), Some(1));
    }

    #[tokio::test]
    async fn untracked_product_is_rejected_not_an_error() {
        let (_ledger, queue, coordinator) = seeded(5).await;

        let outcome = coordinator.purchase(ProductId::new(404), quantity(1)).await.unwrap();
        assert_eq!(outcome, PurchaseOutcome::Rejected);
        assert!(queue.published().is_empty());
    }

    #[tokio::test]
    async fn publish_failure_restores_the_reservation() {
        let (ledger, queue, coordinator) = seeded(10).await;
        queue.fail_publishes(true);

        let result = coordinator.purchase(ProductId::new(1), quantity(3)).await;
        assert!(matches!(result, Err(PurchaseError::PublishFailed(_))));
        // Compensation returned the reserved units
        assert_eq!(ledger.level(ProductId::new(1)), Some(10));
        assert!(queue.published().is_empty());
    }

    #[tokio::test]
    async fn failed_compensation_reports_both_errors() {
        let (ledger, queue, coordinator) = seeded(10).await;
        queue.fail_publishes(true);
        ledger.fail_restores(true);

        let result = coordinator.purchase(ProductId::new(1), quantity(3)).await;
        match result {
            Err(PurchaseError::StockInconsistent {
                product_id,
                quantity: lost,
                publish,
                restore,
            }) => {
                assert_eq!(product_id, ProductId::new(1));
                assert_eq!(lost, quantity(3));
                assert!(matches!(publish, QueueError::PublishFailed { .. }));
                assert!(matches!(restore, LedgerError::TransportError(_)));
            }
            other => panic!("expected StockInconsistent, got {other:?}"),
        }
        // The reservation stays consumed until reconciliation
        assert_eq!(ledger.level(ProductId::new(1)), Some(7));
    }

    #[tokio::test]
    async fn ledger_failure_surfaces_without_publishing() {
        let (ledger, queue, coordinator) = seeded(10).await;
        ledger.fail_reserves(true);

        let result = coordinator.purchase(ProductId::new(1), quantity(1)).await;
        assert!(matches!(result, Err(PurchaseError::Ledger(_))));
        assert!(queue.published().is_empty());
    }
}
