//! The sync consumer that drains commits into the durable store.
//!
//! Each queued [`PurchaseCommit`] carries the absolute stock value observed
//! at reservation time, so applying it is a plain overwrite and redelivery is
//! harmless. The consumer acknowledges a delivery only after the write
//! succeeds; anything that fails stays on the queue for another attempt.

use futures::StreamExt;
use holdfast_core::commit::PurchaseCommit;
use holdfast_core::queue::{CommitDelivery, CommitQueue, QueueError};
use holdfast_core::store::{ProductStore, StoreError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::{PURCHASE_QUEUE, PURCHASE_QUEUE_PREFETCH};

const DEFAULT_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// Errors that interrupt one subscription pass of the sync consumer.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Queue declaration, subscription, delivery, or acknowledgment failed
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// A commit could not be written to the durable store
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Long-running consumer that mirrors queued commits into the durable store.
///
/// On any failure the consumer drops its subscription and starts a fresh one
/// after a short delay. Dropping the subscription closes the consuming
/// channel, which returns every unacknowledged delivery to the queue, so a
/// commit that hit a store outage is simply retried on the next pass.
///
/// # Example
///
/// ```no_run
/// use holdfast_runtime::StockSyncConsumer;
/// use holdfast_testing::{InMemoryCommitQueue, InMemoryProductStore};
/// use std::sync::Arc;
///
/// # async fn example() {
/// let queue = Arc::new(InMemoryCommitQueue::new());
/// let store = Arc::new(InMemoryProductStore::new());
///
/// let consumer = StockSyncConsumer::new(queue, store);
/// tokio::spawn(consumer.run());
/// # }
/// ```
pub struct StockSyncConsumer {
    queue: Arc<dyn CommitQueue>,
    store: Arc<dyn ProductStore>,
    resubscribe_delay: Duration,
}

impl StockSyncConsumer {
    /// Create a consumer over the given queue and durable store.
    #[must_use]
    pub fn new(queue: Arc<dyn CommitQueue>, store: Arc<dyn ProductStore>) -> Self {
        Self {
            queue,
            store,
            resubscribe_delay: DEFAULT_RESUBSCRIBE_DELAY,
        }
    }

    /// Set the delay before resubscribing after a failure or stream end.
    #[must_use]
    pub const fn resubscribe_delay(mut self, delay: Duration) -> Self {
        self.resubscribe_delay = delay;
        self
    }

    /// Run the consumer until the surrounding task is aborted.
    ///
    /// Declares the purchase queue, subscribes, and applies deliveries as
    /// they arrive. Failures are logged and followed by a resubscribe, so a
    /// broker or database outage degrades to lag rather than lost commits.
    pub async fn run(self) {
        loop {
            match self.sync().await {
                Ok(()) => tracing::info!("Commit stream ended, resubscribing"),
                Err(e) => {
                    tracing::warn!(error = %e, "Stock sync interrupted, resubscribing");
                }
            }
            tokio::time::sleep(self.resubscribe_delay).await;
        }
    }

    /// One subscription pass: consume deliveries until the stream ends or an
    /// operation fails.
    async fn sync(&self) -> Result<(), SyncError> {
        self.queue
            .declare(PURCHASE_QUEUE, PURCHASE_QUEUE_PREFETCH)
            .await?;
        let mut deliveries = self.queue.subscribe(PURCHASE_QUEUE).await?;
        tracing::info!(queue = PURCHASE_QUEUE, "Stock sync consuming");

        while let Some(item) = deliveries.next().await {
            match item {
                Ok(delivery) => self.apply(delivery).await?,
                Err(QueueError::DeserializationFailed(reason)) => {
                    // Poison payloads were already rejected by the
                    // subscription; record them and keep consuming
                    tracing::error!(reason = %reason, "Discarding undecodable commit");
                    metrics::counter!("stock_sync.poison_messages").increment(1);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Write one commit to the durable store, acknowledging only on success.
    async fn apply(&self, delivery: CommitDelivery) -> Result<(), SyncError> {
        let commit: PurchaseCommit = *delivery.commit();
        self.store
            .set_stock(commit.product_id, commit.new_stock)
            .await?;
        delivery.ack().await?;

        tracing::debug!(
            product_id = %commit.product_id,
            new_stock = %commit.new_stock,
            "Applied commit to durable store"
        );
        metrics::counter!("stock_sync.commits_applied").increment(1);
        Ok(())
    }
}
