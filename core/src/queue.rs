//! Durable commit queue abstraction.
//!
//! The queue decouples the fast reservation path from slow persistence: the
//! coordinator publishes a [`PurchaseCommit`] the instant a reservation
//! succeeds, and the sync consumer drains the queue at its own pace. The
//! broker persists messages and redelivers anything left unacknowledged, so
//! an accepted purchase survives a consumer crash mid-flight.
//!
//! # Key Principles
//!
//! - **At-least-once delivery**: consumers must tolerate redelivery; the
//!   commit payload is designed so re-applying it is idempotent
//! - **Explicit acknowledgment**: a delivery is discarded only after the
//!   receiver invokes its ack handle; dropping the handle leaves the message
//!   eligible for redelivery
//! - **Backpressure via prefetch**: a consumer channel holds at most
//!   `prefetch` unacknowledged messages, so a slow consumer is not flooded
//! - **Per-channel FIFO**: messages published on one channel arrive in
//!   publish order; no global order across producer connections
//!
//! # Implementations
//!
//! - `AmqpCommitQueue` (holdfast-amqp) - production, pooled AMQP connections
//! - `InMemoryCommitQueue` (holdfast-testing) - deterministic fake for tests

use crate::commit::PurchaseCommit;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during commit queue operations.
#[derive(Error, Debug, Clone)]
pub enum QueueError {
    /// Failed to establish a broker connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Timed out waiting for a pooled connection
    #[error("Connection acquire timed out: {0}")]
    AcquireTimeout(String),

    /// Failed to publish to a queue, or the broker did not confirm hand-off
    #[error("Publish failed for queue '{queue}': {reason}")]
    PublishFailed {
        /// The queue that failed
        queue: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to a queue
    #[error("Subscription failed for queue '{queue}': {reason}")]
    SubscriptionFailed {
        /// The queue that failed to subscribe
        queue: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to decode a message payload
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Failed to acknowledge a delivery
    #[error("Ack failed: {0}")]
    AckFailed(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// Acknowledgment handle carried alongside each received commit.
///
/// Consuming the handle tells the broker the commit has been durably applied
/// and may be discarded. Dropping it without acknowledging leaves the message
/// unacknowledged, and the broker redelivers it once the consuming channel
/// closes.
pub trait AckCommit: Send {
    /// Acknowledge the delivery this handle belongs to.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::AckFailed`] when the broker rejects or cannot
    /// receive the acknowledgment.
    fn ack(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send>>;
}

/// One commit received from a queue, paired with its ack handle.
pub struct CommitDelivery {
    commit: PurchaseCommit,
    acker: Box<dyn AckCommit>,
}

impl CommitDelivery {
    /// Pair a decoded commit with the handle that acknowledges it
    #[must_use]
    pub fn new(commit: PurchaseCommit, acker: Box<dyn AckCommit>) -> Self {
        Self { commit, acker }
    }

    /// The commit carried by this delivery
    #[must_use]
    pub const fn commit(&self) -> &PurchaseCommit {
        &self.commit
    }

    /// Acknowledge the delivery, consuming it.
    ///
    /// Call only after the commit has been applied; an unacknowledged
    /// delivery is redelivered.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::AckFailed`] when the acknowledgment cannot be
    /// delivered to the broker.
    pub async fn ack(self) -> Result<(), QueueError> {
        self.acker.ack().await
    }
}

impl std::fmt::Debug for CommitDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitDelivery")
            .field("commit", &self.commit)
            .finish_non_exhaustive()
    }
}

/// Stream of commit deliveries from a subscription.
///
/// Each item is a `Result`: decoded deliveries arrive as `Ok`, undecodable
/// payloads and transport faults as `Err`. The stream ends when the
/// underlying channel closes; callers that need continuous consumption
/// resubscribe.
pub type CommitStream = Pin<Box<dyn Stream<Item = Result<CommitDelivery, QueueError>> + Send>>;

/// Trait for durable commit queue implementations.
///
/// Every operation acquires a broker connection (and an independent channel
/// on it) for the duration of the call and releases it on all exit paths;
/// a subscription's channel lives on for the lifetime of its stream. The
/// connection pool behind this trait is the only shared mutable resource
/// in the queue component; leaking from it blocks every subsequent request.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of
/// `async fn` to enable trait object usage (`Arc<dyn CommitQueue>`).
pub trait CommitQueue: Send + Sync {
    /// Declare a durable queue and set its consumer prefetch.
    ///
    /// Idempotent: declaring an existing queue with the same properties is a
    /// no-op on the broker.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] when the broker is unreachable or rejects the
    /// declaration.
    fn declare(
        &self,
        queue: &str,
        prefetch: u16,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>>;

    /// Publish a commit to a queue with persistent delivery.
    ///
    /// Resolves only once the broker has confirmed hand-off. A commit whose
    /// publish fails is not durable and the caller must compensate the
    /// reservation it records.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] when the connection cannot be acquired, the
    /// publish fails, or the broker does not confirm it.
    fn publish(
        &self,
        queue: &str,
        commit: &PurchaseCommit,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>>;

    /// Subscribe to a queue and receive a pull-based stream of deliveries.
    ///
    /// The consuming channel applies the prefetch set at [`declare`] time,
    /// bounding how many unacknowledged deliveries are in flight.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::SubscriptionFailed`] when the consumer cannot be
    /// registered.
    ///
    /// [`declare`]: CommitQueue::declare
    fn subscribe(
        &self,
        queue: &str,
    ) -> Pin<Box<dyn Future<Output = Result<CommitStream, QueueError>> + Send + '_>>;

    /// Remove all messages from a queue, returning how many were purged.
    ///
    /// Test and reset scenarios only; not part of the steady-state protocol.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] when the broker is unreachable.
    fn purge(
        &self,
        queue: &str,
    ) -> Pin<Box<dyn Future<Output = Result<u64, QueueError>> + Send + '_>>;
}
