//! AMQP commit queue implementation for Holdfast.
//!
//! This crate provides a production [`CommitQueue`] backed by an AMQP broker
//! (RabbitMQ or compatible). It layers three things on top of the raw client:
//!
//! - **A bounded connection pool**: every short-lived operation (declare,
//!   publish, purge) acquires a connection from a [`bb8`] pool, opens its
//!   own channel on it, and releases the connection when the call returns.
//!   The pool guard is released on every exit path, success or failure, so
//!   a failing publish can never leak a connection and starve later
//!   requests.
//! - **Confirmed hand-off**: publishes run on a channel in confirm mode and
//!   resolve only once the broker acknowledges the message. An unconfirmed
//!   or returned message is a [`QueueError::PublishFailed`], which the
//!   coordinator treats as "commit not durable" and compensates.
//! - **Pull-based consumption**: [`subscribe`] opens a dedicated connection
//!   outside the pool (a pooled one could be evicted while idle, closing
//!   the consumer channel under a live subscription) and spawns a task that
//!   owns it, forwarding each delivery, paired with its ack handle, into an
//!   in-process channel wrapped as a [`CommitStream`]. The connection is
//!   closed when the stream is dropped.
//!
//! # Delivery Semantics
//!
//! Queues are declared durable and messages are published persistent, so
//! commits survive a broker restart. Delivery is at-least-once: a delivery
//! is discarded only when the receiver invokes its ack handle, and anything
//! unacknowledged is redelivered after the consuming channel closes. The
//! prefetch recorded at [`declare`] time bounds how many unacknowledged
//! deliveries one consumer holds, which is what keeps a slow consumer from
//! being flooded.
//!
//! # Example
//!
//! ```no_run
//! use holdfast_amqp::AmqpCommitQueue;
//! use holdfast_core::{CommitQueue, ProductId, PurchaseCommit, Quantity, StockLevel};
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = AmqpCommitQueue::new("amqp://127.0.0.1:5672").await?;
//! queue.declare("purchase", 100).await?;
//!
//! let commit = PurchaseCommit::new(
//!     ProductId::new(1),
//!     Quantity::new(1).ok_or("zero")?,
//!     StockLevel::new(4).ok_or("negative")?,
//! );
//! queue.publish("purchase", &commit).await?;
//!
//! let mut stream = queue.subscribe("purchase").await?;
//! while let Some(result) = stream.next().await {
//!     let delivery = result?;
//!     println!("received {:?}", delivery.commit());
//!     delivery.ack().await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! [`declare`]: CommitQueue::declare
//! [`subscribe`]: CommitQueue::subscribe

use async_trait::async_trait;
use bb8::{Pool, PooledConnection, RunError};
use holdfast_core::commit::PurchaseCommit;
use holdfast_core::queue::{AckCommit, CommitDelivery, CommitQueue, CommitStream, QueueError};
use lapin::acker::Acker;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    BasicRejectOptions, ConfirmSelectOptions, QueueDeclareOptions, QueuePurgeOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Smallest pool size kept warm.
const DEFAULT_MIN_CONNECTIONS: u32 = 2;
/// Largest number of broker connections the pool will open.
const DEFAULT_MAX_CONNECTIONS: u32 = 10;
/// How long an operation waits for a pooled connection before failing.
const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);
/// Idle connections beyond the minimum are closed after this long.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
/// Prefetch applied to consumers of queues never passed to `declare`.
const DEFAULT_PREFETCH: u16 = 100;

/// AMQP persistent delivery mode (survives broker restart).
const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// bb8 connection manager that opens AMQP connections.
///
/// Connections are validated on checkout and recycled once the broker side
/// reports them disconnected.
pub struct AmqpConnectionManager {
    url: String,
}

impl AmqpConnectionManager {
    /// Create a manager that connects to the given AMQP URL.
    #[must_use]
    pub const fn new(url: String) -> Self {
        Self { url }
    }
}

#[async_trait]
impl bb8::ManageConnection for AmqpConnectionManager {
    type Connection = Connection;
    type Error = lapin::Error;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let connection = Connection::connect(&self.url, ConnectionProperties::default()).await?;
        tracing::debug!("Opened AMQP connection");
        Ok(connection)
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        if conn.status().connected() {
            Ok(())
        } else {
            Err(lapin::Error::InvalidConnectionState(conn.status().state()))
        }
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        !conn.status().connected()
    }
}

/// AMQP-backed commit queue.
///
/// Cheap to clone; clones share the same connection pool and declared
/// prefetch table.
///
/// # Example
///
/// ```no_run
/// use holdfast_amqp::AmqpCommitQueue;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// // Default pool configuration
/// let queue = AmqpCommitQueue::new("amqp://127.0.0.1:5672").await?;
///
/// // Custom pool configuration
/// let queue = AmqpCommitQueue::builder()
///     .url("amqp://127.0.0.1:5672")
///     .min_connections(1)
///     .max_connections(4)
///     .acquire_timeout(Duration::from_secs(5))
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AmqpCommitQueue {
    /// Bounded pool of broker connections for short-lived operations
    pool: Pool<AmqpConnectionManager>,
    /// Broker URL, kept for the dedicated consumer connections
    url: Arc<str>,
    /// Bound on both pool checkout and dedicated connection establishment
    acquire_timeout: Duration,
    /// Prefetch recorded per declared queue, applied at subscribe time
    prefetch: Arc<Mutex<HashMap<String, u16>>>,
}

impl AmqpCommitQueue {
    /// Create a commit queue with the default pool configuration.
    ///
    /// # Arguments
    ///
    /// * `url` - AMQP connection URL (e.g., "<amqp://127.0.0.1:5672>")
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ConnectionFailed`] if the pool cannot establish
    /// its initial connections.
    pub async fn new(url: &str) -> Result<Self, QueueError> {
        Self::builder().url(url).build().await
    }

    /// Create a new builder for configuring the pool.
    #[must_use]
    pub fn builder() -> AmqpCommitQueueBuilder {
        AmqpCommitQueueBuilder::default()
    }

    /// Acquire a pooled connection and open a fresh channel on it.
    ///
    /// The returned guard keeps the connection checked out until the caller's
    /// scope ends; dropping it returns the connection to the pool on every
    /// exit path.
    async fn acquire_channel(
        &self,
    ) -> Result<(PooledConnection<'_, AmqpConnectionManager>, Channel), QueueError> {
        let conn = self.pool.get().await.map_err(|e| match e {
            RunError::TimedOut => QueueError::AcquireTimeout(
                "timed out waiting for a pooled AMQP connection".to_string(),
            ),
            RunError::User(err) => {
                QueueError::ConnectionFailed(format!("Failed to open AMQP connection: {err}"))
            }
        })?;

        let channel = conn.create_channel().await.map_err(|e| {
            QueueError::TransportError(format!("Failed to create AMQP channel: {e}"))
        })?;

        Ok((conn, channel))
    }

    /// Open a connection owned by a consumer, outside the pool.
    ///
    /// A subscription's channel must live as long as its deliveries, so it
    /// cannot sit on a pooled connection: idle eviction would close the
    /// connection under the consumer mid-stream. The connection returned
    /// here is moved into the forwarding task and dropped when it exits,
    /// which is also what returns unacknowledged deliveries to the queue.
    async fn open_consumer_connection(&self) -> Result<Connection, QueueError> {
        let connect = Connection::connect(&self.url, ConnectionProperties::default());
        match tokio::time::timeout(self.acquire_timeout, connect).await {
            Ok(Ok(connection)) => Ok(connection),
            Ok(Err(e)) => Err(QueueError::ConnectionFailed(format!(
                "Failed to open consumer connection: {e}"
            ))),
            Err(_) => Err(QueueError::AcquireTimeout(
                "timed out opening a consumer connection".to_string(),
            )),
        }
    }
}

/// Builder for configuring an [`AmqpCommitQueue`].
///
/// # Example
///
/// ```no_run
/// use holdfast_amqp::AmqpCommitQueue;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let queue = AmqpCommitQueue::builder()
///     .url("amqp://127.0.0.1:5672")
///     .min_connections(2)
///     .max_connections(10)
///     .acquire_timeout(Duration::from_secs(10))
///     .idle_timeout(Duration::from_secs(30))
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct AmqpCommitQueueBuilder {
    url: Option<String>,
    min_connections: Option<u32>,
    max_connections: Option<u32>,
    acquire_timeout: Option<Duration>,
    idle_timeout: Option<Duration>,
}

impl AmqpCommitQueueBuilder {
    /// Set the broker URL.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set how many connections the pool keeps warm.
    ///
    /// Default: 2
    #[must_use]
    pub const fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = Some(min);
        self
    }

    /// Set the maximum number of broker connections.
    ///
    /// Default: 10
    #[must_use]
    pub const fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = Some(max);
        self
    }

    /// Set how long an operation waits for a pooled connection. The same
    /// bound applies to opening a subscription's dedicated connection.
    ///
    /// A timeout here surfaces as [`QueueError::AcquireTimeout`], which the
    /// coordinator handles exactly like a publish failure.
    ///
    /// Default: 10 seconds
    #[must_use]
    pub const fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Set how long an idle connection beyond the minimum is kept open.
    ///
    /// Default: 30 seconds
    #[must_use]
    pub const fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Build the [`AmqpCommitQueue`], establishing the pool's minimum
    /// connections.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ConnectionFailed`] if the URL is not set or the
    /// broker cannot be reached.
    pub async fn build(self) -> Result<AmqpCommitQueue, QueueError> {
        let url = self
            .url
            .ok_or_else(|| QueueError::ConnectionFailed("AMQP url not configured".to_string()))?;

        let min_connections = self.min_connections.unwrap_or(DEFAULT_MIN_CONNECTIONS);
        let max_connections = self.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS);
        let acquire_timeout = self.acquire_timeout.unwrap_or(DEFAULT_ACQUIRE_TIMEOUT);
        let idle_timeout = self.idle_timeout.unwrap_or(DEFAULT_IDLE_TIMEOUT);

        let consumer_url: Arc<str> = Arc::from(url.as_str());
        let manager = AmqpConnectionManager::new(url);
        let pool = Pool::builder()
            .min_idle(Some(min_connections))
            .max_size(max_connections)
            .connection_timeout(acquire_timeout)
            .idle_timeout(Some(idle_timeout))
            .build(manager)
            .await
            .map_err(|e| {
                QueueError::ConnectionFailed(format!("Failed to build AMQP connection pool: {e}"))
            })?;

        tracing::info!(
            min_connections = min_connections,
            max_connections = max_connections,
            acquire_timeout_secs = acquire_timeout.as_secs(),
            idle_timeout_secs = idle_timeout.as_secs(),
            "AMQP connection pool ready"
        );

        Ok(AmqpCommitQueue {
            pool,
            url: consumer_url,
            acquire_timeout,
            prefetch: Arc::new(Mutex::new(HashMap::new())),
        })
    }
}

/// Ack handle backed by the broker delivery's acker.
struct AmqpAcker {
    acker: Acker,
}

impl AckCommit for AmqpAcker {
    fn ack(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send>> {
        Box::pin(async move {
            self.acker
                .ack(BasicAckOptions::default())
                .await
                .map_err(|e| QueueError::AckFailed(format!("Failed to ack delivery: {e}")))
        })
    }
}

impl CommitQueue for AmqpCommitQueue {
    fn declare(
        &self,
        queue: &str,
        prefetch: u16,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>> {
        let queue = queue.to_string();

        Box::pin(async move {
            let (_conn, channel) = self.acquire_channel().await?;

            channel
                .queue_declare(
                    &queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..QueueDeclareOptions::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| {
                    QueueError::TransportError(format!("Failed to declare queue '{queue}': {e}"))
                })?;

            self.prefetch.lock().await.insert(queue.clone(), prefetch);

            tracing::info!(
                queue = %queue,
                prefetch = prefetch,
                "Declared durable queue"
            );
            Ok(())
        })
    }

    fn publish(
        &self,
        queue: &str,
        commit: &PurchaseCommit,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>> {
        let queue = queue.to_string();
        let commit = *commit;

        Box::pin(async move {
            let payload = serde_json::to_vec(&commit).map_err(|e| QueueError::PublishFailed {
                queue: queue.clone(),
                reason: format!("Failed to encode commit: {e}"),
            })?;

            let (_conn, channel) = self.acquire_channel().await?;

            // Confirm mode: the publish resolves only once the broker has the
            // message, so a silent drop cannot masquerade as success
            channel
                .confirm_select(ConfirmSelectOptions::default())
                .await
                .map_err(|e| QueueError::PublishFailed {
                    queue: queue.clone(),
                    reason: format!("Failed to enable confirms: {e}"),
                })?;

            let confirmation = channel
                .basic_publish(
                    "",
                    &queue,
                    BasicPublishOptions::default(),
                    &payload,
                    BasicProperties::default()
                        .with_content_type("application/json".into())
                        .with_delivery_mode(DELIVERY_MODE_PERSISTENT),
                )
                .await
                .map_err(|e| QueueError::PublishFailed {
                    queue: queue.clone(),
                    reason: e.to_string(),
                })?
                .await
                .map_err(|e| QueueError::PublishFailed {
                    queue: queue.clone(),
                    reason: format!("Confirmation not received: {e}"),
                })?;

            match confirmation {
                Confirmation::Ack(None) | Confirmation::NotRequested => {
                    tracing::debug!(
                        queue = %queue,
                        product_id = %commit.product_id,
                        new_stock = %commit.new_stock,
                        "Published commit"
                    );
                    Ok(())
                }
                Confirmation::Ack(Some(_)) => Err(QueueError::PublishFailed {
                    queue,
                    reason: "Message returned by broker".to_string(),
                }),
                Confirmation::Nack(_) => Err(QueueError::PublishFailed {
                    queue,
                    reason: "Broker nacked the publish".to_string(),
                }),
            }
        })
    }

    fn subscribe(
        &self,
        queue: &str,
    ) -> Pin<Box<dyn Future<Output = Result<CommitStream, QueueError>> + Send + '_>> {
        let queue = queue.to_string();

        Box::pin(async move {
            let prefetch = self
                .prefetch
                .lock()
                .await
                .get(&queue)
                .copied()
                .unwrap_or(DEFAULT_PREFETCH);

            // The consuming channel outlives this call, so it gets its own
            // connection rather than a pooled one
            let connection = self.open_consumer_connection().await?;
            let channel = connection.create_channel().await.map_err(|e| {
                QueueError::SubscriptionFailed {
                    queue: queue.clone(),
                    reason: format!("Failed to create consumer channel: {e}"),
                }
            })?;

            channel
                .basic_qos(prefetch, BasicQosOptions::default())
                .await
                .map_err(|e| QueueError::SubscriptionFailed {
                    queue: queue.clone(),
                    reason: format!("Failed to set prefetch: {e}"),
                })?;

            let consumer = channel
                .basic_consume(
                    &queue,
                    "",
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| QueueError::SubscriptionFailed {
                    queue: queue.clone(),
                    reason: e.to_string(),
                })?;

            tracing::info!(
                queue = %queue,
                prefetch = prefetch,
                "Subscribed to queue"
            );

            let (tx, rx) = tokio::sync::mpsc::channel(usize::from(prefetch).max(1));

            // Spawn a task that owns the consuming channel and forwards
            // deliveries; each one carries its own ack handle
            tokio::spawn(async move {
                use futures::StreamExt;

                // The connection and channel must outlive the consumer for
                // acks to reach the broker; both drop when this task exits
                let _connection = connection;
                let _channel = channel;
                let mut consumer = consumer;

                loop {
                    let delivery_result = tokio::select! {
                        next = consumer.next() => match next {
                            Some(result) => result,
                            None => break,
                        },
                        // Receiver gone: close the consuming channel so the
                        // broker requeues anything left unacknowledged
                        () = tx.closed() => {
                            tracing::debug!("Delivery receiver dropped, closing consumer channel");
                            break;
                        }
                    };

                    match delivery_result {
                        Ok(delivery) => {
                            let Delivery { data, acker, .. } = delivery;

                            match serde_json::from_slice::<PurchaseCommit>(&data) {
                                Ok(commit) => {
                                    let item = CommitDelivery::new(
                                        commit,
                                        Box::new(AmqpAcker { acker }),
                                    );
                                    if tx.send(Ok(item)).await.is_err() {
                                        tracing::debug!(
                                            "Delivery receiver dropped, exiting consumer task"
                                        );
                                        break;
                                    }
                                }
                                Err(e) => {
                                    // Reject without requeue: a payload that does
                                    // not decode now will not decode on redelivery
                                    if let Err(reject_err) =
                                        acker.reject(BasicRejectOptions { requeue: false }).await
                                    {
                                        tracing::warn!(
                                            error = %reject_err,
                                            "Failed to reject undecodable message"
                                        );
                                    }
                                    let err = QueueError::DeserializationFailed(format!(
                                        "Failed to decode commit payload: {e}"
                                    ));
                                    if tx.send(Err(err)).await.is_err() {
                                        break;
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            let err = QueueError::TransportError(format!(
                                "Failed to receive delivery: {e}"
                            ));
                            if tx.send(Err(err)).await.is_err() {
                                break;
                            }
                        }
                    }
                }

                tracing::debug!("Consumer task exiting");
            });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as CommitStream)
        })
    }

    fn purge(
        &self,
        queue: &str,
    ) -> Pin<Box<dyn Future<Output = Result<u64, QueueError>> + Send + '_>> {
        let queue = queue.to_string();

        Box::pin(async move {
            let (_conn, channel) = self.acquire_channel().await?;

            let purged = channel
                .queue_purge(&queue, QueuePurgeOptions::default())
                .await
                .map_err(|e| {
                    QueueError::TransportError(format!("Failed to purge queue '{queue}': {e}"))
                })?;

            tracing::debug!(queue = %queue, purged = purged, "Purged queue");
            Ok(u64::from(purged))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amqp_commit_queue_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<AmqpCommitQueue>();
        assert_sync::<AmqpCommitQueue>();
    }

    #[test]
    fn builder_default_works() {
        let _builder = AmqpCommitQueue::builder();
    }
}
