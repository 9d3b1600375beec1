//! In-memory commit queue for fast, deterministic testing.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use async_stream::stream;
use holdfast_core::commit::PurchaseCommit;
use holdfast_core::queue::{AckCommit, CommitDelivery, CommitQueue, CommitStream, QueueError};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<PurchaseCommit>,
    inflight: usize,
    // 0 means unlimited, matching broker prefetch semantics
    prefetch: u16,
}

/// In-memory commit queue with real acknowledgment semantics.
///
/// Unlike a plain channel, this fake models the delivery contract tests care
/// about: a delivery stays in flight until its handle is acknowledged,
/// dropping the handle requeues the commit at the head of the queue, and a
/// declared prefetch bounds how many deliveries are unacknowledged at once.
///
/// # Example
///
/// ```
/// use holdfast_testing::InMemoryCommitQueue;
/// use holdfast_core::{CommitQueue, PurchaseCommit, ProductId, Quantity, StockLevel};
/// use futures::StreamExt;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let queue = InMemoryCommitQueue::new();
/// queue.declare("purchase", 10).await?;
///
/// let commit = PurchaseCommit::new(
///     ProductId::new(1),
///     Quantity::new(2).ok_or("zero")?,
///     StockLevel::new(3).ok_or("negative")?,
/// );
/// queue.publish("purchase", &commit).await?;
///
/// let mut stream = queue.subscribe("purchase").await?;
/// let delivery = stream.next().await.ok_or("closed")??;
/// assert_eq!(delivery.commit().product_id, ProductId::new(1));
/// delivery.ack().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryCommitQueue {
    queues: Arc<Mutex<HashMap<String, QueueState>>>,
    notify: Arc<Notify>,
    fail_publishes: Arc<AtomicBool>,
    published: Arc<Mutex<Vec<PurchaseCommit>>>,
}

impl InMemoryCommitQueue {
    /// Create a new empty in-memory queue
    #[must_use]
    pub fn new() -> Self {
        Self {
            queues: Arc::new(Mutex::new(HashMap::new())),
            notify: Arc::new(Notify::new()),
            fail_publishes: Arc::new(AtomicBool::new(false)),
            published: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Make subsequent `publish` calls fail.
    ///
    /// Useful for driving the compensation path in coordinator tests: the
    /// reservation succeeds but its commit cannot be queued.
    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::SeqCst);
    }

    /// All commits successfully published so far, in publish order.
    ///
    /// Useful for asserting exactly what the coordinator handed off.
    #[must_use]
    pub fn published(&self) -> Vec<PurchaseCommit> {
        self.published.lock().unwrap().clone()
    }

    /// Number of commits waiting in a queue (excluding in-flight deliveries)
    #[must_use]
    pub fn pending(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .unwrap()
            .get(queue)
            .map_or(0, |state| state.pending.len())
    }

    /// Number of unacknowledged deliveries for a queue
    #[must_use]
    pub fn inflight(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .unwrap()
            .get(queue)
            .map_or(0, |state| state.inflight)
    }

    /// The prefetch recorded for a queue at declare time
    #[must_use]
    pub fn prefetch(&self, queue: &str) -> Option<u16> {
        self.queues
            .lock()
            .unwrap()
            .get(queue)
            .map(|state| state.prefetch)
    }

    /// Clear all queues and the publish log (for test isolation)
    pub fn clear(&self) {
        self.queues.lock().unwrap().clear();
        self.published.lock().unwrap().clear();
    }
}

impl Default for InMemoryCommitQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Ack handle for one in-memory delivery.
///
/// Dropping it unacknowledged puts the commit back at the head of its queue,
/// which is how the fake models broker redelivery.
struct MemoryAcker {
    queue: String,
    commit: PurchaseCommit,
    queues: Arc<Mutex<HashMap<String, QueueState>>>,
    notify: Arc<Notify>,
    acked: bool,
}

impl AckCommit for MemoryAcker {
    fn ack(mut self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send>> {
        self.acked = true;
        {
            let mut queues = self.queues.lock().unwrap();
            if let Some(state) = queues.get_mut(&self.queue) {
                state.inflight = state.inflight.saturating_sub(1);
            }
        }
        self.notify.notify_waiters();
        Box::pin(async { Ok(()) })
    }
}

impl Drop for MemoryAcker {
    fn drop(&mut self) {
        if self.acked {
            return;
        }
        if let Ok(mut queues) = self.queues.lock() {
            if let Some(state) = queues.get_mut(&self.queue) {
                state.inflight = state.inflight.saturating_sub(1);
                state.pending.push_front(self.commit);
            }
        }
        self.notify.notify_waiters();
    }
}

impl CommitQueue for InMemoryCommitQueue {
    fn declare(
        &self,
        queue: &str,
        prefetch: u16,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>> {
        let queue = queue.to_string();
        Box::pin(async move {
            let mut queues = self.queues.lock().unwrap();
            queues.entry(queue).or_default().prefetch = prefetch;
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
            if self.fail_publishes.load(Ordering::SeqCst) {
                return Err(QueueError::PublishFailed {
                    queue,
                    reason: "injected publish failure".to_string(),
                });
            }

            {
                let mut queues = self.queues.lock().unwrap();
                queues.entry(queue).or_default().pending.push_back(commit);
            }
            self.published.lock().unwrap().push(commit);
            self.notify.notify_waiters();
            Ok(())
        })
    }

    fn subscribe(
        &self,
        queue: &str,
    ) -> Pin<Box<dyn Future<Output = Result<CommitStream, QueueError>> + Send + '_>> {
        let queue = queue.to_string();
        let queues = Arc::clone(&self.queues);
        let notify = Arc::clone(&self.notify);
        Box::pin(async move {
            let stream = stream! {
                let notified = notify.notified();
                tokio::pin!(notified);
                loop {
                    // Register for wakeups before checking the queue, so a
                    // publish racing with the check is never lost
                    notified.as_mut().enable();

                    let next = {
                        let mut map = queues.lock().unwrap();
                        let state = map.entry(queue.clone()).or_default();
                        let open = state.prefetch == 0
                            || state.inflight < usize::from(state.prefetch);
                        if open {
                            if let Some(commit) = state.pending.pop_front() {
                                state.inflight += 1;
                                Some(commit)
                            } else {
                                None
                            }
                        } else {
                            None
                        }
                    };

                    if let Some(commit) = next {
                        let acker = MemoryAcker {
                            queue: queue.clone(),
                            commit,
                            queues: Arc::clone(&queues),
                            notify: Arc::clone(&notify),
                            acked: false,
                        };
                        yield Ok(CommitDelivery::new(commit, Box::new(acker)));
                    } else {
                        notified.as_mut().await;
                        notified.set(notify.notified());
                    }
                }
                // Pin the generator's output type to `()`; edition 2024
                // never-type fallback otherwise infers `!` for the diverging
                // loop, which breaks the `Stream` impl
                #[allow(unreachable_code)]
                ()
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
            let mut queues = self.queues.lock().unwrap();
            let count = queues
                .get_mut(&queue)
                .map_or(0, |state| state.pending.drain(..).count());
            Ok(u64::try_from(count).unwrap())
        })
    }
}
