//! # Holdfast Runtime
//!
//! The moving parts of the reservation pipeline: the purchase coordinator,
//! the stock sync consumer, and the service facade that wires them to
//! concrete backends.
//!
//! ## Core Components
//!
//! - **[`PurchaseCoordinator`]**: reserve atomically, queue the commit,
//!   compensate when the hand-off fails
//! - **[`StockSyncConsumer`]**: drain queued commits into the durable store
//!   with acknowledge-after-write semantics
//! - **[`ProductService`]**: the facade composing purchases, stock reads,
//!   and initialization over injected backends
//!
//! Everything here works against the `holdfast-core` traits, so the same
//! runtime drives the production Redis/AMQP/Postgres stack and the in-memory
//! doubles from `holdfast-testing`.
//!
//! ## Example
//!
//! ```
//! use holdfast_runtime::{ProductService, PurchaseOutcome};
//! use holdfast_testing::{InMemoryCommitQueue, InMemoryProductStore, InMemoryStockLedger};
//! use holdfast_core::{ProductId, Quantity, StockLevel};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let service = ProductService::new(
//!     Arc::new(InMemoryStockLedger::new()),
//!     Arc::new(InMemoryCommitQueue::new()),
//!     Arc::new(InMemoryProductStore::new()),
//! );
//!
//! service.initialize(ProductId::new(1), StockLevel::new(5).ok_or("negative")?).await?;
//!
//! let outcome = service
//!     .purchase(ProductId::new(1), Quantity::new(2).ok_or("zero")?)
//!     .await?;
//! assert_eq!(outcome, PurchaseOutcome::Accepted { new_stock: StockLevel::new(3).ok_or("negative")? });
//! # Ok(())
//! # }
//! ```

/// Purchase coordination: reserve, hand off, compensate
pub mod coordinator;

/// The consumer that mirrors commits into the durable store
pub mod consumer;

/// The product-facing service facade
pub mod service;

pub use consumer::{StockSyncConsumer, SyncError};
pub use coordinator::{PurchaseCoordinator, PurchaseError, PurchaseOutcome};
pub use service::{ProductService, ServiceError};

/// The well-known queue carrying purchase commits.
pub const PURCHASE_QUEUE: &str = "purchase";

/// Prefetch applied to the purchase queue's consumer channel.
///
/// Bounds how many commits the sync consumer holds unacknowledged at once.
pub const PURCHASE_QUEUE_PREFETCH: u16 = 100;
