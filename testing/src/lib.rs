//! # Holdfast Testing
//!
//! In-memory test doubles for the Holdfast reservation pipeline.
//!
//! This crate provides:
//! - [`InMemoryStockLedger`]: atomic ledger fake with failure injection
//! - [`InMemoryCommitQueue`]: commit queue fake with real ack, redelivery,
//!   and prefetch semantics
//! - [`InMemoryProductStore`]: durable store fake with update-only writes
//!
//! The doubles need no running backend, are deterministic, and expose
//! inspection helpers so tests can assert on internal state directly. Each
//! one also supports injecting failures, which is how the scenario tests
//! reach compensation and redelivery paths that a healthy live stack never
//! takes.
//!
//! ## Example
//!
//! ```
//! use holdfast_testing::{InMemoryCommitQueue, InMemoryStockLedger};
//! use holdfast_core::{ProductId, Quantity, StockLedger, StockLevel};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ledger = InMemoryStockLedger::new();
//! let queue = InMemoryCommitQueue::new();
//!
//! ledger.set(ProductId::new(1), StockLevel::new(5).ok_or("negative")?).await?;
//! queue.fail_publishes(true); // drive the compensation path
//! # Ok(())
//! # }
//! ```

pub mod ledger_mocks;
pub mod queue_mocks;
pub mod store_mocks;

// Re-export commonly used items
pub use ledger_mocks::InMemoryStockLedger;
pub use queue_mocks::InMemoryCommitQueue;
pub use store_mocks::InMemoryProductStore;
