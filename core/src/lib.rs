//! # Holdfast Core
//!
//! Core traits and types for the Holdfast inventory reservation system.
//!
//! Holdfast solves high-concurrency inventory reservation: many simultaneous
//! purchase requests decrement a finite stock counter without ever
//! overselling, while every accepted purchase is eventually recorded in a
//! durable store even if the process recording it crashes mid-flight.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   reserve (atomic       ┌──────────────┐
//! │  Purchase    │──check-and-decrement)──►│    Stock     │
//! │ Coordinator  │◄──restore (compensate)──│    Ledger    │◄── source of
//! └──────┬───────┘                         └──────────────┘    truth
//!        │ publish PurchaseCommit
//!        ▼
//! ┌──────────────┐   subscribe + ack       ┌──────────────┐
//! │    Commit    │────────────────────────►│  Sync        │
//! │    Queue     │   (at-least-once)       │  Consumer    │
//! └──────────────┘                         └──────┬───────┘
//!                                                 │ set_stock (absolute)
//!                                                 ▼
//!                                          ┌──────────────┐
//!                                          │   Product    │◄── eventually
//!                                          │    Store     │    consistent
//!                                          └──────────────┘    mirror
//! ```
//!
//! The ledger is the single source of truth for "can this purchase proceed";
//! the durable store is a time-lagged mirror for audits and reads that
//! tolerate staleness. The coordinator owns no persistent state.
//!
//! # Crates
//!
//! - `holdfast-core` (this crate): the trait contracts and domain types
//! - `holdfast-redis`: [`ledger::StockLedger`] on Redis
//! - `holdfast-amqp`: [`queue::CommitQueue`] on AMQP with pooled connections
//! - `holdfast-postgres`: [`store::ProductStore`] on Postgres
//! - `holdfast-runtime`: the coordinator, the sync consumer, and the service
//!   facade that ties them together
//! - `holdfast-testing`: in-memory fakes with failure injection

pub mod commit;
pub mod ledger;
pub mod queue;
pub mod store;
pub mod types;

pub use commit::PurchaseCommit;
pub use ledger::{LedgerError, StockLedger};
pub use queue::{AckCommit, CommitDelivery, CommitQueue, CommitStream, QueueError};
pub use store::{ProductStore, StoreError};
pub use types::{ProductId, Quantity, StockLevel};
