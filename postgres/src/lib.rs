//! `PostgreSQL` product store implementation for Holdfast.
//!
//! This crate provides the durable side of the system: a
//! [`ProductStore`](holdfast_core::store::ProductStore) backed by a
//! `product(id, stock)` table. The sync consumer writes each queued commit's
//! absolute stock value here, making the table an eventually-consistent
//! mirror of the live ledger.
//!
//! # Example
//!
//! ```no_run
//! use holdfast_postgres::PostgresProductStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresProductStore::connect("postgres://localhost/holdfast").await?;
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

pub mod product_store;

pub use product_store::PostgresProductStore;
