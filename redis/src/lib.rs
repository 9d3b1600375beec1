//! Redis stock ledger implementation for Holdfast.
//!
//! This crate provides a production [`StockLedger`] backed by Redis. Each
//! product's stock lives in a hash at `product:{id}` under the `stock` field,
//! and the reserve primitive runs as a server-side Lua script so the
//! check-and-decrement executes as a single indivisible unit no matter how
//! many callers race on the same key.
//!
//! # Atomicity
//!
//! Redis executes a Lua script with no other command interleaved. The reserve
//! script reads the field, refuses if the stock is absent or below the
//! requested quantity, and otherwise decrements and returns the new value.
//! Concurrent reservations against the same product therefore serialize on
//! the Redis server, never in this process.
//!
//! # Example
//!
//! ```no_run
//! use holdfast_redis::RedisStockLedger;
//! use holdfast_core::{ProductId, Quantity, StockLevel, StockLedger};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ledger = RedisStockLedger::new("redis://127.0.0.1:6379").await?;
//!
//! let product = ProductId::new(1);
//! ledger.set(product, StockLevel::new(10).ok_or("negative")?).await?;
//!
//! if let Some(quantity) = Quantity::new(3) {
//!     match ledger.reserve(product, quantity).await? {
//!         Some(new_stock) => println!("reserved, {new_stock} left"),
//!         None => println!("insufficient stock"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use holdfast_core::ledger::{LedgerError, StockLedger};
use holdfast_core::types::{ProductId, Quantity, StockLevel};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::future::Future;
use std::pin::Pin;

/// Hash field holding the stock counter.
const STOCK_FIELD: &str = "stock";

/// Conditional decrement, executed atomically by the Redis server.
///
/// KEYS[1] is the product hash, ARGV[1] the field name, ARGV[2] the quantity.
/// Returns the new stock value, or nil when the field is absent or the stock
/// is below the requested quantity. An absent field means "no stock tracked",
/// which is refused rather than treated as zero-and-created.
const RESERVE_SCRIPT: &str = r"
    local stock = redis.call('HGET', KEYS[1], ARGV[1])
    if stock == false then
        return nil
    end
    local quantity = tonumber(ARGV[2])
    if tonumber(stock) < quantity then
        return nil
    end
    return redis.call('HINCRBY', KEYS[1], ARGV[1], -quantity)
";

/// Redis-backed stock ledger.
///
/// Holds a [`ConnectionManager`], which multiplexes one underlying
/// connection, reconnects on failure, and is cheap to clone per operation.
///
/// # Example
///
/// ```no_run
/// use holdfast_redis::RedisStockLedger;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let ledger = RedisStockLedger::new("redis://127.0.0.1:6379").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisStockLedger {
    /// Connection manager for connection pooling.
    conn_manager: ConnectionManager,
}

impl RedisStockLedger {
    /// Create a new Redis stock ledger.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "<redis://127.0.0.1:6379>")
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::ConnectionFailed`] if the client cannot be
    /// created or the connection manager cannot be established.
    pub async fn new(redis_url: &str) -> Result<Self, LedgerError> {
        let client = Client::open(redis_url).map_err(|e| {
            LedgerError::ConnectionFailed(format!("Failed to create Redis client: {e}"))
        })?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            LedgerError::ConnectionFailed(format!(
                "Failed to create Redis connection manager: {e}"
            ))
        })?;

        Ok(Self { conn_manager })
    }

    /// Get the Redis key for a product's stock hash.
    fn product_key(product_id: ProductId) -> String {
        format!("product:{product_id}")
    }
}

impl StockLedger for RedisStockLedger {
    fn reserve(
        &self,
        product_id: ProductId,
        quantity: Quantity,
    ) -> Pin<Box<dyn Future<Output = Result<Option<StockLevel>, LedgerError>> + Send + '_>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let key = Self::product_key(product_id);

            let new_stock: Option<i64> = redis::Script::new(RESERVE_SCRIPT)
                .key(&key)
                .arg(STOCK_FIELD)
                .arg(quantity.get())
                .invoke_async(&mut conn)
                .await
                .map_err(|e| {
                    LedgerError::TransportError(format!("Failed to execute reserve script: {e}"))
                })?;

            match new_stock {
                Some(value) => {
                    let level = StockLevel::new(value)
                        .ok_or(LedgerError::InvalidValue { key, value })?;
                    tracing::debug!(
                        product_id = %product_id,
                        quantity = %quantity,
                        new_stock = %level,
                        "Reserved stock"
                    );
                    Ok(Some(level))
                }
                None => {
                    tracing::debug!(
                        product_id = %product_id,
                        quantity = %quantity,
                        "Reservation refused: insufficient stock"
                    );
                    Ok(None)
                }
            }
        })
    }

    fn restore(
        &self,
        product_id: ProductId,
        quantity: Quantity,
    ) -> Pin<Box<dyn Future<Output = Result<StockLevel, LedgerError>> + Send + '_>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let key = Self::product_key(product_id);

            let value: i64 = conn
                .hincr(&key, STOCK_FIELD, i64::from(quantity.get()))
                .await
                .map_err(|e| {
                    LedgerError::TransportError(format!("Failed to restore stock: {e}"))
                })?;

            let level = StockLevel::new(value).ok_or(LedgerError::InvalidValue { key, value })?;
            tracing::debug!(
                product_id = %product_id,
                quantity = %quantity,
                new_stock = %level,
                "Restored stock"
            );
            Ok(level)
        })
    }

    fn set(
        &self,
        product_id: ProductId,
        stock: StockLevel,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let key = Self::product_key(product_id);

            let _: () = conn
                .hset(&key, STOCK_FIELD, stock.get())
                .await
                .map_err(|e| LedgerError::TransportError(format!("Failed to set stock: {e}")))?;

            tracing::info!(
                product_id = %product_id,
                stock = %stock,
                "Set stock"
            );
            Ok(())
        })
    }

    fn get(
        &self,
        product_id: ProductId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<StockLevel>, LedgerError>> + Send + '_>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let key = Self::product_key(product_id);

            let value: Option<i64> = conn
                .hget(&key, STOCK_FIELD)
                .await
                .map_err(|e| LedgerError::TransportError(format!("Failed to get stock: {e}")))?;

            value
                .map(|v| StockLevel::new(v).ok_or(LedgerError::InvalidValue { key, value: v }))
                .transpose()
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    // Note: The #[ignore]d tests require a running Redis instance
    // Run with: docker run -d -p 6379:6379 redis:7-alpine

    /// Random product id so concurrent test runs never collide.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn random_product_id() -> ProductId {
        ProductId::new(uuid::Uuid::new_v4().as_u128() as i64)
    }

    async fn cleanup(ledger: &RedisStockLedger, product_id: ProductId) {
        let mut conn = ledger.conn_manager.clone();
        let _: () = conn
            .del(RedisStockLedger::product_key(product_id))
            .await
            .unwrap();
    }

    #[test]
    fn product_key_format() {
        assert_eq!(
            RedisStockLedger::product_key(ProductId::new(42)),
            "product:42"
        );
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn reserve_decrements_until_insufficient() {
        let ledger = RedisStockLedger::new("redis://127.0.0.1:6379")
            .await
            .unwrap();
        let product = random_product_id();

        ledger
            .set(product, StockLevel::new(5).unwrap())
            .await
            .unwrap();

        let after_two = ledger
            .reserve(product, Quantity::new(2).unwrap())
            .await
            .unwrap();
        assert_eq!(after_two, StockLevel::new(3));

        let after_three = ledger
            .reserve(product, Quantity::new(3).unwrap())
            .await
            .unwrap();
        assert_eq!(after_three, StockLevel::new(0));

        let refused = ledger
            .reserve(product, Quantity::new(1).unwrap())
            .await
            .unwrap();
        assert_eq!(refused, None);

        assert_eq!(ledger.get(product).await.unwrap(), StockLevel::new(0));

        cleanup(&ledger, product).await;
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn reserve_on_untracked_product_is_refused() {
        let ledger = RedisStockLedger::new("redis://127.0.0.1:6379")
            .await
            .unwrap();
        let product = random_product_id();

        let refused = ledger
            .reserve(product, Quantity::new(1).unwrap())
            .await
            .unwrap();
        assert_eq!(refused, None);

        // The refusal must not have created the hash
        assert_eq!(ledger.get(product).await.unwrap(), None);
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn restore_undoes_a_reservation() {
        let ledger = RedisStockLedger::new("redis://127.0.0.1:6379")
            .await
            .unwrap();
        let product = random_product_id();

        ledger
            .set(product, StockLevel::new(10).unwrap())
            .await
            .unwrap();

        let reserved = ledger
            .reserve(product, Quantity::new(3).unwrap())
            .await
            .unwrap();
        assert_eq!(reserved, StockLevel::new(7));

        let restored = ledger
            .restore(product, Quantity::new(3).unwrap())
            .await
            .unwrap();
        assert_eq!(Some(restored), StockLevel::new(10));

        cleanup(&ledger, product).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore] // Requires Redis running
    async fn concurrent_reservations_never_oversell() {
        let ledger = RedisStockLedger::new("redis://127.0.0.1:6379")
            .await
            .unwrap();
        let product = random_product_id();

        ledger
            .set(product, StockLevel::new(5).unwrap())
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.reserve(product, Quantity::new(1).unwrap()).await
            }));
        }

        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().is_some() {
                accepted += 1;
            }
        }

        assert_eq!(accepted, 5, "exactly the initial stock must be reserved");
        assert_eq!(ledger.get(product).await.unwrap(), StockLevel::new(0));

        cleanup(&ledger, product).await;
    }
}
