//! Flash Sale Demo - the reservation pipeline under real contention.
//!
//! Launches many concurrent purchase attempts against a product with scarce
//! stock, on the production backends: Redis holds the live ledger, RabbitMQ
//! carries the commit queue, and PostgreSQL keeps the durable mirror.
//!
//! # Running the Demo
//!
//! ```bash
//! docker run -d -p 6379:6379 redis:7-alpine
//! docker run -d -p 5672:5672 rabbitmq:3-alpine
//! docker run -d -p 5432:5432 -e POSTGRES_PASSWORD=postgres \
//!   -e POSTGRES_DB=holdfast postgres:16-alpine
//!
//! cargo run --bin flash-sale
//! ```
//!
//! Tune the sale with `INITIAL_STOCK` and `BUYERS`; point at other backends
//! with `REDIS_URL`, `AMQP_URL`, and `DATABASE_URL`.

#![allow(missing_docs)]
#![allow(clippy::expect_used)] // Demos can use expect

mod config;

use config::Config;
use holdfast_amqp::AmqpCommitQueue;
use holdfast_core::{CommitQueue, ProductId, ProductStore, Quantity, StockLedger, StockLevel};
use holdfast_postgres::PostgresProductStore;
use holdfast_redis::RedisStockLedger;
use holdfast_runtime::{
    PURCHASE_QUEUE, PURCHASE_QUEUE_PREFETCH, ProductService, PurchaseOutcome, StockSyncConsumer,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,holdfast=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    tracing::info!(?config, "Starting flash sale demo");

    // 2. Connect the backends
    let ledger = Arc::new(RedisStockLedger::new(&config.redis_url).await?);
    let queue = Arc::new(AmqpCommitQueue::new(&config.amqp_url).await?);
    let store = Arc::new(PostgresProductStore::connect(&config.database_url).await?);
    store.migrate().await?;
    tracing::info!("✓ Connected to Redis, RabbitMQ, and PostgreSQL");

    // 3. Declare the purchase queue and drop leftovers from earlier runs
    queue
        .declare(PURCHASE_QUEUE, PURCHASE_QUEUE_PREFETCH)
        .await?;
    let purged = queue.purge(PURCHASE_QUEUE).await?;
    if purged > 0 {
        tracing::info!(purged, "Purged stale commits from a previous run");
    }

    // 4. Start the sync consumer and seed the sale
    let consumer = StockSyncConsumer::new(
        Arc::clone(&queue) as Arc<dyn CommitQueue>,
        Arc::clone(&store) as Arc<dyn ProductStore>,
    );
    tokio::spawn(consumer.run());

    let service = Arc::new(ProductService::new(
        Arc::clone(&ledger) as Arc<dyn StockLedger>,
        Arc::clone(&queue) as Arc<dyn CommitQueue>,
        Arc::clone(&store) as Arc<dyn ProductStore>,
    ));

    let product = ProductId::new(config.product_id);
    let stock = StockLevel::new(config.initial_stock)
        .ok_or_else(|| anyhow::anyhow!("INITIAL_STOCK must be non-negative"))?;
    service.initialize(product, stock).await?;
    tracing::info!(
        product_id = %product,
        stock = %stock,
        buyers = config.buyers,
        "✓ Sale is open"
    );

    // 5. Launch the buyers
    let quantity = Quantity::new(1).expect("1 is a valid quantity");
    let started = Instant::now();
    let mut handles = Vec::with_capacity(config.buyers);
    for _ in 0..config.buyers {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            service.purchase(product, quantity).await
        }));
    }

    let mut accepted = 0_usize;
    let mut rejected = 0_usize;
    let mut failed = 0_usize;
    for result in futures::future::join_all(handles).await {
        match result? {
            Ok(PurchaseOutcome::Accepted { .. }) => accepted += 1,
            Ok(PurchaseOutcome::Rejected) => rejected += 1,
            Err(e) => {
                tracing::warn!(error = %e, "Purchase attempt failed");
                failed += 1;
            }
        }
    }
    let elapsed = started.elapsed();
    tracing::info!(accepted, rejected, failed, ?elapsed, "Sale finished");

    anyhow::ensure!(
        i64::try_from(accepted)? <= config.initial_stock,
        "oversold: accepted {accepted} purchases with only {} in stock",
        config.initial_stock
    );

    // 6. Wait for the durable mirror to drain the queue
    let live = service.stock(product).await?;
    let mut durable = service.durable_stock(product).await?;
    for _ in 0..100 {
        if durable == live {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        durable = service.durable_stock(product).await?;
    }

    match (live, durable) {
        (Some(live), Some(durable)) if live == durable => {
            tracing::info!(stock = %live, "✓ Durable mirror converged with the ledger");
        }
        _ => tracing::warn!(?live, ?durable, "Durable mirror still catching up"),
    }

    Ok(())
}
