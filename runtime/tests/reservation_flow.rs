//! End-to-end reservation scenarios over the in-memory stack.
//!
//! These tests exercise the full pipeline: concurrent purchases racing for
//! scarce stock, commit hand-off, compensation when the queue fails, and the
//! durable mirror converging through the sync consumer.
//!
//! Run with: `cargo test --test reservation_flow`

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use holdfast_core::{
    CommitQueue, ProductId, ProductStore, PurchaseCommit, Quantity, StockLedger, StockLevel,
};
use holdfast_runtime::{
    PURCHASE_QUEUE, ProductService, PurchaseError, PurchaseOutcome, ServiceError,
    StockSyncConsumer,
};
use holdfast_testing::{InMemoryCommitQueue, InMemoryProductStore, InMemoryStockLedger};
use std::sync::Arc;
use std::time::Duration;

struct Pipeline {
    ledger: Arc<InMemoryStockLedger>,
    queue: Arc<InMemoryCommitQueue>,
    store: Arc<InMemoryProductStore>,
    service: Arc<ProductService>,
}

fn pipeline() -> Pipeline {
    let ledger = Arc::new(InMemoryStockLedger::new());
    let queue = Arc::new(InMemoryCommitQueue::new());
    let store = Arc::new(InMemoryProductStore::new());
    let service = Arc::new(ProductService::new(
        Arc::clone(&ledger) as Arc<dyn StockLedger>,
        Arc::clone(&queue) as Arc<dyn CommitQueue>,
        Arc::clone(&store) as Arc<dyn ProductStore>,
    ));
    Pipeline {
        ledger,
        queue,
        store,
        service,
    }
}

fn spawn_consumer(p: &Pipeline) {
    let consumer = StockSyncConsumer::new(
        Arc::clone(&p.queue) as Arc<dyn CommitQueue>,
        Arc::clone(&p.store) as Arc<dyn ProductStore>,
    )
        .resubscribe_delay(Duration::from_millis(10));
    tokio::spawn(consumer.run());
}

async fn wait_for_durable_stock(store: &InMemoryProductStore, product: ProductId, expected: i64) {
    for _ in 0..200 {
        if store.stock(product) == Some(expected) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("durable store never converged to {expected} for product {product}");
}

async fn run_buyers(
    service: &Arc<ProductService>,
    product: ProductId,
    buyers: usize,
) -> (usize, usize, Vec<i64>) {
    let mut handles = Vec::with_capacity(buyers);
    for _ in 0..buyers {
        let service = Arc::clone(service);
        handles.push(tokio::spawn(async move {
            service.purchase(product, Quantity::new(1).unwrap()).await
        }));
    }

    let mut accepted = 0;
    let mut rejected = 0;
    let mut observed_stocks = Vec::new();
    for result in futures::future::join_all(handles).await {
        match result.expect("buyer task panicked").unwrap() {
            PurchaseOutcome::Accepted { new_stock } => {
                accepted += 1;
                observed_stocks.push(new_stock.get());
            }
            PurchaseOutcome::Rejected => rejected += 1,
        }
    }
    observed_stocks.sort_unstable();
    (accepted, rejected, observed_stocks)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn oversubscribed_sale_accepts_exactly_the_stock() {
    let p = pipeline();
    let product = ProductId::new(1);
    p.service
        .initialize(product, StockLevel::new(5).unwrap())
        .await
        .unwrap();

    let (accepted, rejected, observed) = run_buyers(&p.service, product, 1000).await;
    println!("flash sale: {accepted} accepted, {rejected} rejected");

    assert_eq!(accepted, 5);
    assert_eq!(rejected, 995);
    assert_eq!(p.ledger.level(product), Some(0));
    // Each accepted purchase saw a distinct post-reservation value, which is
    // only possible if every decrement was atomic
    assert_eq!(observed, vec![0, 1, 2, 3, 4]);
    assert_eq!(p.queue.published().len(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn partially_covered_demand_accepts_up_to_stock() {
    let p = pipeline();
    let product = ProductId::new(2);
    p.service
        .initialize(product, StockLevel::new(200).unwrap())
        .await
        .unwrap();

    let (accepted, rejected, _) = run_buyers(&p.service, product, 500).await;

    assert_eq!(accepted, 200);
    assert_eq!(rejected, 300);
    assert_eq!(p.ledger.level(product), Some(0));
    assert_eq!(p.queue.published().len(), 200);
}

#[tokio::test]
async fn accepted_purchases_reach_the_durable_mirror_in_order() {
    let p = pipeline();
    spawn_consumer(&p);
    let product = ProductId::new(3);
    p.service
        .initialize(product, StockLevel::new(10).unwrap())
        .await
        .unwrap();

    for _ in 0..4 {
        let outcome = p
            .service
            .purchase(product, Quantity::new(1).unwrap())
            .await
            .unwrap();
        assert!(outcome.is_accepted());
    }

    wait_for_durable_stock(&p.store, product, 6).await;
    assert_eq!(p.service.stock(product).await.unwrap(), StockLevel::new(6));
    assert_eq!(
        p.service.durable_stock(product).await.unwrap(),
        StockLevel::new(6)
    );
    assert_eq!(p.queue.pending(PURCHASE_QUEUE), 0);
}

#[tokio::test]
async fn queue_outage_costs_availability_not_stock() {
    let p = pipeline();
    let product = ProductId::new(4);
    p.service
        .initialize(product, StockLevel::new(10).unwrap())
        .await
        .unwrap();

    p.queue.fail_publishes(true);
    let result = p.service.purchase(product, Quantity::new(3).unwrap()).await;
    assert!(matches!(
        result,
        Err(ServiceError::Purchase(PurchaseError::PublishFailed(_)))
    ));
    // Compensation put the three units back; nothing was queued
    assert_eq!(p.ledger.level(product), Some(10));
    assert!(p.queue.published().is_empty());
    assert_eq!(p.store.stock(product), Some(10));

    // Once the queue recovers the same purchase goes through
    p.queue.fail_publishes(false);
    let outcome = p
        .service
        .purchase(product, Quantity::new(3).unwrap())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        PurchaseOutcome::Accepted {
            new_stock: StockLevel::new(7).unwrap()
        }
    );
}

#[tokio::test]
async fn redelivered_commits_apply_idempotently() {
    let p = pipeline();
    let product = ProductId::new(5);
    p.service
        .initialize(product, StockLevel::new(10).unwrap())
        .await
        .unwrap();

    // A broker redelivery is the same commit arriving twice
    let commit = PurchaseCommit::new(
        product,
        Quantity::new(3).unwrap(),
        StockLevel::new(7).unwrap(),
    );
    p.queue.publish(PURCHASE_QUEUE, &commit).await.unwrap();
    p.queue.publish(PURCHASE_QUEUE, &commit).await.unwrap();

    spawn_consumer(&p);
    wait_for_durable_stock(&p.store, product, 7).await;

    // Both deliveries drained; the absolute write made the second a no-op
    for _ in 0..200 {
        if p.queue.pending(PURCHASE_QUEUE) == 0 && p.queue.inflight(PURCHASE_QUEUE) == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(p.store.stock(product), Some(7));
    assert_eq!(p.queue.pending(PURCHASE_QUEUE), 0);
}

#[tokio::test]
async fn mirror_converges_to_the_last_accepted_value() {
    let p = pipeline();
    let product = ProductId::new(6);
    p.service
        .initialize(product, StockLevel::new(100).unwrap())
        .await
        .unwrap();

    // Queue up a burst before the consumer ever runs
    let mut last = 100;
    for _ in 0..20 {
        let outcome = p
            .service
            .purchase(product, Quantity::new(2).unwrap())
            .await
            .unwrap();
        if let PurchaseOutcome::Accepted { new_stock } = outcome {
            last = new_stock.get();
        }
    }
    assert_eq!(last, 60);

    spawn_consumer(&p);
    wait_for_durable_stock(&p.store, product, 60).await;
}

#[tokio::test]
async fn purchase_for_unknown_product_is_rejected() {
    let p = pipeline();
    let outcome = p
        .service
        .purchase(ProductId::new(404), Quantity::new(1).unwrap())
        .await
        .unwrap();
    assert_eq!(outcome, PurchaseOutcome::Rejected);
    assert!(p.queue.published().is_empty());
}
