//! Materializer scenarios: crash recovery, redelivery, lock contention and
//! poison entries, all over in-memory collaborators.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::collections::HashMap;
use std::time::Duration;

use seckill_core::environment::Clock;
use seckill_core::lock::order_lock_name;
use seckill_core::queue::{DEFAULT_GROUP, Delivery, OrderQueue};
use seckill_core::{OrderId, OrderIntent, SeckillError, UserId, VoucherId};
use seckill_runtime::{MaterializerPool, ProcessOutcome, PurchaseDecision, WorkerState};
use seckill_testing::InMemoryPipeline;
use tokio::sync::broadcast;

const VOUCHER: VoucherId = VoucherId(20);

async fn buy(pipeline: &InMemoryPipeline, user: i64) -> OrderId {
    match pipeline
        .service
        .attempt_purchase(VOUCHER, UserId(user))
        .await
        .unwrap()
    {
        PurchaseDecision::Accepted(order_id) => order_id,
        PurchaseDecision::Rejected(rejection) => panic!("purchase rejected: {rejection:?}"),
    }
}

/// Read one live entry as the default worker.
async fn read_one(pipeline: &InMemoryPipeline) -> Delivery {
    match pipeline.materializer.step(WorkerState::LiveRead).await {
        WorkerState::Process(delivery) => delivery,
        other => panic!("expected a delivery, got {other:?}"),
    }
}

#[tokio::test]
async fn drain_turns_intents_into_records() {
    let pipeline = InMemoryPipeline::new();
    pipeline.publish(VOUCHER, 10).await;

    let mut expected = Vec::new();
    for user in 1..=5 {
        expected.push(buy(&pipeline, user).await);
    }

    let acknowledged = pipeline.drain().await;

    assert_eq!(acknowledged, 5);
    let ids: Vec<OrderId> = pipeline.orders.orders().iter().map(|o| o.order_id).collect();
    assert_eq!(ids, expected);
    assert_eq!(pipeline.queue.pending_count(DEFAULT_GROUP), 0);
}

#[tokio::test]
async fn record_copies_the_intent() {
    let pipeline = InMemoryPipeline::new();
    pipeline.publish(VOUCHER, 1).await;
    let order_id = buy(&pipeline, 7).await;

    pipeline.drain().await;

    let record = pipeline.orders.orders().pop().unwrap();
    assert_eq!(record.order_id, order_id);
    assert_eq!(record.user_id, UserId(7));
    assert_eq!(record.voucher_id, VOUCHER);
    assert_eq!(record.created_at, pipeline.clock.now());
}

#[tokio::test]
async fn nothing_is_acknowledged_before_it_is_durable() {
    let pipeline = InMemoryPipeline::new();
    pipeline.publish(VOUCHER, 1).await;
    buy(&pipeline, 7).await;

    let delivery = read_one(&pipeline).await;
    assert_eq!(pipeline.queue.pending_count(DEFAULT_GROUP), 1);

    let next = pipeline.materializer.step(WorkerState::Process(delivery)).await;
    assert!(matches!(next, WorkerState::Ack(_)));
    assert_eq!(pipeline.orders.len(), 1);
    assert_eq!(pipeline.queue.pending_count(DEFAULT_GROUP), 1);

    let next = pipeline.materializer.step(next).await;
    assert_eq!(next, WorkerState::LiveRead);
    assert_eq!(pipeline.queue.pending_count(DEFAULT_GROUP), 0);
}

#[tokio::test]
async fn crash_before_ack_is_recovered_without_duplication() {
    let pipeline = InMemoryPipeline::new();
    pipeline.publish(VOUCHER, 1).await;
    buy(&pipeline, 7).await;

    // Persist, then die before acknowledging
    let delivery = read_one(&pipeline).await;
    let outcome = pipeline.materializer.process(&delivery).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Created);

    // A restarted worker with the same identity replays the entry
    let restarted = pipeline.worker("c1");
    let replayed = tokio_test::assert_ok!(restarted.recover().await);

    assert_eq!(replayed, 1);
    assert_eq!(pipeline.orders.len(), 1);
    assert_eq!(pipeline.queue.pending_count(DEFAULT_GROUP), 0);
}

#[tokio::test]
async fn persistence_failure_is_retried_through_recovery() {
    seckill_testing::init_test_tracing();
    let pipeline = InMemoryPipeline::new();
    pipeline.publish(VOUCHER, 1).await;
    buy(&pipeline, 7).await;

    pipeline.orders.fail_next_persists(1);
    let delivery = read_one(&pipeline).await;
    let next = pipeline.materializer.step(WorkerState::Process(delivery)).await;

    assert_eq!(next, WorkerState::Recovery { attempt: 0 });
    assert!(pipeline.orders.is_empty());
    assert!(!pipeline.lock.is_held(&order_lock_name(UserId(7))));
    assert_eq!(pipeline.queue.pending_count(DEFAULT_GROUP), 1);

    let next = pipeline.materializer.step(next).await;

    assert_eq!(next, WorkerState::LiveRead);
    assert_eq!(pipeline.orders.len(), 1);
    assert_eq!(pipeline.queue.pending_count(DEFAULT_GROUP), 0);
}

#[tokio::test]
async fn failed_recovery_pass_counts_attempts() {
    let pipeline = InMemoryPipeline::new();

    pipeline.queue.fail_next_reads(1);
    let next = pipeline
        .materializer
        .step(WorkerState::Recovery { attempt: 0 })
        .await;
    assert_eq!(next, WorkerState::Recovery { attempt: 1 });

    let next = pipeline.materializer.step(next).await;
    assert_eq!(next, WorkerState::LiveRead);
}

#[tokio::test]
async fn read_failure_enters_recovery() {
    let pipeline = InMemoryPipeline::new();

    pipeline.queue.fail_next_reads(1);
    let next = pipeline.materializer.step(WorkerState::LiveRead).await;

    assert_eq!(next, WorkerState::Recovery { attempt: 0 });
}

#[tokio::test]
async fn ack_failure_does_not_duplicate_the_order() {
    let pipeline = InMemoryPipeline::new();
    pipeline.publish(VOUCHER, 1).await;
    buy(&pipeline, 7).await;

    pipeline.queue.fail_next_acks(1);
    pipeline.drain().await;

    assert_eq!(pipeline.orders.len(), 1);
    assert_eq!(pipeline.orders.persist_attempts(), 1);
    assert_eq!(pipeline.queue.pending_count(DEFAULT_GROUP), 0);
}

#[tokio::test]
async fn lock_held_elsewhere_leaves_the_entry_pending() {
    let pipeline = InMemoryPipeline::new();
    pipeline.publish(VOUCHER, 1).await;
    buy(&pipeline, 7).await;

    let lock_name = order_lock_name(UserId(7));
    pipeline.lock.hold(&lock_name, Duration::from_secs(60));

    let delivery = read_one(&pipeline).await;
    let err = pipeline.materializer.process(&delivery).await.unwrap_err();

    assert_eq!(err, SeckillError::LockBusy(lock_name.clone()));
    assert!(pipeline.orders.is_empty());
    assert_eq!(pipeline.queue.pending_count(DEFAULT_GROUP), 1);

    pipeline.lock.force_release(&lock_name);
    let replayed = pipeline.materializer.recover().await.unwrap();

    assert_eq!(replayed, 1);
    assert_eq!(pipeline.orders.len(), 1);
}

#[tokio::test]
async fn lock_service_failure_is_an_error() {
    let pipeline = InMemoryPipeline::new();
    pipeline.publish(VOUCHER, 1).await;
    buy(&pipeline, 7).await;

    pipeline.lock.fail_next_acquires(1);
    let delivery = read_one(&pipeline).await;
    let err = pipeline.materializer.process(&delivery).await.unwrap_err();

    assert!(matches!(err, SeckillError::Lock(_)));
    assert!(pipeline.orders.is_empty());
}

#[tokio::test]
async fn lock_is_released_after_each_entry() {
    let pipeline = InMemoryPipeline::new();
    pipeline.publish(VOUCHER, 2).await;
    buy(&pipeline, 7).await;
    buy(&pipeline, 8).await;

    pipeline.drain().await;

    assert_eq!(pipeline.lock.acquisitions(), 2);
    assert!(!pipeline.lock.is_held(&order_lock_name(UserId(7))));
    assert!(!pipeline.lock.is_held(&order_lock_name(UserId(8))));
}

#[tokio::test]
async fn second_intent_for_same_buyer_is_skipped() {
    let pipeline = InMemoryPipeline::new();
    pipeline.publish(VOUCHER, 2).await;
    let first = buy(&pipeline, 7).await;

    // A stray second intent for the same (user, voucher)
    let stray = OrderIntent::new(
        OrderId(first.value() + 1),
        UserId(7),
        VOUCHER,
        pipeline.clock.now(),
    );
    pipeline.queue.append(&stray).await.unwrap();

    pipeline.drain().await;

    let orders = pipeline.orders.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].order_id, first);
    assert_eq!(pipeline.queue.pending_count(DEFAULT_GROUP), 0);
}

#[tokio::test]
async fn malformed_entry_is_dead_lettered_and_acknowledged() {
    let pipeline = InMemoryPipeline::new();

    let poison = pipeline
        .queue
        .inject_raw(HashMap::from([("id".to_string(), "not-a-number".to_string())]));

    let delivery = read_one(&pipeline).await;
    let outcome = pipeline.materializer.process(&delivery).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::DeadLettered);

    let next = pipeline.materializer.step(WorkerState::Ack(delivery)).await;
    assert_eq!(next, WorkerState::LiveRead);

    let dead = pipeline.queue.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].0.id, poison);
    assert_eq!(pipeline.queue.pending_count(DEFAULT_GROUP), 0);
    assert!(pipeline.orders.is_empty());
}

#[tokio::test]
async fn poison_entry_does_not_block_the_ones_behind_it() {
    let pipeline = InMemoryPipeline::new();
    pipeline.publish(VOUCHER, 1).await;

    pipeline
        .queue
        .inject_raw(HashMap::from([("voucherId".to_string(), "20".to_string())]));
    buy(&pipeline, 7).await;

    let acknowledged = pipeline.drain().await;

    assert_eq!(acknowledged, 2);
    assert_eq!(pipeline.orders.len(), 1);
    assert_eq!(pipeline.queue.dead_letters().len(), 1);
}

#[tokio::test]
async fn pending_entries_belong_to_their_consumer() {
    let pipeline = InMemoryPipeline::new();
    pipeline.publish(VOUCHER, 1).await;
    buy(&pipeline, 7).await;

    read_one(&pipeline).await;

    let other = pipeline.worker("c2");
    assert_eq!(other.recover().await.unwrap(), 0);
    assert_eq!(pipeline.queue.pending_count(DEFAULT_GROUP), 1);

    assert_eq!(pipeline.materializer.recover().await.unwrap(), 1);
    assert_eq!(pipeline.queue.pending_count(DEFAULT_GROUP), 0);
}

#[tokio::test]
async fn empty_live_read_stays_live() {
    let pipeline = InMemoryPipeline::new();

    let next = pipeline.materializer.step(WorkerState::LiveRead).await;

    assert_eq!(next, WorkerState::LiveRead);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pool_materializes_every_purchase_and_shuts_down() {
    let pipeline = InMemoryPipeline::new();
    pipeline.publish(VOUCHER, 30).await;

    let (shutdown, _) = broadcast::channel(1);
    let pool = MaterializerPool::spawn(&pipeline.materializer, 3, "c", &shutdown);
    assert_eq!(pool.consumers(), vec!["c1", "c2", "c3"]);

    for user in 1..=30 {
        buy(&pipeline, user).await;
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while pipeline.orders.len() < 30 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("pool should materialize every intent");

    shutdown.send(()).unwrap();
    let unclean = pool.join(Duration::from_secs(1)).await;

    assert_eq!(unclean, 0);
    assert_eq!(pipeline.orders.len(), 30);
}

#[tokio::test]
async fn idle_worker_stops_on_shutdown() {
    let pipeline = InMemoryPipeline::new();
    let (shutdown, receiver) = broadcast::channel(1);

    let worker = tokio::spawn(pipeline.materializer.clone().run(receiver));
    tokio::time::sleep(Duration::from_millis(30)).await;
    shutdown.send(()).unwrap();

    tokio::time::timeout(Duration::from_secs(1), worker)
        .await
        .expect("worker should stop promptly")
        .unwrap();
}
