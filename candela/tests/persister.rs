use std::sync::Arc;

use candela::config::BatchConfig;
use candela::persister::{Persister, PersisterParams};
use candela_core::broker::{Broker, CANDLE_QUEUE, DEAD_LETTER_QUEUE, PROCESSOR_METRICS_KEY};
use candela_core::store::CandleWriter;
use candela_core::types::{
    CandleSource, DeadLetter, HealthState, QueueEnvelope, QueueMetrics, Symbol, Timeframe,
};
use candela_mock::{MemoryBroker, MemoryStore, fixtures};
use chrono::Utc;
use tokio::sync::watch;

const H: i64 = 3_600_000;
const BASE: i64 = 1_699_999_200_000;

fn sym() -> Symbol {
    Symbol::from("BTC-USDT-SWAP")
}

fn batch_config() -> BatchConfig {
    BatchConfig {
        size: 3,
        timeout_s: 1,
        max_retries: 3,
        queue_warn_threshold: 5,
    }
}

struct Rig {
    broker: Arc<MemoryBroker>,
    store: Arc<MemoryStore>,
    persister: Persister,
}

fn rig(batch: BatchConfig) -> Rig {
    let broker = Arc::new(MemoryBroker::new());
    let store = Arc::new(MemoryStore::new());
    let persister = Persister::new(PersisterParams {
        broker: Arc::clone(&broker) as Arc<dyn Broker>,
        writer: Arc::clone(&store) as Arc<dyn CandleWriter>,
        batch,
    });
    Rig {
        broker,
        store,
        persister,
    }
}

async fn enqueue(broker: &MemoryBroker, count: usize) {
    for k in 0..count {
        let candle = fixtures::candle_at(&sym(), Timeframe::H1, BASE + k as i64 * H, k);
        let envelope = QueueEnvelope::new(candle, CandleSource::Stream, Utc::now());
        broker
            .push(CANDLE_QUEUE, &serde_json::to_string(&envelope).unwrap())
            .await
            .unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn batches_are_bounded_by_size() {
    let rig = rig(batch_config());
    enqueue(&rig.broker, 5).await;

    assert_eq!(rig.persister.drain_once().await.unwrap(), 3);
    assert_eq!(rig.store.rows().len(), 3);
    assert_eq!(rig.persister.drain_once().await.unwrap(), 2);
    assert_eq!(rig.store.rows().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn empty_queue_times_out_as_a_noop() {
    let rig = rig(batch_config());
    assert_eq!(rig.persister.drain_once().await.unwrap(), 0);
    assert!(rig.store.rows().is_empty());
}

#[tokio::test(start_paused = true)]
async fn malformed_records_are_skipped_not_fatal() {
    let rig = rig(batch_config());
    rig.broker.push(CANDLE_QUEUE, "not json").await.unwrap();
    enqueue(&rig.broker, 1).await;

    assert_eq!(rig.persister.drain_once().await.unwrap(), 2);
    assert_eq!(rig.store.rows().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_batch_detours_through_the_dlq_and_lands_on_retry() {
    let rig = rig(batch_config());
    let (_stop_tx, mut shutdown) = watch::channel(false);

    rig.store.fail_next_upserts(1);
    enqueue(&rig.broker, 1).await;

    // first attempt fails; the whole batch goes to the DLQ
    rig.persister.drain_once().await.unwrap();
    assert!(rig.store.rows().is_empty());
    assert_eq!(rig.broker.queue_len(DEAD_LETTER_QUEUE).await.unwrap(), 1);

    // the DLQ loop waits out the linear backoff and re-injects
    assert!(rig.persister.dlq_once(&mut shutdown).await.unwrap());
    assert_eq!(rig.broker.queue_len(DEAD_LETTER_QUEUE).await.unwrap(), 0);
    assert_eq!(rig.broker.queue_len(CANDLE_QUEUE).await.unwrap(), 1);

    // the re-injected envelope carries retry_count = 1
    let payload = rig
        .broker
        .pop_nonblocking(CANDLE_QUEUE)
        .await
        .unwrap()
        .unwrap();
    let envelope: QueueEnvelope = serde_json::from_str(&payload).unwrap();
    assert_eq!(envelope.retry_count, 1);
    rig.broker.push(CANDLE_QUEUE, &payload).await.unwrap();

    // second attempt succeeds; exactly one row, no duplicates
    rig.persister.drain_once().await.unwrap();
    assert_eq!(rig.store.rows().len(), 1);
    assert_eq!(rig.broker.queue_len(CANDLE_QUEUE).await.unwrap(), 0);
    assert_eq!(rig.broker.queue_len(DEAD_LETTER_QUEUE).await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn dead_letters_are_abandoned_after_max_retries() {
    let rig = rig(batch_config());
    let (_stop_tx, mut shutdown) = watch::channel(false);

    let candle = fixtures::candle_at(&sym(), Timeframe::H1, BASE, 0);
    let mut envelope = QueueEnvelope::new(candle, CandleSource::Stream, Utc::now());
    envelope.retry_count = 2;
    let letter = DeadLetter::record(envelope, "relation missing", Utc::now());
    assert_eq!(letter.envelope.retry_count, 3);
    rig.broker
        .push(DEAD_LETTER_QUEUE, &serde_json::to_string(&letter).unwrap())
        .await
        .unwrap();

    assert!(rig.persister.dlq_once(&mut shutdown).await.unwrap());
    assert_eq!(rig.broker.queue_len(DEAD_LETTER_QUEUE).await.unwrap(), 0);
    assert_eq!(rig.broker.queue_len(CANDLE_QUEUE).await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn metrics_degrade_above_the_warning_threshold() {
    let rig = rig(batch_config());
    enqueue(&rig.broker, 6).await; // threshold is 5

    rig.persister.publish_metrics().await.unwrap();
    let payload = rig
        .broker
        .get_kv(PROCESSOR_METRICS_KEY)
        .await
        .unwrap()
        .unwrap();
    let metrics: QueueMetrics = serde_json::from_str(&payload).unwrap();
    assert_eq!(metrics.queue_length, 6);
    assert_eq!(metrics.dlq_length, 0);
    assert_eq!(metrics.status, HealthState::Degraded);

    // drain below the threshold and the snapshot recovers
    rig.persister.drain_once().await.unwrap();
    rig.persister.drain_once().await.unwrap();
    rig.persister.publish_metrics().await.unwrap();
    let payload = rig
        .broker
        .get_kv(PROCESSOR_METRICS_KEY)
        .await
        .unwrap()
        .unwrap();
    let metrics: QueueMetrics = serde_json::from_str(&payload).unwrap();
    assert_eq!(metrics.queue_length, 0);
    assert_eq!(metrics.status, HealthState::Healthy);
}
