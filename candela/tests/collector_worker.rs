use std::sync::Arc;
use std::time::Duration;

use candela::collector::{WorkerParams, spawn};
use candela::config::{BackoffConfig, CollectorConfig};
use candela_core::broker::{self, Broker, CANDLE_QUEUE};
use candela_core::connector::StreamEvent;
use candela_core::types::{CandleSource, CollectorStatus, QueueEnvelope, Symbol, Timeframe};
use candela_mock::{MemoryBroker, MockConnector, SessionScript, fixtures};
use rust_decimal::Decimal;

const H: i64 = 3_600_000;
const BASE: i64 = 1_699_999_200_000; // a 1h boundary

fn sym() -> Symbol {
    Symbol::from("BTC-USDT-SWAP")
}

fn params(
    venue: MockConnector,
    broker: Arc<MemoryBroker>,
) -> WorkerParams {
    WorkerParams {
        symbol: sym(),
        timeframes: vec![Timeframe::H1],
        venue: Arc::new(venue),
        broker,
        backoff: BackoffConfig {
            initial_reconnect_delay_s: 5,
            max_reconnect_delay_s: 300,
            max_reconnect_attempts: 0,
        },
        collector: CollectorConfig::default(),
    }
}

async fn wait_for_status<F>(broker: &MemoryBroker, predicate: F) -> CollectorStatus
where
    F: Fn(&CollectorStatus) -> bool,
{
    for _ in 0..200 {
        if let Ok(Some(payload)) = broker.get_kv(&broker::status_key(&sym())).await
            && let Ok(status) = serde_json::from_str::<CollectorStatus>(&payload)
            && predicate(&status)
        {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("status predicate never satisfied");
}

#[tokio::test(start_paused = true)]
async fn unconfirmed_candles_never_reach_the_queue() {
    let broker = Arc::new(MemoryBroker::new());
    let candle = fixtures::candle_at(&sym(), Timeframe::H1, BASE, 0);
    let venue = MockConnector::new().with_session(SessionScript::DeliverAndHold(vec![
        StreamEvent::Subscribed {
            channel: "candle1H".into(),
        },
        StreamEvent::Candle {
            candle: candle.clone(),
            confirmed: false,
        },
        StreamEvent::Candle {
            candle: candle.clone(),
            confirmed: true,
        },
    ]));

    let handle = spawn(params(venue, Arc::clone(&broker)));
    wait_for_status(&broker, |s| s.message_count == 1).await;

    assert_eq!(broker.queue_len(CANDLE_QUEUE).await.unwrap(), 1);
    let payload = broker.pop_nonblocking(CANDLE_QUEUE).await.unwrap().unwrap();
    let envelope: QueueEnvelope = serde_json::from_str(&payload).unwrap();
    assert_eq!(envelope.candle, candle);
    assert_eq!(envelope.source, CandleSource::Stream);
    assert_eq!(envelope.retry_count, 0);

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn invalid_candles_are_counted_and_skipped() {
    let broker = Arc::new(MemoryBroker::new());
    let mut bad = fixtures::candle_at(&sym(), Timeframe::H1, BASE, 0);
    bad.volume = Decimal::ZERO;
    let good = fixtures::candle_at(&sym(), Timeframe::H1, BASE + H, 1);
    let venue = MockConnector::new().with_session(SessionScript::DeliverAndHold(vec![
        StreamEvent::Candle {
            candle: bad,
            confirmed: true,
        },
        StreamEvent::Candle {
            candle: good,
            confirmed: true,
        },
    ]));

    let handle = spawn(params(venue, Arc::clone(&broker)));
    let status = wait_for_status(&broker, |s| s.message_count == 1).await;

    assert_eq!(status.error_count, 1);
    assert_eq!(broker.queue_len(CANDLE_QUEUE).await.unwrap(), 1);
    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn reconnects_until_a_session_sticks_and_resets_backoff() {
    let broker = Arc::new(MemoryBroker::new());
    let venue = MockConnector::new()
        .with_session(SessionScript::FailConnect)
        .with_session(SessionScript::FailConnect)
        .with_session(SessionScript::DeliverAndHold(vec![
            StreamEvent::Subscribed {
                channel: "candle1H".into(),
            },
        ]));

    let handle = spawn(params(venue, Arc::clone(&broker)));
    let status = wait_for_status(&broker, |s| s.state == "streaming").await;

    assert_eq!(status.reconnect_count, 2);
    assert!(status.connected);
    assert_eq!(status.channels, vec!["candle1H".to_owned()]);
    handle.stop().await;

    let stopped = wait_for_status(&broker, |s| s.state == "stopped").await;
    assert!(!stopped.connected);
}

#[tokio::test(start_paused = true)]
async fn venue_errors_do_not_tear_down_the_session() {
    let broker = Arc::new(MemoryBroker::new());
    let candle = fixtures::candle_at(&sym(), Timeframe::H1, BASE, 0);
    let venue = MockConnector::new().with_session(SessionScript::DeliverAndHold(vec![
        StreamEvent::VenueError {
            code: Some("60012".into()),
            msg: "Invalid request".into(),
        },
        StreamEvent::Candle {
            candle,
            confirmed: true,
        },
    ]));

    let handle = spawn(params(venue, Arc::clone(&broker)));
    let status = wait_for_status(&broker, |s| s.message_count == 1).await;

    assert_eq!(status.error_count, 1);
    assert_eq!(status.state, "streaming");
    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn reconnect_limit_stops_the_worker() {
    let broker = Arc::new(MemoryBroker::new());
    let venue = MockConnector::new(); // every connect fails
    let mut p = params(venue, Arc::clone(&broker));
    p.backoff.max_reconnect_attempts = 2;

    let _handle = spawn(p);
    let status = wait_for_status(&broker, |s| s.state == "stopped").await;
    assert_eq!(status.reconnect_count, 2);
}
