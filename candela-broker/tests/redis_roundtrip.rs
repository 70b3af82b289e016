//! Round-trip tests against a live Redis. Run with a local instance:
//!
//! ```sh
//! REDIS_URL=redis://localhost:6379/15 cargo test -p candela-broker -- --ignored
//! ```

use std::time::Duration;

use candela_broker::{BrokerConfig, RedisBroker};
use candela_core::broker::Broker;

fn config_from_env() -> Option<BrokerConfig> {
    let url = std::env::var("REDIS_URL").ok()?;
    let url = url.strip_prefix("redis://")?;
    let (host_port, db) = url.rsplit_once('/')?;
    let (host, port) = host_port.rsplit_once(':')?;
    Some(BrokerConfig {
        host: host.to_owned(),
        port: port.parse().ok()?,
        password: None,
        db: db.parse().ok()?,
    })
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "needs a live Redis via REDIS_URL"]
async fn queue_preserves_fifo_order() {
    let broker = RedisBroker::connect(&config_from_env().expect("REDIS_URL"))
        .await
        .unwrap();
    let queue = "candela:test:fifo";
    while broker.pop_nonblocking(queue).await.unwrap().is_some() {}

    for i in 0..5 {
        broker.push(queue, &format!("msg-{i}")).await.unwrap();
    }
    for i in 0..5 {
        let popped = broker.pop_nonblocking(queue).await.unwrap();
        assert_eq!(popped.as_deref(), Some(format!("msg-{i}").as_str()));
    }
    assert_eq!(broker.pop_nonblocking(queue).await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "needs a live Redis via REDIS_URL"]
async fn blocking_pop_times_out_empty() {
    let broker = RedisBroker::connect(&config_from_env().expect("REDIS_URL"))
        .await
        .unwrap();
    let popped = broker
        .pop_blocking("candela:test:empty", Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(popped, None);
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "needs a live Redis via REDIS_URL"]
async fn pattern_subscription_sees_published_topics() {
    let broker = RedisBroker::connect(&config_from_env().expect("REDIS_URL"))
        .await
        .unwrap();
    let mut rx = broker.pattern_subscribe("candela:test:topic:*").await.unwrap();
    // psubscribe settles asynchronously
    tokio::time::sleep(Duration::from_millis(100)).await;

    broker
        .publish("candela:test:topic:alpha", "payload")
        .await
        .unwrap();
    let msg = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out")
        .expect("channel closed");
    assert_eq!(msg.topic, "candela:test:topic:alpha");
    assert_eq!(msg.payload, "payload");
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "needs a live Redis via REDIS_URL"]
async fn lock_is_exclusive_until_ttl() {
    let broker = RedisBroker::connect(&config_from_env().expect("REDIS_URL"))
        .await
        .unwrap();
    let key = "candela:test:lock";
    broker.delete_kv(key).await.unwrap();

    assert!(broker.try_lock(key, Duration::from_secs(2)).await.unwrap());
    assert!(!broker.try_lock(key, Duration::from_secs(2)).await.unwrap());
}
