//! The broker seam: FIFO queues, pub/sub, and TTL'd snapshots.
//!
//! Queues give at-least-once delivery (readers must be idempotent; the
//! store's upsert provides that). Pub/sub is at-most-once with no
//! persistence. The key and topic layout is fixed here so every service
//! agrees on it.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::CandelaError;
use crate::types::Symbol;

/// FIFO queue of candle envelopes awaiting persistence.
pub const CANDLE_QUEUE: &str = "candle_queue";
/// FIFO queue of envelopes whose batch failed to persist.
pub const DEAD_LETTER_QUEUE: &str = "dead_letter_queue";
/// Aggregate collector-service snapshot key (TTL 120 s).
pub const SERVICE_STATUS_KEY: &str = "collector_service_status";
/// Persister queue-depth snapshot key (TTL 60 s).
pub const PROCESSOR_METRICS_KEY: &str = "processor_metrics";
/// Pattern matching every per-symbol command topic.
pub const COLLECTOR_PATTERN: &str = "collector:*";
/// Advisory lock held while a windowed reconciliation runs.
pub const WINDOWED_LOCK_KEY: &str = "reconciler:windowed:lock";

/// Command topic for one symbol's collector.
#[must_use]
pub fn collector_topic(symbol: &Symbol) -> String {
    format!("collector:{symbol}")
}

/// Per-symbol collector status key (TTL 300 s).
#[must_use]
pub fn status_key(symbol: &Symbol) -> String {
    format!("status:{symbol}")
}

/// Per-symbol subscription record key (TTL 3600 s).
#[must_use]
pub fn subscription_key(symbol: &Symbol) -> String {
    format!("subscription:{symbol}")
}

/// Recover the symbol from a `collector:<symbol>` topic or a
/// `subscription:<symbol>` key.
#[must_use]
pub fn symbol_suffix(key: &str) -> Option<Symbol> {
    key.split_once(':')
        .map(|(_, sym)| Symbol::from(sym))
        .filter(|sym| !sym.as_str().is_empty())
}

/// A message delivered by a pattern subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMessage {
    /// Concrete topic the publisher used.
    pub topic: String,
    /// Raw payload.
    pub payload: String,
}

/// Broker operations the pipeline relies on.
///
/// Implementations must preserve FIFO order within each queue. All payloads
/// are opaque strings; serialization happens at the call sites.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Append to the queue's tail.
    async fn push(&self, queue: &str, payload: &str) -> Result<(), CandelaError>;

    /// Remove from the queue's head, blocking up to `timeout`. `None` on
    /// timeout.
    async fn pop_blocking(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<String>, CandelaError>;

    /// Remove from the queue's head without blocking. `None` when empty.
    async fn pop_nonblocking(&self, queue: &str) -> Result<Option<String>, CandelaError>;

    /// Current queue depth.
    async fn queue_len(&self, queue: &str) -> Result<u64, CandelaError>;

    /// Fan a message out to the topic's current subscribers. No delivery if
    /// nobody listens.
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), CandelaError>;

    /// Receive every message whose topic matches the glob `pattern`.
    /// Per-publisher order is preserved. The subscription ends when the
    /// receiver is dropped.
    async fn pattern_subscribe(
        &self,
        pattern: &str,
    ) -> Result<mpsc::Receiver<TopicMessage>, CandelaError>;

    /// Write a snapshot value that expires after `ttl`.
    async fn set_kv(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CandelaError>;

    /// Read a live snapshot value.
    async fn get_kv(&self, key: &str) -> Result<Option<String>, CandelaError>;

    /// Delete a key; `true` if it existed.
    async fn delete_kv(&self, key: &str) -> Result<bool, CandelaError>;

    /// Enumerate live keys matching the glob `pattern`.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CandelaError>;

    /// Take an advisory lock unless someone already holds it; released by
    /// TTL expiry. `true` when acquired.
    async fn try_lock(&self, key: &str, ttl: Duration) -> Result<bool, CandelaError>;

    /// Liveness probe.
    async fn ping(&self) -> Result<(), CandelaError>;
}
