//! Canonical data types shared by the collector, persister, and reconciler.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::CandelaError;

/// A venue instrument identifier, e.g. `BTC-USDT-SWAP`.
///
/// Stored and compared verbatim; candela does not parse base/quote out of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Wrap a raw instrument id.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Borrow the instrument id as a `&str`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The closed set of candle bucket widths candela collects.
///
/// The canonical (stored) rendering is lowercase (`1h`); the venue renders
/// hours and days uppercase (`1H`, `1D`). [`Timeframe::from_str`] accepts
/// both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    /// One minute.
    #[serde(rename = "1m")]
    M1,
    /// Five minutes.
    #[serde(rename = "5m")]
    M5,
    /// Fifteen minutes.
    #[serde(rename = "15m")]
    M15,
    /// One hour.
    #[serde(rename = "1h")]
    H1,
    /// Four hours.
    #[serde(rename = "4h")]
    H4,
    /// One day.
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    /// Every supported timeframe, shortest first.
    pub const ALL: [Self; 6] = [Self::M1, Self::M5, Self::M15, Self::H1, Self::H4, Self::D1];

    /// The timeframes the windowed reconciler audits by default.
    pub const RECONCILE_DEFAULTS: [Self; 5] = [Self::M5, Self::M15, Self::H1, Self::H4, Self::D1];

    /// Canonical lowercase rendering used for storage and queue envelopes.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
        }
    }

    /// Venue rendering: hours and days are uppercase on the wire.
    #[must_use]
    pub const fn venue_bar(self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::H1 => "1H",
            Self::H4 => "4H",
            Self::D1 => "1D",
        }
    }

    /// Candle channel name carrying this timeframe, e.g. `candle4H`.
    #[must_use]
    pub fn channel(self) -> String {
        format!("candle{}", self.venue_bar())
    }

    /// Recover a timeframe from a candle channel name (`candle1H` → `1h`).
    #[must_use]
    pub fn from_channel(channel: &str) -> Option<Self> {
        channel.strip_prefix("candle").and_then(|bar| bar.parse().ok())
    }

    /// Bucket width in milliseconds.
    #[must_use]
    pub const fn interval_ms(self) -> i64 {
        match self {
            Self::M1 => 60_000,
            Self::M5 => 300_000,
            Self::M15 => 900_000,
            Self::H1 => 3_600_000,
            Self::H4 => 14_400_000,
            Self::D1 => 86_400_000,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = CandelaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Self::M1),
            "5m" => Ok(Self::M5),
            "15m" => Ok(Self::M15),
            "1h" | "1H" => Ok(Self::H1),
            "4h" | "4H" => Ok(Self::H4),
            "1d" | "1D" => Ok(Self::D1),
            other => Err(CandelaError::invalid_arg(format!(
                "unknown timeframe: {other}"
            ))),
        }
    }
}

/// One confirmed OHLCV bucket, keyed by `(symbol, timeframe, timestamp_ms)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    /// Venue instrument id.
    pub symbol: Symbol,
    /// Bucket width.
    pub timeframe: Timeframe,
    /// Bucket open time, UTC epoch milliseconds, aligned to the timeframe.
    pub timestamp_ms: i64,
    /// Opening price.
    pub open: Decimal,
    /// Highest traded price.
    pub high: Decimal,
    /// Lowest traded price.
    pub low: Decimal,
    /// Closing price.
    pub close: Decimal,
    /// Traded volume in the base unit.
    pub volume: Decimal,
}

/// Where a queued candle came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandleSource {
    /// Pushed by a collector worker from the venue stream.
    Stream,
    /// Fetched by the reconciler over REST.
    Rest,
}

impl fmt::Display for CandleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream => f.write_str("stream"),
            Self::Rest => f.write_str("rest"),
        }
    }
}

const fn is_zero(n: &u32) -> bool {
    *n == 0
}

/// The unit of work carried on `candle_queue`.
///
/// `retry_count` is absent on first send and only ever set by the DLQ loop
/// when it re-injects a failed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEnvelope {
    /// The candle itself, flattened into the envelope object.
    #[serde(flatten)]
    pub candle: Candle,
    /// When the collector or reconciler enqueued the record.
    pub received_at: DateTime<Utc>,
    /// Producer of the record.
    pub source: CandleSource,
    /// Number of DLQ re-injections this record has been through.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub retry_count: u32,
}

impl QueueEnvelope {
    /// Wrap a candle for its first trip through the queue.
    #[must_use]
    pub fn new(candle: Candle, source: CandleSource, received_at: DateTime<Utc>) -> Self {
        Self {
            candle,
            received_at,
            source,
            retry_count: 0,
        }
    }
}

/// The unit of work carried on `dead_letter_queue`.
///
/// Produced by the persister when a whole batch fails; `retry_count` inside
/// the envelope has already been incremented for the attempt being recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// The failed envelope, flattened.
    #[serde(flatten)]
    pub envelope: QueueEnvelope,
    /// Why the write failed, as reported by the store boundary.
    pub error: String,
    /// When the failure was recorded.
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    /// Record a failed envelope, bumping its retry count.
    #[must_use]
    pub fn record(mut envelope: QueueEnvelope, error: impl Into<String>, failed_at: DateTime<Utc>) -> Self {
        envelope.retry_count += 1;
        Self {
            envelope,
            error: error.into(),
            failed_at,
        }
    }
}

/// Per-symbol collector snapshot, written under `status:<symbol>` with a
/// 300 s TTL. Owned by the collector worker; read-only to observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorStatus {
    /// Instrument this worker collects.
    pub symbol: Symbol,
    /// Worker state name, e.g. `streaming` or `backoff`.
    pub state: String,
    /// Whether the venue socket is currently open.
    pub connected: bool,
    /// Completed reconnect cycles since start.
    pub reconnect_count: u64,
    /// Candles accepted and enqueued.
    pub message_count: u64,
    /// Wire, venue, and validation errors observed.
    pub error_count: u64,
    /// Seconds since the worker started.
    pub uptime_seconds: u64,
    /// Venue channel names currently subscribed.
    pub channels: Vec<String>,
    /// When this snapshot was written.
    pub last_update: DateTime<Utc>,
}

/// Coarse service health reported alongside queue metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// Queues are draining normally.
    Healthy,
    /// The main queue is above its warning threshold.
    Degraded,
}

/// Aggregate collector-service snapshot, written under
/// `collector_service_status` with a 120 s TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// Reporting service name.
    pub service: String,
    /// Live worker count.
    pub active_collectors: usize,
    /// When this snapshot was written.
    pub timestamp: DateTime<Utc>,
    /// Coarse health.
    pub status: HealthState,
}

/// Persister queue-depth snapshot, written under `processor_metrics` with a
/// 60 s TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMetrics {
    /// Reporting service name.
    pub service: String,
    /// Current `candle_queue` depth.
    pub queue_length: u64,
    /// Current `dead_letter_queue` depth.
    pub dlq_length: u64,
    /// When this snapshot was written.
    pub timestamp: DateTime<Utc>,
    /// Coarse health derived from `queue_length`.
    pub status: HealthState,
}

/// Subscribe/unsubscribe verb carried on `collector:<symbol>` topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionAction {
    /// Start (or refresh) collection for the topic's symbol.
    Subscribe,
    /// Stop collection for the topic's symbol.
    Unsubscribe,
}

/// Command published by the control gateway and consumed by the supervisor.
///
/// The target symbol is carried by the topic (`collector:<symbol>`), not the
/// payload; `symbols` lists every symbol in the originating request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionCommand {
    /// What to do with the topic's symbol.
    pub action: SubscriptionAction,
    /// All symbols named by the originating control request.
    #[serde(default)]
    pub symbols: Vec<Symbol>,
    /// Timeframes to collect; empty means the configured defaults.
    #[serde(default)]
    pub timeframes: Vec<Timeframe>,
    /// Optional operator webhook, stored but not called by the core.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    /// Identifier of the originating control request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    /// When the command was issued.
    pub timestamp: DateTime<Utc>,
}

/// Per-symbol subscription record kept under `subscription:<symbol>` with a
/// 3600 s TTL. Refreshed on re-subscribe, evicted by TTL or explicit
/// unsubscribe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionState {
    /// Subscribed instrument.
    pub symbol: Symbol,
    /// Timeframes requested for it.
    pub timeframes: Vec<Timeframe>,
    /// Identifier of the control request that created or refreshed this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    /// Optional operator webhook from the control request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    /// When the subscription was created or last refreshed.
    pub created_at: DateTime<Utc>,
}
