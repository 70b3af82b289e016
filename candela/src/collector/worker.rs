//! The per-symbol collector worker.
//!
//! State machine: `Init → Connecting → Subscribed → Streaming →
//! (Disconnected → Backoff → Connecting …) → Stopped`. The venue session
//! ends by closing its event channel; the worker owns reconnecting with
//! exponential backoff and pushes every confirmed, valid candle onto
//! `candle_queue`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use candela_core::broker::{self, Broker, CANDLE_QUEUE};
use candela_core::connector::{StreamEvent, VenueConnector};
use candela_core::types::{CandleSource, CollectorStatus, QueueEnvelope, Symbol, Timeframe};
use candela_core::validate;

use super::backoff::ReconnectBackoff;
use crate::config::{BackoffConfig, CollectorConfig};

const STATUS_TTL: Duration = Duration::from_secs(300);
const PUSH_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Init,
    Connecting,
    Subscribed,
    Streaming,
    Disconnected,
    Backoff,
    Stopped,
}

impl WorkerState {
    const fn connected(self) -> bool {
        matches!(self, Self::Subscribed | Self::Streaming)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Init => "init",
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
            Self::Streaming => "streaming",
            Self::Disconnected => "disconnected",
            Self::Backoff => "backoff",
            Self::Stopped => "stopped",
        })
    }
}

pub struct WorkerParams {
    pub symbol: Symbol,
    pub timeframes: Vec<Timeframe>,
    pub venue: Arc<dyn VenueConnector>,
    pub broker: Arc<dyn Broker>,
    pub backoff: BackoffConfig,
    pub collector: CollectorConfig,
}

/// Handle to a running worker; stopping consumes it.
pub struct WorkerHandle {
    join: JoinHandle<()>,
    stop_tx: watch::Sender<bool>,
}

impl WorkerHandle {
    /// Request a cooperative stop and await the worker.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.join.await;
    }

    /// Whether the worker task has already exited.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

struct Worker {
    symbol: Symbol,
    timeframes: Vec<Timeframe>,
    venue: Arc<dyn VenueConnector>,
    broker: Arc<dyn Broker>,
    state: WorkerState,
    reconnect_count: u64,
    message_count: u64,
    error_count: u64,
    started_at: tokio::time::Instant,
}

/// Start collecting one symbol. Idempotency across symbols is the
/// supervisor's job; the worker assumes it is the only one for its symbol.
pub fn spawn(params: WorkerParams) -> WorkerHandle {
    let (stop_tx, stop_rx) = watch::channel(false);
    let worker = Worker {
        symbol: params.symbol,
        timeframes: params.timeframes,
        venue: params.venue,
        broker: params.broker,
        state: WorkerState::Init,
        reconnect_count: 0,
        message_count: 0,
        error_count: 0,
        started_at: tokio::time::Instant::now(),
    };
    let status_interval = Duration::from_secs(params.collector.status_interval_s);
    let join = tokio::spawn(worker.run(params.backoff, status_interval, stop_rx));
    WorkerHandle { join, stop_tx }
}

impl Worker {
    async fn run(
        mut self,
        backoff_config: BackoffConfig,
        status_interval: Duration,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        info!(symbol = %self.symbol, timeframes = self.timeframes.len(), "collector worker starting");
        let mut backoff = ReconnectBackoff::new(backoff_config);
        let max_attempts = backoff_config.max_reconnect_attempts;

        while !*stop_rx.borrow() {
            self.transition(WorkerState::Connecting).await;

            let Some(provider) = self.venue.as_candle_stream_provider() else {
                error!(venue = self.venue.name(), "venue cannot stream candles");
                break;
            };

            match provider.open_candles(&self.symbol, &self.timeframes).await {
                Ok((session, mut events)) => {
                    self.transition(WorkerState::Subscribed).await;
                    // the venue starts pushing as soon as the subscribe
                    // lands; treat that as stream entry
                    self.transition(WorkerState::Streaming).await;
                    backoff.reset();

                    let mut status_tick = tokio::time::interval(status_interval);
                    status_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                    status_tick.tick().await;

                    loop {
                        tokio::select! {
                            changed = stop_rx.changed() => {
                                if changed.is_err() || *stop_rx.borrow() {
                                    session.stop().await;
                                    self.transition(WorkerState::Stopped).await;
                                    return;
                                }
                            }
                            _ = status_tick.tick() => self.write_status().await,
                            event = events.recv() => match event {
                                None => {
                                    warn!(symbol = %self.symbol, "stream disconnected");
                                    self.transition(WorkerState::Disconnected).await;
                                    break;
                                }
                                Some(event) => self.handle_event(event).await,
                            }
                        }
                    }
                    drop(events);
                }
                Err(e) => {
                    self.error_count += 1;
                    warn!(symbol = %self.symbol, error = %e, "stream connect failed");
                    self.transition(WorkerState::Disconnected).await;
                }
            }

            if *stop_rx.borrow() {
                break;
            }
            if max_attempts != 0 && self.reconnect_count >= max_attempts {
                error!(
                    symbol = %self.symbol,
                    attempts = self.reconnect_count,
                    "reconnect limit reached, giving up"
                );
                break;
            }

            self.reconnect_count += 1;
            self.transition(WorkerState::Backoff).await;
            let delay = backoff.next_delay();
            info!(
                symbol = %self.symbol,
                attempt = self.reconnect_count,
                delay_s = delay.as_secs(),
                "reconnecting after backoff"
            );
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }

        self.transition(WorkerState::Stopped).await;
        info!(symbol = %self.symbol, "collector worker stopped");
    }

    async fn handle_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Subscribed { channel } => {
                debug!(symbol = %self.symbol, %channel, "subscription confirmed");
            }
            StreamEvent::VenueError { code, msg } => {
                self.error_count += 1;
                warn!(symbol = %self.symbol, ?code, %msg, "venue reported an error");
            }
            StreamEvent::Candle { candle, confirmed } => {
                if !confirmed {
                    debug!(
                        symbol = %self.symbol,
                        timeframe = %candle.timeframe,
                        ts = candle.timestamp_ms,
                        "skipping unconfirmed candle"
                    );
                    return;
                }
                if let Err(defect) = validate::validate_ingress(&candle) {
                    self.error_count += 1;
                    warn!(
                        symbol = %self.symbol,
                        timeframe = %candle.timeframe,
                        ts = candle.timestamp_ms,
                        %defect,
                        "skipping invalid candle"
                    );
                    return;
                }

                let envelope = QueueEnvelope::new(candle, CandleSource::Stream, Utc::now());
                let payload = match serde_json::to_string(&envelope) {
                    Ok(payload) => payload,
                    Err(e) => {
                        self.error_count += 1;
                        error!(symbol = %self.symbol, error = %e, "envelope encoding failed");
                        return;
                    }
                };

                // the reconciler recovers dropped candles on its next pass
                let mut pushed = false;
                for attempt in 0..PUSH_RETRIES {
                    match self.broker.push(CANDLE_QUEUE, &payload).await {
                        Ok(()) => {
                            pushed = true;
                            break;
                        }
                        Err(e) => {
                            warn!(symbol = %self.symbol, attempt, error = %e, "queue push failed");
                        }
                    }
                }
                if pushed {
                    self.message_count += 1;
                } else {
                    self.error_count += 1;
                    error!(
                        symbol = %self.symbol,
                        ts = envelope.candle.timestamp_ms,
                        "dropping candle after repeated push failures"
                    );
                }
            }
        }
    }

    async fn transition(&mut self, state: WorkerState) {
        if self.state != state {
            debug!(symbol = %self.symbol, from = %self.state, to = %state, "worker state change");
            self.state = state;
        }
        self.write_status().await;
    }

    async fn write_status(&self) {
        let status = CollectorStatus {
            symbol: self.symbol.clone(),
            state: self.state.to_string(),
            connected: self.state.connected(),
            reconnect_count: self.reconnect_count,
            message_count: self.message_count,
            error_count: self.error_count,
            uptime_seconds: self.started_at.elapsed().as_secs(),
            channels: self.timeframes.iter().map(|tf| tf.channel()).collect(),
            last_update: Utc::now(),
        };
        let Ok(payload) = serde_json::to_string(&status) else {
            return;
        };
        if let Err(e) = self
            .broker
            .set_kv(&broker::status_key(&self.symbol), &payload, STATUS_TTL)
            .await
        {
            warn!(symbol = %self.symbol, error = %e, "status write failed");
        }
    }
}
