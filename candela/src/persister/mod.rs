//! The persister: drains `candle_queue` in bounded batches, upserts each
//! batch in one transaction, and routes failed batches to the dead-letter
//! queue, from which a second loop re-injects them with bounded, linear
//! retry.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use candela_core::broker::{Broker, CANDLE_QUEUE, DEAD_LETTER_QUEUE, PROCESSOR_METRICS_KEY};
use candela_core::error::CandelaError;
use candela_core::store::CandleWriter;
use candela_core::types::{Candle, DeadLetter, HealthState, QueueEnvelope, QueueMetrics};

use crate::config::BatchConfig;

const METRICS_INTERVAL: Duration = Duration::from_secs(30);
const METRICS_TTL: Duration = Duration::from_secs(60);
const RETRY_SLEEP_UNIT: Duration = Duration::from_secs(10);

pub struct PersisterParams {
    pub broker: Arc<dyn Broker>,
    pub writer: Arc<dyn CandleWriter>,
    pub batch: BatchConfig,
}

pub struct Persister {
    broker: Arc<dyn Broker>,
    writer: Arc<dyn CandleWriter>,
    batch: BatchConfig,
}

impl Persister {
    pub fn new(params: PersisterParams) -> Self {
        Self {
            broker: params.broker,
            writer: params.writer,
            batch: params.batch,
        }
    }

    /// Run the batch, DLQ, and metrics loops until `shutdown` fires.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        info!(
            batch_size = self.batch.size,
            batch_timeout_s = self.batch.timeout_s,
            max_retries = self.batch.max_retries,
            "persister starting"
        );

        let batch_loop = {
            let shutdown = shutdown.clone();
            async move {
                while !*shutdown.borrow() {
                    if let Err(e) = self.drain_once().await {
                        error!(error = %e, "batch drain failed");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        };

        let dlq_loop = {
            let mut shutdown = shutdown.clone();
            async move {
                while !*shutdown.borrow() {
                    if let Err(e) = self.dlq_once(&mut shutdown).await {
                        error!(error = %e, "dead-letter processing failed");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        };

        let metrics_loop = {
            let mut shutdown = shutdown.clone();
            async move {
                let mut tick = tokio::time::interval(METRICS_INTERVAL);
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                        _ = tick.tick() => {
                            if let Err(e) = self.publish_metrics().await {
                                warn!(error = %e, "metrics publish failed");
                            }
                        }
                    }
                }
            }
        };

        tokio::join!(batch_loop, dlq_loop, metrics_loop);
        info!("persister stopped");
    }

    /// One batching iteration: one blocking pop, then up to `size − 1`
    /// greedy non-blocking pops, then one transactional write. Returns the
    /// number of records taken off the queue (0 on pop timeout).
    ///
    /// # Errors
    /// Broker failures only; write failures are absorbed into the DLQ.
    pub async fn drain_once(&self) -> Result<usize, CandelaError> {
        let timeout = Duration::from_secs(self.batch.timeout_s);
        let Some(first) = self.broker.pop_blocking(CANDLE_QUEUE, timeout).await? else {
            return Ok(0);
        };

        let mut taken = 1;
        let mut envelopes = Vec::with_capacity(self.batch.size);
        if let Some(envelope) = decode_envelope(&first) {
            envelopes.push(envelope);
        }
        while taken < self.batch.size {
            let Some(payload) = self.broker.pop_nonblocking(CANDLE_QUEUE).await? else {
                break;
            };
            taken += 1;
            if let Some(envelope) = decode_envelope(&payload) {
                envelopes.push(envelope);
            }
        }

        if !envelopes.is_empty() {
            self.write_batch(envelopes).await;
        }
        Ok(taken)
    }

    async fn write_batch(&self, envelopes: Vec<QueueEnvelope>) {
        let candles: Vec<Candle> = envelopes
            .iter()
            .map(|envelope| envelope.candle.clone())
            .collect();
        match self.writer.upsert_batch(&candles).await {
            Ok(written) => {
                info!(batch = envelopes.len(), written, "batch persisted");
            }
            Err(e) => {
                warn!(batch = envelopes.len(), error = %e, "batch failed, routing to dead-letter queue");
                let failed_at = Utc::now();
                for envelope in envelopes {
                    let letter = DeadLetter::record(envelope, e.to_string(), failed_at);
                    let Ok(payload) = serde_json::to_string(&letter) else {
                        continue;
                    };
                    if let Err(push_err) = self.broker.push(DEAD_LETTER_QUEUE, &payload).await {
                        error!(
                            symbol = %letter.envelope.candle.symbol,
                            ts = letter.envelope.candle.timestamp_ms,
                            error = %push_err,
                            "dead-letter push failed, record lost until reconciliation"
                        );
                    }
                }
            }
        }
    }

    /// One dead-letter iteration: pop, wait out the linear backoff
    /// (`retry_count × 10 s`), and re-inject, or abandon the record after
    /// `max_retries`. Returns whether anything was popped.
    ///
    /// # Errors
    /// Broker failures only.
    pub async fn dlq_once(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<bool, CandelaError> {
        let timeout = Duration::from_secs(self.batch.timeout_s);
        let Some(payload) = self.broker.pop_blocking(DEAD_LETTER_QUEUE, timeout).await? else {
            return Ok(false);
        };

        let letter: DeadLetter = match serde_json::from_str(&payload) {
            Ok(letter) => letter,
            Err(e) => {
                let preview: String = payload.chars().take(200).collect();
                error!(error = %e, payload = %preview, "malformed dead letter dropped");
                return Ok(true);
            }
        };

        let retry_count = letter.envelope.retry_count;
        if retry_count >= self.batch.max_retries {
            error!(
                symbol = %letter.envelope.candle.symbol,
                timeframe = %letter.envelope.candle.timeframe,
                ts = letter.envelope.candle.timestamp_ms,
                retry_count,
                error = %letter.error,
                "abandoning dead letter for operator triage"
            );
            return Ok(true);
        }

        let delay = RETRY_SLEEP_UNIT * retry_count;
        if !delay.is_zero() {
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                // on shutdown, re-inject immediately rather than losing the
                // record
                _ = shutdown.changed() => {}
            }
        }

        let Ok(payload) = serde_json::to_string(&letter.envelope) else {
            return Ok(true);
        };
        self.broker.push(CANDLE_QUEUE, &payload).await?;
        info!(
            symbol = %letter.envelope.candle.symbol,
            ts = letter.envelope.candle.timestamp_ms,
            retry_count,
            "dead letter re-injected"
        );
        Ok(true)
    }

    /// Publish queue depths under `processor_metrics` (TTL 60 s), marking
    /// the service degraded above the warning threshold.
    ///
    /// # Errors
    /// Broker failures only.
    pub async fn publish_metrics(&self) -> Result<(), CandelaError> {
        let queue_length = self.broker.queue_len(CANDLE_QUEUE).await?;
        let dlq_length = self.broker.queue_len(DEAD_LETTER_QUEUE).await?;
        let status = if queue_length > self.batch.queue_warn_threshold {
            warn!(queue_length, "candle queue above warning threshold");
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };
        let metrics = QueueMetrics {
            service: "persister".into(),
            queue_length,
            dlq_length,
            timestamp: Utc::now(),
            status,
        };
        let payload =
            serde_json::to_string(&metrics).map_err(|e| CandelaError::broker("metrics", e))?;
        self.broker
            .set_kv(PROCESSOR_METRICS_KEY, &payload, METRICS_TTL)
            .await
    }
}

fn decode_envelope(payload: &str) -> Option<QueueEnvelope> {
    match serde_json::from_str(payload) {
        Ok(envelope) => Some(envelope),
        Err(e) => {
            let preview: String = payload.chars().take(200).collect();
            warn!(error = %e, payload = %preview, "malformed queue record skipped");
            None
        }
    }
}
