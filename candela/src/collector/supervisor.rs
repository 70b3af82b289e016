//! The collector service supervisor.
//!
//! Owns the `{symbol → worker}` map. Subscribe commands materialize
//! workers (idempotently), unsubscribe commands stop them, and shutdown
//! stops everything with a bounded grace period. Publishes the aggregate
//! service status every 30 s.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use candela_core::broker::{self, Broker, COLLECTOR_PATTERN, SERVICE_STATUS_KEY, TopicMessage};
use candela_core::connector::VenueConnector;
use candela_core::error::CandelaError;
use candela_core::types::{
    HealthState, ServiceStatus, SubscriptionAction, SubscriptionCommand, Symbol, Timeframe,
};

use super::worker::{self, WorkerHandle, WorkerParams};
use crate::config::{BackoffConfig, CollectorConfig};

const SERVICE_STATUS_INTERVAL: Duration = Duration::from_secs(30);
const SERVICE_STATUS_TTL: Duration = Duration::from_secs(120);
const STOP_GRACE: Duration = Duration::from_secs(10);

pub struct SupervisorParams {
    pub broker: Arc<dyn Broker>,
    pub venue: Arc<dyn VenueConnector>,
    pub collector: CollectorConfig,
    pub backoff: BackoffConfig,
    /// Extra symbols to start immediately, on top of auto-start.
    pub initial_symbols: Vec<Symbol>,
}

pub struct CollectorSupervisor {
    broker: Arc<dyn Broker>,
    venue: Arc<dyn VenueConnector>,
    collector: CollectorConfig,
    backoff: BackoffConfig,
    initial_symbols: Vec<Symbol>,
    workers: HashMap<Symbol, WorkerHandle>,
}

impl CollectorSupervisor {
    pub fn new(params: SupervisorParams) -> Self {
        let mut initial_symbols = Vec::new();
        if params.collector.auto_start {
            initial_symbols.push(params.collector.default_symbol.clone());
        }
        for symbol in params.initial_symbols {
            if !initial_symbols.contains(&symbol) {
                initial_symbols.push(symbol);
            }
        }
        Self {
            broker: params.broker,
            venue: params.venue,
            collector: params.collector,
            backoff: params.backoff,
            initial_symbols,
            workers: HashMap::new(),
        }
    }

    /// Run until `shutdown` fires, then stop every worker cooperatively.
    ///
    /// # Errors
    /// Fails only if the command subscription cannot be established; a
    /// collector that cannot hear commands is useless.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), CandelaError> {
        let mut commands = self.broker.pattern_subscribe(COLLECTOR_PATTERN).await?;
        info!(pattern = COLLECTOR_PATTERN, "listening for subscription commands");

        for symbol in std::mem::take(&mut self.initial_symbols) {
            self.start_worker(symbol, Vec::new());
        }
        self.publish_service_status().await;

        let mut status_tick = tokio::time::interval(SERVICE_STATUS_INTERVAL);
        status_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        status_tick.tick().await;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = status_tick.tick() => self.publish_service_status().await,
                message = commands.recv() => match message {
                    Some(message) => self.handle_command(message).await,
                    None => {
                        // broker hung up on the subscription; re-establish
                        warn!("command subscription dropped, resubscribing");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        commands = self.broker.pattern_subscribe(COLLECTOR_PATTERN).await?;
                    }
                }
            }
        }

        info!(workers = self.workers.len(), "shutting down collector workers");
        for (symbol, handle) in self.workers.drain() {
            if tokio::time::timeout(STOP_GRACE, handle.stop()).await.is_err() {
                warn!(%symbol, "worker did not stop within the grace period");
            }
        }
        self.publish_service_status().await;
        Ok(())
    }

    /// Start a worker for `symbol` if none is running. Idempotent.
    pub fn start_worker(&mut self, symbol: Symbol, timeframes: Vec<Timeframe>) {
        self.workers.retain(|_, handle| !handle.is_finished());
        if self.workers.contains_key(&symbol) {
            info!(%symbol, "collector already running, refresh only");
            return;
        }
        let timeframes = if timeframes.is_empty() {
            self.collector.default_timeframes.clone()
        } else {
            timeframes
        };
        info!(%symbol, ?timeframes, "starting collector worker");
        let handle = worker::spawn(WorkerParams {
            symbol: symbol.clone(),
            timeframes,
            venue: Arc::clone(&self.venue),
            broker: Arc::clone(&self.broker),
            backoff: self.backoff,
            collector: self.collector.clone(),
        });
        self.workers.insert(symbol, handle);
    }

    async fn stop_worker(&mut self, symbol: &Symbol) {
        match self.workers.remove(symbol) {
            Some(handle) => {
                info!(%symbol, "stopping collector worker");
                if tokio::time::timeout(STOP_GRACE, handle.stop()).await.is_err() {
                    warn!(%symbol, "worker did not stop within the grace period");
                }
            }
            None => warn!(%symbol, "unsubscribe for a symbol with no worker"),
        }
    }

    async fn handle_command(&mut self, message: TopicMessage) {
        let Some(symbol) = broker::symbol_suffix(&message.topic) else {
            warn!(topic = %message.topic, "command on a malformed topic");
            return;
        };
        let command: SubscriptionCommand = match serde_json::from_str(&message.payload) {
            Ok(command) => command,
            Err(e) => {
                let preview: String = message.payload.chars().take(200).collect();
                error!(%symbol, error = %e, payload = %preview, "malformed subscription command");
                return;
            }
        };
        match command.action {
            SubscriptionAction::Subscribe => self.start_worker(symbol, command.timeframes),
            SubscriptionAction::Unsubscribe => self.stop_worker(&symbol).await,
        }
    }

    async fn publish_service_status(&mut self) {
        self.workers.retain(|_, handle| !handle.is_finished());
        let status = ServiceStatus {
            service: "collector".into(),
            active_collectors: self.workers.len(),
            timestamp: Utc::now(),
            status: HealthState::Healthy,
        };
        let Ok(payload) = serde_json::to_string(&status) else {
            return;
        };
        if let Err(e) = self
            .broker
            .set_kv(SERVICE_STATUS_KEY, &payload, SERVICE_STATUS_TTL)
            .await
        {
            warn!(error = %e, "service status write failed");
        }
    }
}
