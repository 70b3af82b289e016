//! The HTTP control surface: thin glue between operators and the broker.
//! It never touches the store or the venue; everything goes through
//! subscription keys and `collector:<symbol>` topics.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use candela_core::broker::{self, Broker, CANDLE_QUEUE, SERVICE_STATUS_KEY};
use candela_core::error::CandelaError;
use candela_core::types::{
    CollectorStatus, SubscriptionAction, SubscriptionCommand, SubscriptionState, Symbol, Timeframe,
};

const SUBSCRIPTION_TTL: Duration = Duration::from_secs(3600);

/// Shared handler state.
#[derive(Clone)]
pub struct GatewayState {
    pub broker: Arc<dyn Broker>,
    /// Used when a subscribe request names no timeframes.
    pub default_timeframes: Vec<Timeframe>,
}

/// Error envelope returned by every handler.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<CandelaError> for ApiError {
    fn from(err: CandelaError) -> Self {
        warn!(error = %err, "control request failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub symbols: Vec<Symbol>,
    #[serde(default)]
    pub timeframes: Vec<Timeframe>,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubscribeResponse {
    pub status: String,
    pub message: String,
    pub symbols: Vec<Symbol>,
    pub subscription_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct UnsubscribeResponse {
    pub status: String,
    pub symbol: Symbol,
    pub stopped_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionsResponse {
    pub status: String,
    pub total: usize,
    pub subscriptions: Vec<SubscriptionState>,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub broker: &'static str,
    pub queue: &'static str,
    pub stream: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub checks: HealthChecks,
}

/// Build the control router.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/subscribe", post(subscribe))
        .route("/subscribe/{symbol}", delete(unsubscribe))
        .route("/status/{symbol}", get(symbol_status))
        .route("/subscriptions", get(subscriptions))
        .route("/health", get(health))
        .with_state(state)
}

/// Bind and serve until `shutdown` fires.
///
/// # Errors
/// Fails if the listen address cannot be bound.
pub async fn serve(
    state: GatewayState,
    host: &str,
    port: u16,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), CandelaError> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| CandelaError::config(format!("cannot bind {addr}: {e}")))?;
    info!(%addr, "control gateway listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .map_err(|e| CandelaError::config(format!("gateway server failed: {e}")))
}

/// `POST /subscribe`: store per-symbol subscription state and signal the
/// collector supervisor.
pub async fn subscribe(
    State(state): State<GatewayState>,
    Json(request): Json<SubscribeRequest>,
) -> Result<Json<SubscribeResponse>, ApiError> {
    if request.symbols.is_empty() {
        return Err(ApiError::bad_request("symbols must not be empty"));
    }
    let timeframes = if request.timeframes.is_empty() {
        state.default_timeframes.clone()
    } else {
        request.timeframes.clone()
    };

    let created_at = Utc::now();
    let subscription_id = format!("sub_{}", created_at.timestamp());
    let command = SubscriptionCommand {
        action: SubscriptionAction::Subscribe,
        symbols: request.symbols.clone(),
        timeframes: timeframes.clone(),
        webhook_url: request.webhook_url.clone(),
        subscription_id: Some(subscription_id.clone()),
        timestamp: created_at,
    };
    let command_payload =
        serde_json::to_string(&command).map_err(|e| ApiError::from(CandelaError::wire(e)))?;

    for symbol in &request.symbols {
        let record = SubscriptionState {
            symbol: symbol.clone(),
            timeframes: timeframes.clone(),
            subscription_id: Some(subscription_id.clone()),
            webhook_url: request.webhook_url.clone(),
            created_at,
        };
        let record_payload =
            serde_json::to_string(&record).map_err(|e| ApiError::from(CandelaError::wire(e)))?;
        state
            .broker
            .set_kv(
                &broker::subscription_key(symbol),
                &record_payload,
                SUBSCRIPTION_TTL,
            )
            .await?;
        state
            .broker
            .publish(&broker::collector_topic(symbol), &command_payload)
            .await?;
        info!(%symbol, %subscription_id, "subscription created");
    }

    Ok(Json(SubscribeResponse {
        status: "success".into(),
        message: format!("subscribed to {} symbols", request.symbols.len()),
        symbols: request.symbols,
        subscription_id,
        created_at,
    }))
}

/// `DELETE /subscribe/{symbol}`: drop the subscription record and signal
/// the supervisor to stop the worker.
pub async fn unsubscribe(
    State(state): State<GatewayState>,
    Path(symbol): Path<String>,
) -> Result<Json<UnsubscribeResponse>, ApiError> {
    let symbol = Symbol::from(symbol);
    let deleted = state
        .broker
        .delete_kv(&broker::subscription_key(&symbol))
        .await?;
    if !deleted {
        return Err(ApiError::not_found(format!(
            "no subscription for {symbol}"
        )));
    }

    let stopped_at = Utc::now();
    let command = SubscriptionCommand {
        action: SubscriptionAction::Unsubscribe,
        symbols: vec![symbol.clone()],
        timeframes: Vec::new(),
        webhook_url: None,
        subscription_id: None,
        timestamp: stopped_at,
    };
    let payload =
        serde_json::to_string(&command).map_err(|e| ApiError::from(CandelaError::wire(e)))?;
    state
        .broker
        .publish(&broker::collector_topic(&symbol), &payload)
        .await?;
    info!(%symbol, "subscription cancelled");

    Ok(Json(UnsubscribeResponse {
        status: "success".into(),
        symbol,
        stopped_at,
    }))
}

/// `GET /status/{symbol}`: the collector worker's latest snapshot.
pub async fn symbol_status(
    State(state): State<GatewayState>,
    Path(symbol): Path<String>,
) -> Result<Json<CollectorStatus>, ApiError> {
    let symbol = Symbol::from(symbol);
    let payload = state
        .broker
        .get_kv(&broker::status_key(&symbol))
        .await?
        .ok_or_else(|| ApiError::not_found(format!("no status for {symbol}")))?;
    let status: CollectorStatus = serde_json::from_str(&payload)
        .map_err(|e| ApiError::from(CandelaError::wire(e)))?;
    Ok(Json(status))
}

/// `GET /subscriptions`: every live subscription record.
pub async fn subscriptions(
    State(state): State<GatewayState>,
) -> Result<Json<SubscriptionsResponse>, ApiError> {
    let keys = state.broker.keys("subscription:*").await?;
    let mut records = Vec::with_capacity(keys.len());
    for key in keys {
        let Some(payload) = state.broker.get_kv(&key).await? else {
            continue;
        };
        match serde_json::from_str::<SubscriptionState>(&payload) {
            Ok(record) => records.push(record),
            Err(e) => warn!(%key, error = %e, "unreadable subscription record"),
        }
    }
    Ok(Json(SubscriptionsResponse {
        status: "success".into(),
        total: records.len(),
        subscriptions: records,
    }))
}

/// `GET /health`: per-dependency checks; 503 only when the broker is
/// unreachable.
pub async fn health(State(state): State<GatewayState>) -> Response {
    let broker_ok = state.broker.ping().await.is_ok();
    let queue_ok = broker_ok && state.broker.queue_len(CANDLE_QUEUE).await.is_ok();
    let stream_ok = broker_ok
        && matches!(state.broker.get_kv(SERVICE_STATUS_KEY).await, Ok(Some(_)));

    let body = HealthResponse {
        status: if broker_ok { "healthy" } else { "degraded" },
        timestamp: Utc::now(),
        checks: HealthChecks {
            broker: if broker_ok { "healthy" } else { "unhealthy" },
            queue: if queue_ok { "healthy" } else { "unhealthy" },
            stream: if stream_ok { "healthy" } else { "unhealthy" },
        },
    };
    let status = if broker_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}
