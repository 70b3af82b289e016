//! OKX venue connector for candela.
//!
//! Implements both venue capabilities: live candle stream sessions over the
//! v5 business WebSocket and historical OHLCV pages over the public REST
//! API. Market-data endpoints are public, so no request signing is
//! performed; credentials ride along in the config for deployments that add
//! private endpoints.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;

use candela_core::connector::{CandleStreamProvider, OhlcvProvider, StreamEvent, VenueConnector};
use candela_core::error::CandelaError;
use candela_core::stream::StreamHandle;
use candela_core::types::{Candle, Symbol, Timeframe};

mod rest;
mod stream;
pub mod wire;

const PROD_WS_URL: &str = "wss://ws.okx.com:8443/ws/v5/business";
const SANDBOX_WS_URL: &str = "wss://wspap.okx.com:8443/ws/v5/business?brokerId=9999";
const REST_URL: &str = "https://www.okx.com";

/// Venue settings, deserialized from the `venue` section of the service
/// configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OkxConfig {
    /// API key; unused by the public market-data endpoints.
    pub api_key: Option<String>,
    /// API secret; unused by the public market-data endpoints.
    pub secret: Option<String>,
    /// API passphrase; unused by the public market-data endpoints.
    pub passphrase: Option<String>,
    /// Use the demo-trading hosts.
    pub sandbox: bool,
    /// Override the WebSocket endpoint (tests, proxies).
    pub ws_url: Option<String>,
    /// Override the REST endpoint (tests, proxies).
    pub rest_url: Option<String>,
    /// Advertised minimum interval between REST calls, in milliseconds.
    pub rate_limit_ms: u64,
}

impl Default for OkxConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            secret: None,
            passphrase: None,
            sandbox: true,
            ws_url: None,
            rest_url: None,
            rate_limit_ms: 100,
        }
    }
}

impl OkxConfig {
    /// Effective WebSocket endpoint after the sandbox switch and overrides.
    #[must_use]
    pub fn ws_url(&self) -> &str {
        self.ws_url.as_deref().unwrap_or(if self.sandbox {
            SANDBOX_WS_URL
        } else {
            PROD_WS_URL
        })
    }

    /// Effective REST endpoint after overrides.
    #[must_use]
    pub fn rest_url(&self) -> &str {
        self.rest_url.as_deref().unwrap_or(REST_URL)
    }
}

/// The OKX connector. One instance serves both the collector and the
/// reconciler.
pub struct OkxConnector {
    config: OkxConfig,
    rest: rest::OkxRestClient,
}

impl OkxConnector {
    /// Build a connector from venue settings.
    ///
    /// # Errors
    /// Fails if an endpoint override does not parse as a URL.
    pub fn new(config: OkxConfig) -> Result<Self, CandelaError> {
        let rest = rest::OkxRestClient::new(
            config.rest_url(),
            Duration::from_millis(config.rate_limit_ms),
        )?;
        Ok(Self { config, rest })
    }
}

impl VenueConnector for OkxConnector {
    fn name(&self) -> &'static str {
        "okx"
    }

    fn as_candle_stream_provider(&self) -> Option<&dyn CandleStreamProvider> {
        Some(self)
    }

    fn as_ohlcv_provider(&self) -> Option<&dyn OhlcvProvider> {
        Some(self)
    }
}

#[async_trait]
impl CandleStreamProvider for OkxConnector {
    async fn open_candles(
        &self,
        symbol: &Symbol,
        timeframes: &[Timeframe],
    ) -> Result<(StreamHandle, mpsc::Receiver<StreamEvent>), CandelaError> {
        stream::open_session(self.config.ws_url(), symbol, timeframes).await
    }
}

#[async_trait]
impl OhlcvProvider for OkxConnector {
    fn rate_limit(&self) -> Duration {
        self.rest.rate_limit()
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        since_ms: i64,
        limit: usize,
    ) -> Result<Vec<Candle>, CandelaError> {
        self.rest.candles(symbol, timeframe, since_ms, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandbox_switch_selects_the_demo_host() {
        let sandbox = OkxConfig::default();
        assert!(sandbox.ws_url().starts_with("wss://wspap.okx.com"));

        let prod = OkxConfig {
            sandbox: false,
            ..OkxConfig::default()
        };
        assert!(prod.ws_url().starts_with("wss://ws.okx.com"));
        assert_eq!(prod.rest_url(), "https://www.okx.com");
    }

    #[test]
    fn overrides_beat_the_sandbox_switch() {
        let cfg = OkxConfig {
            ws_url: Some("ws://localhost:9001".into()),
            rest_url: Some("http://localhost:9002".into()),
            ..OkxConfig::default()
        };
        assert_eq!(cfg.ws_url(), "ws://localhost:9001");
        assert_eq!(cfg.rest_url(), "http://localhost:9002");
    }
}
