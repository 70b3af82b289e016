//! Service configuration.
//!
//! One explicit structure covers every service; nothing below this boundary
//! reads the environment. Values come from `candela.toml` merged with
//! `CANDELA_*` environment variables (`CANDELA_BROKER__HOST` maps to
//! `broker.host`).

use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::Deserialize;

use candela_broker::BrokerConfig;
use candela_core::error::CandelaError;
use candela_core::types::{Symbol, Timeframe};
use candela_okx::OkxConfig;
use candela_store::StoreConfig;

/// Collector service settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Symbol started automatically when `auto_start` is set.
    pub default_symbol: Symbol,
    /// Timeframes used when a subscribe command names none.
    pub default_timeframes: Vec<Timeframe>,
    /// Start collecting `default_symbol` at boot, before any command
    /// arrives.
    pub auto_start: bool,
    /// Seconds between periodic status snapshots.
    pub status_interval_s: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            default_symbol: Symbol::from("BTC-USDT-SWAP"),
            default_timeframes: Timeframe::RECONCILE_DEFAULTS.to_vec(),
            auto_start: true,
            status_interval_s: 30,
        }
    }
}

/// Stream reconnect policy.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// First reconnect delay, seconds.
    pub initial_reconnect_delay_s: u64,
    /// Delay cap, seconds.
    pub max_reconnect_delay_s: u64,
    /// Give up after this many reconnects; 0 means never.
    pub max_reconnect_attempts: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_reconnect_delay_s: 5,
            max_reconnect_delay_s: 300,
            max_reconnect_attempts: 0,
        }
    }
}

/// Persister batching settings.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Upper bound on candles per transaction.
    pub size: usize,
    /// Blocking-pop timeout, seconds.
    pub timeout_s: u64,
    /// DLQ re-injections before a record is abandoned.
    pub max_retries: u32,
    /// `candle_queue` depth above which status turns degraded.
    pub queue_warn_threshold: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: 100,
            timeout_s: 5,
            max_retries: 3,
            queue_warn_threshold: 10_000,
        }
    }
}

/// Control gateway bind address.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listen host.
    pub host: String,
    /// Listen port.
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
        }
    }
}

/// The whole service configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CandelaConfig {
    /// Venue credentials and endpoints.
    pub venue: OkxConfig,
    /// Broker connection.
    pub broker: BrokerConfig,
    /// Store connection.
    pub store: StoreConfig,
    /// Collector service settings.
    pub collector: CollectorConfig,
    /// Stream reconnect policy.
    pub backoff: BackoffConfig,
    /// Persister batching settings.
    pub batch: BatchConfig,
    /// Control gateway bind address.
    pub gateway: GatewayConfig,
}

impl CandelaConfig {
    /// Load from `candela.toml` merged with `CANDELA_*` environment
    /// variables; the environment wins.
    ///
    /// # Errors
    /// Malformed values are fatal; callers exit non-zero before touching
    /// data.
    pub fn load() -> Result<Self, CandelaError> {
        Figment::new()
            .merge(Toml::file("candela.toml"))
            .merge(Env::prefixed("CANDELA_").split("__"))
            .extract()
            .map_err(|e| CandelaError::config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_deployed_constants() {
        let cfg = CandelaConfig::default();
        assert_eq!(cfg.collector.default_symbol.as_str(), "BTC-USDT-SWAP");
        assert_eq!(
            cfg.collector.default_timeframes,
            vec![
                Timeframe::M5,
                Timeframe::M15,
                Timeframe::H1,
                Timeframe::H4,
                Timeframe::D1
            ]
        );
        assert!(cfg.collector.auto_start);
        assert_eq!(cfg.backoff.initial_reconnect_delay_s, 5);
        assert_eq!(cfg.backoff.max_reconnect_delay_s, 300);
        assert_eq!(cfg.backoff.max_reconnect_attempts, 0);
        assert_eq!(cfg.batch.size, 100);
        assert_eq!(cfg.batch.timeout_s, 5);
        assert_eq!(cfg.batch.max_retries, 3);
        assert_eq!(cfg.batch.queue_warn_threshold, 10_000);
    }

    #[test]
    fn partial_figment_input_keeps_other_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "candela.toml",
                r#"
                    [collector]
                    default_symbol = "ETH-USDT-SWAP"
                    default_timeframes = ["1h", "4h"]

                    [batch]
                    size = 50
                "#,
            )?;
            jail.set_env("CANDELA_BROKER__HOST", "broker.internal");

            let cfg: CandelaConfig = Figment::new()
                .merge(Toml::file("candela.toml"))
                .merge(Env::prefixed("CANDELA_").split("__"))
                .extract()
                .expect("config should parse");

            assert_eq!(cfg.collector.default_symbol.as_str(), "ETH-USDT-SWAP");
            assert_eq!(
                cfg.collector.default_timeframes,
                vec![Timeframe::H1, Timeframe::H4]
            );
            assert_eq!(cfg.batch.size, 50);
            assert_eq!(cfg.batch.timeout_s, 5);
            assert_eq!(cfg.broker.host, "broker.internal");
            assert_eq!(cfg.broker.port, 6379);
            Ok(())
        });
    }
}
