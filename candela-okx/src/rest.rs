//! Rate-limited REST OHLCV client over `/api/v5/market/candles`.
//!
//! The venue pages newest-first with exclusive `before`/`after` bounds; this
//! client brackets the ascending window `[since, since + limit·interval)`
//! and normalizes the page to ascending order, confirmed rows only.

use std::time::Duration;

use reqwest::StatusCode;
use tracing::debug;
use url::Url;

use candela_core::error::CandelaError;
use candela_core::types::{Candle, Symbol, Timeframe};

use crate::wire::{self, ChannelArg, RestResponse};

const CANDLES_PATH: &str = "/api/v5/market/candles";

pub(crate) struct OkxRestClient {
    http: reqwest::Client,
    base: Url,
    rate_limit: Duration,
}

impl OkxRestClient {
    pub(crate) fn new(rest_url: &str, rate_limit: Duration) -> Result<Self, CandelaError> {
        let base = Url::parse(rest_url)
            .map_err(|e| CandelaError::config(format!("bad venue rest url {rest_url:?}: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CandelaError::venue("okx", e))?;
        Ok(Self {
            http,
            base,
            rate_limit,
        })
    }

    pub(crate) const fn rate_limit(&self) -> Duration {
        self.rate_limit
    }

    pub(crate) async fn candles(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        since_ms: i64,
        limit: usize,
    ) -> Result<Vec<Candle>, CandelaError> {
        let interval = timeframe.interval_ms();
        let mut url = self
            .base
            .join(CANDLES_PATH)
            .map_err(|e| CandelaError::venue("okx", e))?;
        url.query_pairs_mut()
            .append_pair("instId", symbol.as_str())
            .append_pair("bar", timeframe.venue_bar())
            .append_pair("before", &(since_ms - 1).to_string())
            .append_pair("after", &(since_ms + limit as i64 * interval).to_string())
            .append_pair("limit", &limit.to_string());

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| CandelaError::venue("okx", e))?;
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(CandelaError::RateLimited { venue: "okx" });
        }
        if !response.status().is_success() {
            return Err(CandelaError::venue(
                "okx",
                format!("candles returned HTTP {}", response.status()),
            ));
        }

        let body: RestResponse = response
            .json()
            .await
            .map_err(|e| CandelaError::venue("okx", e))?;
        if body.code != wire::CODE_SUCCESS {
            return Err(CandelaError::venue(
                "okx",
                format!("candles error {}: {}", body.code, body.msg),
            ));
        }

        let arg = ChannelArg {
            channel: timeframe.channel(),
            inst_id: symbol.as_str().to_owned(),
        };
        let mut candles = Vec::with_capacity(body.data.len());
        for row in &body.data {
            let (candle, confirmed) = wire::parse_candle_row(&arg, row)?;
            // the newest bucket may still be open; history must stay
            // confirmed-only
            if confirmed && candle.timestamp_ms >= since_ms {
                candles.push(candle);
            }
        }
        candles.sort_by_key(|c| c.timestamp_ms);
        debug!(
            %symbol,
            timeframe = %timeframe,
            since_ms,
            fetched = candles.len(),
            "fetched ohlcv page"
        );
        Ok(candles)
    }
}
