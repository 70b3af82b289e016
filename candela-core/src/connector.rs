//! Venue connector traits.
//!
//! A connector advertises its capabilities through `as_*_provider`
//! accessors; the collector needs a stream provider, the reconciler an
//! OHLCV provider. A venue may implement either or both.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::CandelaError;
use crate::stream::StreamHandle;
use crate::types::{Candle, Symbol, Timeframe};

/// One parsed event from a live candle stream session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// The venue acknowledged a channel subscription.
    Subscribed {
        /// Acknowledged channel name, e.g. `candle1H`.
        channel: String,
    },
    /// The venue reported an error event. The session stays up unless the
    /// peer also closes the socket.
    VenueError {
        /// Venue error code, if present.
        code: Option<String>,
        /// Venue error message.
        msg: String,
    },
    /// A candle row, confirmed or provisional. Callers decide what to do
    /// with unconfirmed rows.
    Candle {
        /// The parsed candle.
        candle: Candle,
        /// Whether the venue marked the bucket as closed.
        confirmed: bool,
    },
}

/// Capability: open live candle stream sessions.
#[async_trait]
pub trait CandleStreamProvider: Send + Sync {
    /// Connect, subscribe to one candle channel per timeframe, and return
    /// the session.
    ///
    /// The receiver yields parsed events until the peer closes the socket or
    /// the session is stopped through the handle; channel closure is the
    /// disconnect signal. Reconnecting is the caller's job.
    ///
    /// # Errors
    /// Fails if the socket cannot be established or the subscribe request
    /// cannot be sent.
    async fn open_candles(
        &self,
        symbol: &Symbol,
        timeframes: &[Timeframe],
    ) -> Result<(StreamHandle, mpsc::Receiver<StreamEvent>), CandelaError>;
}

/// Capability: fetch historical OHLCV pages over REST.
#[async_trait]
pub trait OhlcvProvider: Send + Sync {
    /// The venue's advertised minimum interval between calls. Callers sleep
    /// this long after every fetch.
    fn rate_limit(&self) -> Duration;

    /// Fetch up to `limit` candles with `timestamp_ms >= since_ms`, in
    /// ascending time order.
    ///
    /// # Errors
    /// Fails on transport errors or a venue-reported error code. Rate
    /// limiting surfaces as [`CandelaError::RateLimited`].
    async fn fetch_ohlcv(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        since_ms: i64,
        limit: usize,
    ) -> Result<Vec<Candle>, CandelaError>;
}

/// A pluggable venue.
///
/// Mirrors the capability-accessor pattern: callers ask for the capability
/// they need and get `None` if the venue lacks it.
pub trait VenueConnector: Send + Sync {
    /// Short venue name used in logs and error tags.
    fn name(&self) -> &'static str;

    /// Streaming capability, if available.
    fn as_candle_stream_provider(&self) -> Option<&dyn CandleStreamProvider> {
        None
    }

    /// Historical REST capability, if available.
    fn as_ohlcv_provider(&self) -> Option<&dyn OhlcvProvider> {
        None
    }
}
