//! Deterministic doubles for candela tests and examples: an in-memory
//! broker, an in-memory store with surrogate-id semantics, and a scripted
//! venue connector.

mod broker;
pub mod fixtures;
mod store;

pub use broker::MemoryBroker;
pub use store::{MemoryStore, StoredRow};

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use candela_core::connector::{CandleStreamProvider, OhlcvProvider, StreamEvent, VenueConnector};
use candela_core::error::CandelaError;
use candela_core::stream::StreamHandle;
use candela_core::types::{Candle, Symbol, Timeframe};

/// What one `open_candles` call should do.
#[derive(Debug, Clone)]
pub enum SessionScript {
    /// Refuse to connect.
    FailConnect,
    /// Deliver these events, then hang up (the channel closes).
    Deliver(Vec<StreamEvent>),
    /// Deliver these events, then stay open until stopped.
    DeliverAndHold(Vec<StreamEvent>),
}

/// One recorded REST fetch, for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    /// Requested instrument.
    pub symbol: Symbol,
    /// Requested timeframe.
    pub timeframe: Timeframe,
    /// Requested lower bound.
    pub since_ms: i64,
    /// Requested page size.
    pub limit: usize,
}

/// Scripted venue connector. Stream sessions replay [`SessionScript`]s in
/// order; REST serves candles from an in-memory oracle and records every
/// call.
#[derive(Default)]
pub struct MockConnector {
    sessions: Mutex<VecDeque<SessionScript>>,
    oracle: Mutex<BTreeMap<(Symbol, Timeframe, i64), Candle>>,
    fetches: Mutex<Vec<FetchCall>>,
    rate_limit: Duration,
}

impl MockConnector {
    /// A connector with no scripted sessions and an empty oracle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a session script for the next `open_candles` call.
    #[must_use]
    pub fn with_session(self, script: SessionScript) -> Self {
        self.sessions
            .lock()
            .expect("mock poisoned")
            .push_back(script);
        self
    }

    /// Seed the REST oracle.
    #[must_use]
    pub fn with_oracle(self, candles: Vec<Candle>) -> Self {
        {
            let mut oracle = self.oracle.lock().expect("mock poisoned");
            for candle in candles {
                oracle.insert(
                    (candle.symbol.clone(), candle.timeframe, candle.timestamp_ms),
                    candle,
                );
            }
        }
        self
    }

    /// Use a non-zero advertised rate limit.
    #[must_use]
    pub const fn with_rate_limit(mut self, rate_limit: Duration) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Every REST fetch made so far, in order.
    #[must_use]
    pub fn fetches(&self) -> Vec<FetchCall> {
        self.fetches.lock().expect("mock poisoned").clone()
    }

    /// Number of scripted sessions not yet consumed.
    #[must_use]
    pub fn sessions_remaining(&self) -> usize {
        self.sessions.lock().expect("mock poisoned").len()
    }
}

impl VenueConnector for MockConnector {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn as_candle_stream_provider(&self) -> Option<&dyn CandleStreamProvider> {
        Some(self)
    }

    fn as_ohlcv_provider(&self) -> Option<&dyn OhlcvProvider> {
        Some(self)
    }
}

#[async_trait]
impl CandleStreamProvider for MockConnector {
    async fn open_candles(
        &self,
        _symbol: &Symbol,
        _timeframes: &[Timeframe],
    ) -> Result<(StreamHandle, mpsc::Receiver<StreamEvent>), CandelaError> {
        let script = self
            .sessions
            .lock()
            .expect("mock poisoned")
            .pop_front()
            .unwrap_or(SessionScript::FailConnect);

        let (events, hold) = match script {
            SessionScript::FailConnect => {
                return Err(CandelaError::venue("mock", "scripted connect failure"));
            }
            SessionScript::Deliver(events) => (events, false),
            SessionScript::DeliverAndHold(events) => (events, true),
        };

        let (tx, rx) = mpsc::channel(64);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let join = tokio::spawn(async move {
            for event in events {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            if hold {
                let _ = (&mut stop_rx).await;
            }
            // dropping tx hangs up
        });
        Ok((StreamHandle::new(join, stop_tx), rx))
    }
}

#[async_trait]
impl OhlcvProvider for MockConnector {
    fn rate_limit(&self) -> Duration {
        self.rate_limit
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        since_ms: i64,
        limit: usize,
    ) -> Result<Vec<Candle>, CandelaError> {
        self.fetches.lock().expect("mock poisoned").push(FetchCall {
            symbol: symbol.clone(),
            timeframe,
            since_ms,
            limit,
        });
        let oracle = self.oracle.lock().expect("mock poisoned");
        Ok(oracle
            .range((symbol.clone(), timeframe, since_ms)..)
            .take_while(|((s, tf, _), _)| s == symbol && *tf == timeframe)
            .take(limit)
            .map(|(_, candle)| candle.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: i64 = 3_600_000;
    const BASE: i64 = 1_699_999_200_000;

    #[tokio::test]
    async fn scripted_sessions_replay_in_order() {
        let sym = Symbol::from("BTC-USDT-SWAP");
        let mock = MockConnector::new()
            .with_session(SessionScript::FailConnect)
            .with_session(SessionScript::Deliver(vec![StreamEvent::Subscribed {
                channel: "candle1H".into(),
            }]));

        assert!(mock.open_candles(&sym, &[Timeframe::H1]).await.is_err());

        let (_handle, mut rx) = mock.open_candles(&sym, &[Timeframe::H1]).await.unwrap();
        assert!(matches!(
            rx.recv().await,
            Some(StreamEvent::Subscribed { .. })
        ));
        // script exhausted → hang-up
        assert!(rx.recv().await.is_none());
        assert_eq!(mock.sessions_remaining(), 0);
    }

    #[tokio::test]
    async fn oracle_pages_ascending_from_since() {
        let sym = Symbol::from("BTC-USDT-SWAP");
        let mock =
            MockConnector::new().with_oracle(fixtures::series(&sym, Timeframe::H1, BASE, 5));

        let page = mock
            .fetch_ohlcv(&sym, Timeframe::H1, BASE + H, 2)
            .await
            .unwrap();
        assert_eq!(
            page.iter().map(|c| c.timestamp_ms).collect::<Vec<_>>(),
            vec![BASE + H, BASE + 2 * H]
        );
        assert_eq!(
            mock.fetches(),
            vec![FetchCall {
                symbol: sym,
                timeframe: Timeframe::H1,
                since_ms: BASE + H,
                limit: 2
            }]
        );
    }
}
