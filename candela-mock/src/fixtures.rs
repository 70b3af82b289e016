//! Deterministic candle fixtures.

use rust_decimal::Decimal;

use candela_core::types::{Candle, Symbol, Timeframe};

/// Build `count` consecutive well-formed candles starting at `start_ms`.
///
/// Values are deterministic functions of the bucket index so tests can
/// assert on them: close = 100 + k, volume = 1 + k.
#[must_use]
pub fn series(symbol: &Symbol, timeframe: Timeframe, start_ms: i64, count: usize) -> Vec<Candle> {
    (0..count)
        .map(|k| candle_at(symbol, timeframe, start_ms + k as i64 * timeframe.interval_ms(), k))
        .collect()
}

/// One well-formed candle at `ts_ms`, parameterized by `k`.
#[must_use]
pub fn candle_at(symbol: &Symbol, timeframe: Timeframe, ts_ms: i64, k: usize) -> Candle {
    let close = Decimal::from(100 + k as i64);
    Candle {
        symbol: symbol.clone(),
        timeframe,
        timestamp_ms: ts_ms,
        open: close - Decimal::ONE,
        high: close + Decimal::ONE,
        low: close - Decimal::TWO,
        close,
        volume: Decimal::from(1 + k as i64),
    }
}
