//! Candle invariant checks.
//!
//! The collector applies only the cheap ingress subset (`volume > 0`,
//! `close > 0`); the reconciler enforces the full set and deletes stored
//! rows that fail it.

use thiserror::Error;

use crate::types::Candle;

/// Why a candle fails the write-time invariants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CandleDefect {
    /// One of open/high/low/close is zero or negative.
    #[error("non-positive price")]
    NonPositivePrice,
    /// Volume is zero or negative.
    #[error("non-positive volume")]
    NonPositiveVolume,
    /// `high < low`.
    #[error("high below low")]
    HighBelowLow,
    /// `high < open` or `high < close`.
    #[error("high below open or close")]
    HighNotExtreme,
    /// `low > open` or `low > close`.
    #[error("low above open or close")]
    LowNotExtreme,
    /// `timestamp_ms` is not a multiple of the timeframe interval.
    #[error("timestamp not aligned to timeframe boundary")]
    Misaligned,
}

/// Cheap ingress check applied by the collector before enqueueing.
///
/// # Errors
/// Returns the first defect found among `volume > 0` and `close > 0`.
pub fn validate_ingress(candle: &Candle) -> Result<(), CandleDefect> {
    if candle.volume.is_sign_negative() || candle.volume.is_zero() {
        return Err(CandleDefect::NonPositiveVolume);
    }
    if candle.close.is_sign_negative() || candle.close.is_zero() {
        return Err(CandleDefect::NonPositivePrice);
    }
    Ok(())
}

/// Full invariant check, as enforced by the reconciler's purge.
///
/// # Errors
/// Returns the first defect found, in the order prices, volume, OHLC
/// ordering, boundary alignment.
pub fn validate(candle: &Candle) -> Result<(), CandleDefect> {
    for price in [candle.open, candle.high, candle.low, candle.close] {
        if price.is_sign_negative() || price.is_zero() {
            return Err(CandleDefect::NonPositivePrice);
        }
    }
    if candle.volume.is_sign_negative() || candle.volume.is_zero() {
        return Err(CandleDefect::NonPositiveVolume);
    }
    if candle.high < candle.low {
        return Err(CandleDefect::HighBelowLow);
    }
    if candle.high < candle.open || candle.high < candle.close {
        return Err(CandleDefect::HighNotExtreme);
    }
    if candle.low > candle.open || candle.low > candle.close {
        return Err(CandleDefect::LowNotExtreme);
    }
    if candle.timestamp_ms % candle.timeframe.interval_ms() != 0 {
        return Err(CandleDefect::Misaligned);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Symbol, Timeframe};
    use rust_decimal::Decimal;

    fn good() -> Candle {
        Candle {
            symbol: Symbol::from("BTC-USDT-SWAP"),
            timeframe: Timeframe::H1,
            timestamp_ms: 1_700_000_000_000 - (1_700_000_000_000 % 3_600_000),
            open: Decimal::ONE,
            high: Decimal::TWO,
            low: Decimal::ONE,
            close: Decimal::TWO,
            volume: Decimal::ONE,
        }
    }

    #[test]
    fn accepts_well_formed_candle() {
        assert_eq!(validate(&good()), Ok(()));
        assert_eq!(validate_ingress(&good()), Ok(()));
    }

    #[test]
    fn rejects_inverted_range() {
        let mut c = good();
        c.high = Decimal::ONE;
        c.low = Decimal::TWO;
        // both open and close sit outside [low, high] too, but the range
        // inversion is reported first
        assert_eq!(validate(&c), Err(CandleDefect::HighBelowLow));
        // the ingress subset does not look at high/low
        assert_eq!(validate_ingress(&c), Ok(()));
    }

    #[test]
    fn rejects_zero_volume_everywhere() {
        let mut c = good();
        c.volume = Decimal::ZERO;
        assert_eq!(validate(&c), Err(CandleDefect::NonPositiveVolume));
        assert_eq!(validate_ingress(&c), Err(CandleDefect::NonPositiveVolume));
    }

    #[test]
    fn rejects_misaligned_timestamp() {
        let mut c = good();
        c.timestamp_ms += 1;
        assert_eq!(validate(&c), Err(CandleDefect::Misaligned));
    }

    #[test]
    fn rejects_high_below_close() {
        let mut c = good();
        c.close = Decimal::TEN;
        assert_eq!(validate(&c), Err(CandleDefect::HighNotExtreme));
    }
}
