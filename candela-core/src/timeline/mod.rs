//! Pure candle-timeline arithmetic: boundary alignment, expected-timestamp
//! enumeration, and gap coalescing.
//!
//! Everything here is deterministic and side-effect free; the reconciler
//! feeds it stored timestamps and acts on the result.

pub mod gaps;

pub use gaps::{Gap, find_gaps};

use crate::types::Timeframe;

/// Round `ts_ms` down to the nearest timeframe boundary.
#[must_use]
pub const fn align_down(ts_ms: i64, timeframe: Timeframe) -> i64 {
    let interval = timeframe.interval_ms();
    ts_ms - ts_ms.rem_euclid(interval)
}

/// Round `ts_ms` up to the nearest timeframe boundary.
#[must_use]
pub const fn align_up(ts_ms: i64, timeframe: Timeframe) -> i64 {
    let interval = timeframe.interval_ms();
    let rem = ts_ms.rem_euclid(interval);
    if rem == 0 { ts_ms } else { ts_ms - rem + interval }
}

/// Enumerate every boundary-aligned timestamp expected in
/// `[start_ms, end_ms]`, inclusive on both ends.
///
/// `start_ms` is aligned up and `end_ms` aligned down first, so callers may
/// pass raw wall-clock bounds.
pub fn expected_timestamps(
    start_ms: i64,
    end_ms: i64,
    timeframe: Timeframe,
) -> impl Iterator<Item = i64> {
    let interval = timeframe.interval_ms();
    let first = align_up(start_ms, timeframe);
    let last = align_down(end_ms, timeframe);
    (0..)
        .map(move |k| first + k * interval)
        .take_while(move |ts| *ts <= last)
}

/// Number of buckets expected in `[start_ms, end_ms]` after alignment.
#[must_use]
pub const fn expected_count(start_ms: i64, end_ms: i64, timeframe: Timeframe) -> u64 {
    let first = align_up(start_ms, timeframe);
    let last = align_down(end_ms, timeframe);
    if last < first {
        0
    } else {
        ((last - first) / timeframe.interval_ms() + 1) as u64
    }
}
