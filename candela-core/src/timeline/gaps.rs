//! Missing-timestamp detection over a stored series.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::expected_timestamps;
use crate::types::Timeframe;

/// A maximal run of consecutive missing bucket timestamps, inclusive on both
/// ends. A single missing bucket has `start_ms == end_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    /// First missing bucket timestamp.
    pub start_ms: i64,
    /// Last missing bucket timestamp.
    pub end_ms: i64,
}

impl Gap {
    /// Number of buckets missing in this gap.
    #[must_use]
    pub const fn missing_count(&self, timeframe: Timeframe) -> u64 {
        ((self.end_ms - self.start_ms) / timeframe.interval_ms() + 1) as u64
    }
}

/// Compare the expected timestamps of `[start_ms, end_ms]` against `stored`
/// and coalesce the missing ones into [`Gap`] ranges, ascending.
#[must_use]
pub fn find_gaps(
    start_ms: i64,
    end_ms: i64,
    timeframe: Timeframe,
    stored: &HashSet<i64>,
) -> Vec<Gap> {
    let interval = timeframe.interval_ms();
    let mut gaps: Vec<Gap> = Vec::new();
    for ts in expected_timestamps(start_ms, end_ms, timeframe) {
        if stored.contains(&ts) {
            continue;
        }
        match gaps.last_mut() {
            Some(last) if last.end_ms + interval == ts => last.end_ms = ts,
            _ => gaps.push(Gap {
                start_ms: ts,
                end_ms: ts,
            }),
        }
    }
    gaps
}
