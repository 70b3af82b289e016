//! The reconciler: audits stored history over a trailing window and repairs
//! it: duplicates out, invalid rows out, gaps filled from the venue's REST
//! endpoint. The only component allowed to delete candle rows.

pub mod backfill;

pub use backfill::{BackfillOptions, BackfillProgress, BackfillStatus};

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use candela_core::connector::OhlcvProvider;
use candela_core::error::CandelaError;
use candela_core::store::ReconcileStore;
use candela_core::timeline::{Gap, find_gaps};
use candela_core::types::{Candle, Symbol, Timeframe};
use candela_core::validate;

const HOUR_MS: i64 = 3_600_000;
/// REST page size used by gap fill and backfill.
pub const PAGE_LIMIT: usize = 1000;

/// Options for one windowed repair run.
#[derive(Debug, Clone)]
pub struct WindowedOptions {
    /// Trailing window length.
    pub hours: i64,
    /// Restrict to these symbols; `None` audits every symbol active in the
    /// window.
    pub symbols: Option<Vec<Symbol>>,
    /// Timeframes to audit.
    pub timeframes: Vec<Timeframe>,
    /// Detect and report only; write and delete nothing.
    pub dry_run: bool,
}

impl Default for WindowedOptions {
    fn default() -> Self {
        Self {
            // 25h overlaps daily scheduling slots and absorbs clock skew
            hours: 25,
            symbols: None,
            timeframes: Timeframe::RECONCILE_DEFAULTS.to_vec(),
            dry_run: false,
        }
    }
}

/// Counters accumulated over one windowed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairStats {
    pub symbols_processed: u64,
    pub timeframes_processed: u64,
    pub gaps_found: u64,
    pub candles_filled: u64,
    pub duplicates_removed: u64,
    pub invalid_purged: u64,
    pub rest_calls: u64,
    pub errors: u64,
}

/// Windowed repair and historical backfill over one store and one venue.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn ReconcileStore>,
    venue: Arc<dyn OhlcvProvider>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn ReconcileStore>, venue: Arc<dyn OhlcvProvider>) -> Self {
        Self { store, venue }
    }

    /// Audit and repair the trailing window ending at `now_ms`:
    /// dedup → invalid purge → gap detection → gap fill, per series.
    ///
    /// A failing series is counted and skipped; the run continues.
    ///
    /// # Errors
    /// Fails only when the active-symbol discovery itself fails.
    pub async fn run_windowed(
        &self,
        options: &WindowedOptions,
        now_ms: i64,
    ) -> Result<RepairStats, CandelaError> {
        let since_ms = now_ms - options.hours * HOUR_MS;
        let symbols = match &options.symbols {
            Some(symbols) => symbols.clone(),
            None => self.store.active_symbols(since_ms).await?,
        };
        info!(
            hours = options.hours,
            symbols = symbols.len(),
            timeframes = options.timeframes.len(),
            dry_run = options.dry_run,
            "windowed reconciliation starting"
        );

        let mut stats = RepairStats::default();
        for symbol in &symbols {
            for &timeframe in &options.timeframes {
                let result = if options.dry_run {
                    self.audit_series(symbol, timeframe, since_ms, now_ms, &mut stats)
                        .await
                } else {
                    self.repair_series(symbol, timeframe, since_ms, now_ms, &mut stats)
                        .await
                };
                if let Err(e) = result {
                    stats.errors += 1;
                    warn!(%symbol, %timeframe, error = %e, "series reconciliation failed");
                }
                stats.timeframes_processed += 1;
            }
            stats.symbols_processed += 1;
        }

        info!(
            symbols = stats.symbols_processed,
            gaps_found = stats.gaps_found,
            candles_filled = stats.candles_filled,
            duplicates_removed = stats.duplicates_removed,
            invalid_purged = stats.invalid_purged,
            rest_calls = stats.rest_calls,
            errors = stats.errors,
            "windowed reconciliation finished"
        );
        Ok(stats)
    }

    async fn repair_series(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        since_ms: i64,
        now_ms: i64,
        stats: &mut RepairStats,
    ) -> Result<(), CandelaError> {
        let removed = self
            .store
            .remove_duplicates(symbol, timeframe, since_ms)
            .await?;
        if removed > 0 {
            info!(%symbol, %timeframe, removed, "duplicates removed");
        }
        stats.duplicates_removed += removed;

        let purged = self.store.purge_invalid(symbol, timeframe, since_ms).await?;
        if purged > 0 {
            info!(%symbol, %timeframe, purged, "invalid rows purged");
        }
        stats.invalid_purged += purged;

        let gaps = self
            .detect_gaps(symbol, timeframe, since_ms, now_ms)
            .await?;
        stats.gaps_found += gaps.len() as u64;

        for gap in gaps {
            let filled = self.fill_gap(symbol, timeframe, gap, stats).await?;
            stats.candles_filled += filled;
        }
        Ok(())
    }

    async fn audit_series(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        since_ms: i64,
        now_ms: i64,
        stats: &mut RepairStats,
    ) -> Result<(), CandelaError> {
        let duplicates = self
            .store
            .count_duplicates(symbol, timeframe, since_ms)
            .await?;
        let invalid = self.store.count_invalid(symbol, timeframe, since_ms).await?;
        let gaps = self
            .detect_gaps(symbol, timeframe, since_ms, now_ms)
            .await?;
        let missing: u64 = gaps.iter().map(|gap| gap.missing_count(timeframe)).sum();
        info!(
            %symbol,
            %timeframe,
            duplicates,
            invalid,
            gaps = gaps.len(),
            missing,
            "dry run: would repair"
        );
        stats.duplicates_removed += duplicates;
        stats.invalid_purged += invalid;
        stats.gaps_found += gaps.len() as u64;
        Ok(())
    }

    async fn detect_gaps(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        since_ms: i64,
        now_ms: i64,
    ) -> Result<Vec<Gap>, CandelaError> {
        let stored: HashSet<i64> = self
            .store
            .stored_timestamps(symbol, timeframe, since_ms, now_ms)
            .await?
            .into_iter()
            .collect();
        Ok(find_gaps(since_ms, now_ms, timeframe, &stored))
    }

    /// Fetch the gap's span (one bucket of lead-in for the venue's exclusive
    /// paging bounds), keep rows inside the gap that pass ingress
    /// validation, and insert them without overwriting. Partial fills are
    /// accepted; the next run retries the remainder.
    async fn fill_gap(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        gap: Gap,
        stats: &mut RepairStats,
    ) -> Result<u64, CandelaError> {
        let since = gap.start_ms - timeframe.interval_ms();
        let fetched = self.fetch_page(symbol, timeframe, since, stats).await?;
        if fetched.is_empty() {
            warn!(%symbol, %timeframe, gap_start = gap.start_ms, "venue returned nothing for gap");
            return Ok(0);
        }

        let in_range: Vec<Candle> = fetched
            .into_iter()
            .filter(|candle| (gap.start_ms..=gap.end_ms).contains(&candle.timestamp_ms))
            .filter(|candle| validate::validate_ingress(candle).is_ok())
            .collect();
        let inserted = self.store.insert_missing_batch(&in_range).await?;
        info!(
            %symbol,
            %timeframe,
            gap_start = gap.start_ms,
            gap_end = gap.end_ms,
            missing = gap.missing_count(timeframe),
            inserted,
            "gap filled"
        );
        Ok(inserted)
    }

    /// One REST page with rate-limit etiquette: sleep the advertised
    /// interval after the call, and once more before a single retry when
    /// the venue says 429.
    pub(crate) async fn fetch_page(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        since_ms: i64,
        stats: &mut RepairStats,
    ) -> Result<Vec<Candle>, CandelaError> {
        stats.rest_calls += 1;
        let first = self
            .venue
            .fetch_ohlcv(symbol, timeframe, since_ms, PAGE_LIMIT)
            .await;
        let page = match first {
            Err(CandelaError::RateLimited { .. }) => {
                warn!(%symbol, %timeframe, "venue rate limited, retrying once");
                tokio::time::sleep(self.venue.rate_limit()).await;
                stats.rest_calls += 1;
                self.venue
                    .fetch_ohlcv(symbol, timeframe, since_ms, PAGE_LIMIT)
                    .await?
            }
            other => other?,
        };
        tokio::time::sleep(self.venue.rate_limit()).await;
        Ok(page)
    }

    pub(crate) fn store(&self) -> &Arc<dyn ReconcileStore> {
        &self.store
    }
}
