//! Operator-initiated historical backfill: walk a range backwards from
//! `now − days`, page by page, inserting without overwriting. At most two
//! symbols run concurrently; timeframes within a symbol are serial.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use candela_core::timeline;
use candela_core::types::{Candle, Symbol, Timeframe};
use candela_core::validate;

use super::{Reconciler, RepairStats};

const DAY_MS: i64 = 86_400_000;
const MAX_PARALLEL_SYMBOLS: usize = 2;

/// Options for one backfill run.
#[derive(Debug, Clone)]
pub struct BackfillOptions {
    /// Symbols to walk; each gets every timeframe.
    pub symbols: Vec<Symbol>,
    /// Timeframes to walk, serially per symbol.
    pub timeframes: Vec<Timeframe>,
    /// How far back to start.
    pub days: i64,
    /// Plan and report only; fetch and write nothing.
    pub dry_run: bool,
}

/// Terminal state of one (symbol, timeframe) walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillStatus {
    /// Dry run; nothing touched.
    Planned,
    /// Walked to the end of the range.
    Completed,
    /// Aborted by an error; partial data may have landed.
    Failed,
}

/// Progress of one (symbol, timeframe) walk.
#[derive(Debug, Clone)]
pub struct BackfillProgress {
    pub symbol: Symbol,
    pub timeframe: Timeframe,
    /// Buckets the range is expected to contain.
    pub total_expected: u64,
    pub total_fetched: u64,
    pub total_inserted: u64,
    /// Rows skipped because their key already existed.
    pub total_duplicates: u64,
    pub status: BackfillStatus,
}

impl Reconciler {
    /// Walk the historical range for every requested series and return
    /// per-series progress. Symbol-level failures are reported in the
    /// progress rows, not propagated.
    pub async fn run_backfill(
        &self,
        options: &BackfillOptions,
        now_ms: i64,
    ) -> Vec<BackfillProgress> {
        let start_ms = now_ms - options.days * DAY_MS;
        info!(
            symbols = options.symbols.len(),
            timeframes = options.timeframes.len(),
            days = options.days,
            dry_run = options.dry_run,
            "historical backfill starting"
        );

        if options.dry_run {
            return options
                .symbols
                .iter()
                .flat_map(|symbol| {
                    options.timeframes.iter().map(|&timeframe| BackfillProgress {
                        symbol: symbol.clone(),
                        timeframe,
                        total_expected: timeline::expected_count(start_ms, now_ms, timeframe),
                        total_fetched: 0,
                        total_inserted: 0,
                        total_duplicates: 0,
                        status: BackfillStatus::Planned,
                    })
                })
                .collect();
        }

        let semaphore = Arc::new(Semaphore::new(MAX_PARALLEL_SYMBOLS));
        let tasks = options.symbols.iter().cloned().map(|symbol| {
            let reconciler = self.clone();
            let timeframes = options.timeframes.clone();
            let semaphore = Arc::clone(&semaphore);
            tokio::spawn(async move {
                // closed only if the semaphore is dropped, which it is not
                let Ok(_permit) = semaphore.acquire().await else {
                    return Vec::new();
                };
                let mut progresses = Vec::with_capacity(timeframes.len());
                for timeframe in timeframes {
                    progresses.push(
                        reconciler
                            .backfill_series(&symbol, timeframe, start_ms, now_ms)
                            .await,
                    );
                }
                progresses
            })
        });

        let mut all = Vec::new();
        for joined in join_all(tasks).await {
            match joined {
                Ok(progresses) => all.extend(progresses),
                Err(e) => warn!(error = %e, "backfill task panicked"),
            }
        }

        let inserted: u64 = all.iter().map(|p| p.total_inserted).sum();
        let failed = all
            .iter()
            .filter(|p| p.status == BackfillStatus::Failed)
            .count();
        info!(series = all.len(), inserted, failed, "historical backfill finished");
        all
    }

    async fn backfill_series(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        start_ms: i64,
        now_ms: i64,
    ) -> BackfillProgress {
        let interval = timeframe.interval_ms();
        let mut progress = BackfillProgress {
            symbol: symbol.clone(),
            timeframe,
            total_expected: timeline::expected_count(start_ms, now_ms, timeframe),
            total_fetched: 0,
            total_inserted: 0,
            total_duplicates: 0,
            status: BackfillStatus::Completed,
        };
        let mut stats = RepairStats::default();

        if let Ok(Some((oldest, newest))) = self.store().stored_range(symbol, timeframe).await {
            info!(%symbol, %timeframe, oldest, newest, "existing stored range");
        }

        let mut since = start_ms;
        while since < now_ms {
            let page = match self.fetch_page(symbol, timeframe, since, &mut stats).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(%symbol, %timeframe, since, error = %e, "backfill fetch failed");
                    progress.status = BackfillStatus::Failed;
                    break;
                }
            };
            let Some(last) = page.last() else {
                info!(%symbol, %timeframe, since, "no more history available");
                break;
            };
            let next_since = last.timestamp_ms + interval;
            progress.total_fetched += page.len() as u64;

            let valid: Vec<Candle> = page
                .into_iter()
                .filter(|candle| validate::validate_ingress(candle).is_ok())
                .collect();
            match self.store().insert_missing_batch(&valid).await {
                Ok(inserted) => {
                    progress.total_inserted += inserted;
                    progress.total_duplicates += valid.len() as u64 - inserted;
                }
                Err(e) => {
                    warn!(%symbol, %timeframe, error = %e, "backfill insert failed");
                    progress.status = BackfillStatus::Failed;
                    break;
                }
            }

            if next_since <= since {
                // a page that does not advance `since` would loop forever
                break;
            }
            since = next_since;
        }

        info!(
            %symbol,
            %timeframe,
            fetched = progress.total_fetched,
            inserted = progress.total_inserted,
            duplicates = progress.total_duplicates,
            status = ?progress.status,
            "series backfill done"
        );
        progress
    }
}
