//! In-memory store with the SQL contract's surrogate-id semantics.
//!
//! Unlike the Postgres table, [`MemoryStore::insert_raw`] can fabricate
//! duplicate and invalid rows, which is exactly what reconciler tests need.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;

use candela_core::error::CandelaError;
use candela_core::store::{CandleWriter, ReconcileStore};
use candela_core::types::{Candle, Symbol, Timeframe};
use candela_core::validate;

/// One stored row with its surrogate insertion id.
#[derive(Debug, Clone)]
pub struct StoredRow {
    /// Monotonic surrogate id; the dedup tie-breaker.
    pub id: i64,
    /// The row's candle.
    pub candle: Candle,
}

/// An in-process [`ReconcileStore`] for tests and examples.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<StoredRow>>,
    next_id: Mutex<i64>,
    fail_upserts: AtomicU32,
}

impl MemoryStore {
    /// Create an empty store; surrogate ids start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: Mutex::new(1),
            ..Self::default()
        }
    }

    /// Make the next `n` upsert batches fail with a store error. Lets tests
    /// drive the DLQ path deterministically.
    pub fn fail_next_upserts(&self, n: u32) {
        self.fail_upserts.store(n, Ordering::SeqCst);
    }

    /// Insert a row verbatim with an explicit surrogate id, bypassing the
    /// uniqueness rule. Test hook for fabricating duplicates and invalid
    /// rows.
    pub fn insert_raw(&self, id: i64, candle: Candle) {
        let mut rows = self.rows.lock().expect("store poisoned");
        rows.push(StoredRow { id, candle });
        let mut next = self.next_id.lock().expect("store poisoned");
        *next = (*next).max(id + 1);
    }

    /// Snapshot of every row, insertion order.
    #[must_use]
    pub fn rows(&self) -> Vec<StoredRow> {
        self.rows.lock().expect("store poisoned").clone()
    }

    /// Stored candles for one series, ascending by timestamp.
    #[must_use]
    pub fn series(&self, symbol: &Symbol, timeframe: Timeframe) -> Vec<Candle> {
        let rows = self.rows.lock().expect("store poisoned");
        let mut candles: Vec<Candle> = rows
            .iter()
            .filter(|row| row.candle.symbol == *symbol && row.candle.timeframe == timeframe)
            .map(|row| row.candle.clone())
            .collect();
        candles.sort_by_key(|c| c.timestamp_ms);
        candles
    }

    fn fresh_id(&self) -> i64 {
        let mut next = self.next_id.lock().expect("store poisoned");
        let id = *next;
        *next += 1;
        id
    }
}

fn same_key(a: &Candle, b: &Candle) -> bool {
    a.symbol == b.symbol && a.timeframe == b.timeframe && a.timestamp_ms == b.timestamp_ms
}

fn in_scope(row: &StoredRow, symbol: &Symbol, timeframe: Timeframe, since_ms: i64) -> bool {
    row.candle.symbol == *symbol
        && row.candle.timeframe == timeframe
        && row.candle.timestamp_ms >= since_ms
}

#[async_trait]
impl CandleWriter for MemoryStore {
    async fn upsert_batch(&self, candles: &[Candle]) -> Result<u64, CandelaError> {
        let pending = self.fail_upserts.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_upserts.store(pending - 1, Ordering::SeqCst);
            return Err(CandelaError::store("upsert", "injected failure"));
        }
        let mut written = 0;
        for candle in candles {
            let id = self.fresh_id();
            let mut rows = self.rows.lock().expect("store poisoned");
            match rows.iter_mut().find(|row| same_key(&row.candle, candle)) {
                Some(row) => row.candle = candle.clone(),
                None => rows.push(StoredRow {
                    id,
                    candle: candle.clone(),
                }),
            }
            written += 1;
        }
        Ok(written)
    }

    async fn insert_missing_batch(&self, candles: &[Candle]) -> Result<u64, CandelaError> {
        let mut inserted = 0;
        for candle in candles {
            let exists = {
                let rows = self.rows.lock().expect("store poisoned");
                rows.iter().any(|row| same_key(&row.candle, candle))
            };
            if exists {
                continue;
            }
            let id = self.fresh_id();
            self.rows.lock().expect("store poisoned").push(StoredRow {
                id,
                candle: candle.clone(),
            });
            inserted += 1;
        }
        Ok(inserted)
    }
}

#[async_trait]
impl ReconcileStore for MemoryStore {
    async fn active_symbols(&self, since_ms: i64) -> Result<Vec<Symbol>, CandelaError> {
        let rows = self.rows.lock().expect("store poisoned");
        let mut symbols: Vec<Symbol> = rows
            .iter()
            .filter(|row| row.candle.timestamp_ms >= since_ms)
            .map(|row| row.candle.symbol.clone())
            .collect();
        symbols.sort();
        symbols.dedup();
        Ok(symbols)
    }

    async fn stored_timestamps(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<i64>, CandelaError> {
        let rows = self.rows.lock().expect("store poisoned");
        let mut ts: Vec<i64> = rows
            .iter()
            .filter(|row| {
                row.candle.symbol == *symbol
                    && row.candle.timeframe == timeframe
                    && (start_ms..=end_ms).contains(&row.candle.timestamp_ms)
            })
            .map(|row| row.candle.timestamp_ms)
            .collect();
        ts.sort_unstable();
        Ok(ts)
    }

    async fn remove_duplicates(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        since_ms: i64,
    ) -> Result<u64, CandelaError> {
        let mut rows = self.rows.lock().expect("store poisoned");
        let keep: Vec<i64> = rows
            .iter()
            .filter(|row| in_scope(row, symbol, timeframe, since_ms))
            .map(|row| {
                rows.iter()
                    .filter(|other| {
                        in_scope(other, symbol, timeframe, since_ms)
                            && same_key(&other.candle, &row.candle)
                    })
                    .map(|other| other.id)
                    .min()
                    .unwrap_or(row.id)
            })
            .collect();
        let before = rows.len();
        rows.retain(|row| !in_scope(row, symbol, timeframe, since_ms) || keep.contains(&row.id));
        Ok((before - rows.len()) as u64)
    }

    async fn count_duplicates(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        since_ms: i64,
    ) -> Result<u64, CandelaError> {
        let rows = self.rows.lock().expect("store poisoned");
        let scoped: Vec<&StoredRow> = rows
            .iter()
            .filter(|row| in_scope(row, symbol, timeframe, since_ms))
            .collect();
        let extra = scoped
            .iter()
            .filter(|row| {
                scoped
                    .iter()
                    .any(|other| other.id < row.id && same_key(&other.candle, &row.candle))
            })
            .count();
        Ok(extra as u64)
    }

    async fn purge_invalid(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        since_ms: i64,
    ) -> Result<u64, CandelaError> {
        let mut rows = self.rows.lock().expect("store poisoned");
        let before = rows.len();
        rows.retain(|row| {
            !in_scope(row, symbol, timeframe, since_ms) || validate::validate(&row.candle).is_ok()
        });
        Ok((before - rows.len()) as u64)
    }

    async fn count_invalid(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        since_ms: i64,
    ) -> Result<u64, CandelaError> {
        let rows = self.rows.lock().expect("store poisoned");
        Ok(rows
            .iter()
            .filter(|row| {
                in_scope(row, symbol, timeframe, since_ms)
                    && validate::validate(&row.candle).is_err()
            })
            .count() as u64)
    }

    async fn stored_range(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
    ) -> Result<Option<(i64, i64)>, CandelaError> {
        let rows = self.rows.lock().expect("store poisoned");
        let ts: Vec<i64> = rows
            .iter()
            .filter(|row| row.candle.symbol == *symbol && row.candle.timeframe == timeframe)
            .map(|row| row.candle.timestamp_ms)
            .collect();
        Ok(ts.iter().min().copied().zip(ts.iter().max().copied()))
    }
}
