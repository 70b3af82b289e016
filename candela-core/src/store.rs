//! Store traits: the persistence seam between the pipeline and PostgreSQL.
//!
//! The composite key `(symbol, timeframe, timestamp_ms)` plus idempotent
//! upsert is the only coordination mechanism between the persister and the
//! reconciler; neither takes in-process locks against the other.

use async_trait::async_trait;

use crate::error::CandelaError;
use crate::types::{Candle, Symbol, Timeframe};

/// Write-side contract used by the persister and the gap filler.
#[async_trait]
pub trait CandleWriter: Send + Sync {
    /// Upsert a batch in one transaction. On conflict with the composite key
    /// the OHLCV columns are overwritten; the key columns never change.
    /// Either the whole batch commits or none of it does.
    ///
    /// Returns the number of rows written.
    ///
    /// # Errors
    /// Any failure aborts the transaction and surfaces as a store error; the
    /// caller routes the batch to the DLQ.
    async fn upsert_batch(&self, candles: &[Candle]) -> Result<u64, CandelaError>;

    /// Insert a batch in one transaction, skipping rows whose composite key
    /// already exists (`DO NOTHING`). Used by backfill so repaired history
    /// never overwrites fresher stream data.
    ///
    /// Returns the number of rows actually inserted.
    ///
    /// # Errors
    /// Any failure aborts the transaction and surfaces as a store error.
    async fn insert_missing_batch(&self, candles: &[Candle]) -> Result<u64, CandelaError>;
}

/// Audit-and-repair contract used by the reconciler. The reconciler is the
/// only legitimate deleter of candle rows.
#[async_trait]
pub trait ReconcileStore: CandleWriter {
    /// Symbols with at least one row at or after `since_ms`.
    async fn active_symbols(&self, since_ms: i64) -> Result<Vec<Symbol>, CandelaError>;

    /// Stored bucket timestamps for one series within `[start_ms, end_ms]`,
    /// ascending.
    async fn stored_timestamps(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<i64>, CandelaError>;

    /// Delete duplicate rows at or after `since_ms`, keeping for each
    /// `(symbol, timeframe, timestamp_ms)` group the row with the smallest
    /// surrogate id (the oldest insert). Runs in one transaction.
    ///
    /// Returns the number of rows deleted.
    async fn remove_duplicates(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        since_ms: i64,
    ) -> Result<u64, CandelaError>;

    /// Count duplicate rows that [`Self::remove_duplicates`] would delete,
    /// without deleting. Used by dry runs.
    async fn count_duplicates(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        since_ms: i64,
    ) -> Result<u64, CandelaError>;

    /// Delete rows at or after `since_ms` that violate the candle
    /// invariants. Runs in one transaction.
    ///
    /// Returns the number of rows deleted.
    async fn purge_invalid(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        since_ms: i64,
    ) -> Result<u64, CandelaError>;

    /// Count rows that [`Self::purge_invalid`] would delete, without
    /// deleting. Used by dry runs.
    async fn count_invalid(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        since_ms: i64,
    ) -> Result<u64, CandelaError>;

    /// Oldest and newest stored bucket timestamps for one series, or `None`
    /// when the series is empty.
    async fn stored_range(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
    ) -> Result<Option<(i64, i64)>, CandelaError>;
}
