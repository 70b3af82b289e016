//! candela
//!
//! The OKX candlestick ingestion pipeline: supervised per-symbol stream
//! collectors feed `candle_queue`, the persister drains it into PostgreSQL
//! in idempotent batches (failures detour through the dead-letter queue),
//! and the reconciler audits the trailing window against the venue's REST
//! history.
//!
//! Service wiring lives in the binary; this library exposes the components
//! so tests can drive them against the in-memory doubles.

pub mod collector;
pub mod config;
pub mod gateway;
pub mod persister;
pub mod reconciler;

pub use config::CandelaConfig;
pub use persister::{Persister, PersisterParams};
pub use reconciler::{Reconciler, RepairStats, WindowedOptions};
