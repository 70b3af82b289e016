//! candela-core
//!
//! Types, traits, and pure utilities shared across the candela ingestion
//! pipeline.
//!
//! - `types`: candles, envelopes, and status snapshots.
//! - `validate`: write-time candle invariants.
//! - `timeline`: boundary alignment and gap detection.
//! - `broker`: the queue/pub-sub/snapshot seam and its key layout.
//! - `connector`: venue capability traits (stream and REST OHLCV).
//! - `store`: persistence and reconciliation contracts.
//! - `stream`: handles for long-lived session tasks.
#![warn(missing_docs)]

/// The broker seam and the fixed key/topic layout.
pub mod broker;
/// Venue connector capability traits.
pub mod connector;
/// Core error type shared by every candela crate.
pub mod error;
/// Handle abstraction for stream session tasks.
pub mod stream;
/// Persistence and reconciliation contracts.
pub mod store;
/// Pure candle-timeline arithmetic.
pub mod timeline;
/// Canonical data types.
pub mod types;
/// Candle invariant checks.
pub mod validate;

pub use broker::{Broker, TopicMessage};
pub use connector::{CandleStreamProvider, OhlcvProvider, StreamEvent, VenueConnector};
pub use error::CandelaError;
pub use stream::StreamHandle;
pub use store::{CandleWriter, ReconcileStore};
pub use timeline::{Gap, find_gaps};
pub use types::*;
pub use validate::{CandleDefect, validate, validate_ingress};
