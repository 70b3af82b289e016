use thiserror::Error;

/// Unified error type for the candela workspace.
///
/// Infrastructure crates map their native failures (Redis, Postgres, socket,
/// HTTP) into this enum at the crate boundary; no backend error type crosses
/// a seam. The constructor helpers keep call sites terse.
#[derive(Debug, Error)]
pub enum CandelaError {
    /// Startup configuration is missing or malformed. Always fatal.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid input argument (CLI, control request, or API misuse).
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    /// A broker operation failed.
    #[error("broker {op} failed: {msg}")]
    Broker {
        /// Operation label, e.g. `brpop` or `publish`.
        op: &'static str,
        /// Backend-reported failure.
        msg: String,
    },

    /// A store operation failed.
    #[error("store {op} failed: {msg}")]
    Store {
        /// Operation label, e.g. `upsert` or `dedup`.
        op: &'static str,
        /// Backend-reported failure.
        msg: String,
    },

    /// The venue rejected or failed a stream or REST interaction.
    #[error("{venue} failed: {msg}")]
    Venue {
        /// Venue name, e.g. `okx`.
        venue: &'static str,
        /// Venue-reported failure.
        msg: String,
    },

    /// The venue asked us to back off.
    #[error("{venue} rate limited")]
    RateLimited {
        /// Venue name.
        venue: &'static str,
    },

    /// A wire payload could not be parsed.
    #[error("malformed wire data: {0}")]
    Wire(String),

    /// A resource could not be found.
    #[error("not found: {what}")]
    NotFound {
        /// Description of the missing resource, e.g. `status for BTC-USDT-SWAP`.
        what: String,
    },
}

impl CandelaError {
    /// Helper: build a `Config` error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Helper: build an `InvalidArg` error.
    pub fn invalid_arg(msg: impl Into<String>) -> Self {
        Self::InvalidArg(msg.into())
    }

    /// Helper: build a `Broker` error from any displayable backend failure.
    pub fn broker(op: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Broker {
            op,
            msg: err.to_string(),
        }
    }

    /// Helper: build a `Store` error from any displayable backend failure.
    pub fn store(op: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Store {
            op,
            msg: err.to_string(),
        }
    }

    /// Helper: build a `Venue` error.
    pub fn venue(venue: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Venue {
            venue,
            msg: err.to_string(),
        }
    }

    /// Helper: build a `Wire` error.
    pub fn wire(err: impl std::fmt::Display) -> Self {
        Self::Wire(err.to_string())
    }

    /// Helper: build a `NotFound` error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// True for failures that retry-with-backoff is expected to absorb.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Broker { .. } | Self::Store { .. } | Self::Venue { .. } | Self::RateLimited { .. }
        )
    }
}
