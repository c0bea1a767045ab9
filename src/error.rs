//! Error types surfaced by the feeder core.
//!
//! Provider-level errors are recovered locally (the provider is dropped for
//! the tick); aggregation-level errors abort only the current tick and are
//! never cached into the next cycle.

use thiserror::Error;

/// Result alias for fallible feeder operations.
pub type FeederResult<T> = std::result::Result<T, FeederError>;

#[derive(Error, Debug)]
pub enum FeederError {
    /// Fatal at startup: the configuration file failed validation.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A provider call failed or returned garbage; dropped for this tick.
    #[error("provider {provider} unavailable: {reason}")]
    ProviderUnavailable { provider: String, reason: String },

    /// Fewer observations than the statistical minimum for the operation.
    #[error("not enough observations for {symbol}: have {have}, need {need}")]
    InsufficientObservations {
        symbol: String,
        have: usize,
        need: usize,
    },

    /// After the conversion rounds some required base still has no USD chain.
    #[error("no USD conversion chain for: {missing:?}")]
    CrossRateUnresolvable { missing: Vec<String> },

    /// Derivative window coverage below the 80% floor.
    #[error("not enough history for {symbol}: missing {missing_seconds}s")]
    NotEnoughHistory {
        symbol: String,
        missing_seconds: i64,
    },

    /// Derivative window coverage lost to gaps larger than the sample cap.
    #[error("too much time gap for {symbol}: missing {missing_seconds}s")]
    TooMuchTimeGap {
        symbol: String,
        missing_seconds: i64,
    },

    /// A provider series inside the derivative window has an oversized gap.
    #[error("missing history for pair {symbol}")]
    MissingHistoryForPair { symbol: String },

    /// No ticker prices to aggregate (empty VWAP input, zero total volume).
    #[error("no prices to aggregate for {symbol}")]
    NoPrices { symbol: String },

    #[error("invalid decimal {value}: {reason}")]
    InvalidDecimal { value: String, reason: String },

    /// Ticker constructors reject negative prices and volumes.
    #[error("negative {field} in ticker price: {value}")]
    NegativeValue { field: &'static str, value: String },

    /// History store I/O failure: logged and retried next tick.
    #[error("history store error: {0}")]
    HistoryStore(#[from] rusqlite::Error),

    /// The previous prevote's window passed without a matching vote.
    #[error("vote window missed at height {height}")]
    VoteWindowMissed { height: i64 },

    /// Chain collaborator failure (height stream, params query, broadcast).
    #[error("chain client error: {0}")]
    ChainClient(String),
}

impl FeederError {
    /// True for the derivative history error family, which drops a single
    /// base for the cycle instead of failing the whole tick.
    pub fn is_insufficient_history(&self) -> bool {
        matches!(
            self,
            FeederError::NotEnoughHistory { .. }
                | FeederError::TooMuchTimeGap { .. }
                | FeederError::MissingHistoryForPair { .. }
        )
    }
}
