//! Price oracle feeder library.
//!
//! Aggregates spot market data from heterogeneous venues into a single
//! USD-denominated rate per asset: cross-rate resolution, statistical
//! deviation filtering, volume-weighted aggregation, and time-weighted
//! derivative pricing over a durable history store.

pub mod chain;
pub mod config;
pub mod decimal;
pub mod error;
pub mod history;
pub mod oracle;
pub mod provider;
pub mod server;
pub mod telemetry;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use error::{FeederError, FeederResult};
pub use oracle::{Oracle, PricePublisher};
pub use types::{CurrencyPair, ProviderName, TickerPrice};
