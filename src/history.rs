//! Durable ticker history.
//!
//! Append-only table of per-provider observations backing the derivative
//! engine. Lives in a single embedded SQLite file that survives restarts;
//! duplicate observations by (symbol, provider, second) are suppressed.

use crate::decimal::canonical;
use crate::error::{FeederError, FeederResult};
use crate::types::{ProviderName, TickerPrice};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

const CREATE_TABLE: &str = "
CREATE TABLE IF NOT EXISTS crypto_ticker_prices (
    symbol   TEXT    NOT NULL,
    provider TEXT    NOT NULL,
    time     INTEGER NOT NULL,
    price    TEXT    NOT NULL,
    volume   TEXT    NOT NULL,
    PRIMARY KEY (symbol, provider, time)
)";

/// Handle to the history database. Single writer, opened once per process.
pub struct PriceHistory {
    conn: Connection,
}

impl PriceHistory {
    /// Open (creating if needed) the history file.
    pub fn open<P: AsRef<Path>>(path: P) -> FeederResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute(CREATE_TABLE, [])?;
        info!("price history opened: {}", path.as_ref().display());
        Ok(Self { conn })
    }

    /// In-memory store for tests and dry runs.
    pub fn in_memory() -> FeederResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute(CREATE_TABLE, [])?;
        Ok(Self { conn })
    }

    /// Append one observation. Idempotent on (symbol, provider, second);
    /// duplicates are silently ignored.
    pub fn add_ticker(
        &self,
        symbol: &str,
        provider: &ProviderName,
        ticker: &TickerPrice,
    ) -> FeederResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO crypto_ticker_prices
             (symbol, provider, time, price, volume) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                symbol,
                provider.as_str(),
                ticker.time.timestamp(),
                canonical(ticker.price),
                canonical(ticker.volume),
            ],
        )?;
        Ok(())
    }

    /// All observations for a symbol inside `[from, to]`, grouped by provider
    /// and sorted by ascending time. Empty mapping if none.
    pub fn get_ticker_prices(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> FeederResult<HashMap<ProviderName, Vec<TickerPrice>>> {
        let mut stmt = self.conn.prepare(
            "SELECT provider, time, price, volume FROM crypto_ticker_prices
             WHERE symbol = ?1 AND time >= ?2 AND time <= ?3
             ORDER BY time ASC",
        )?;
        let rows = stmt.query_map(
            params![symbol, from.timestamp(), to.timestamp()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )?;

        let mut series: HashMap<ProviderName, Vec<TickerPrice>> = HashMap::new();
        for row in rows {
            let (provider, time, price, volume) = row?;
            let at = DateTime::<Utc>::from_timestamp(time, 0).ok_or_else(|| {
                FeederError::InvalidDecimal {
                    value: time.to_string(),
                    reason: "stored timestamp out of range".to_string(),
                }
            })?;
            series
                .entry(ProviderName::from(provider))
                .or_default()
                .push(TickerPrice::new(&price, &volume, at)?);
        }
        Ok(series)
    }

    /// Delete observations older than `cutoff`. Returns the rows removed.
    pub fn prune_older_than(&self, cutoff: DateTime<Utc>) -> FeederResult<usize> {
        let removed = self.conn.execute(
            "DELETE FROM crypto_ticker_prices WHERE time < ?1",
            params![cutoff.timestamp()],
        )?;
        if removed > 0 {
            debug!(removed, "pruned old history records");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn at(seconds: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(seconds, 0).unwrap()
    }

    fn ticker(price: &str, volume: &str, seconds: i64) -> TickerPrice {
        TickerPrice::new(price, volume, at(seconds)).unwrap()
    }

    #[test]
    fn test_add_and_range_query() {
        let history = PriceHistory::in_memory().unwrap();
        let binance = ProviderName::from("binance");
        let kraken = ProviderName::from("kraken");

        history.add_ticker("ATOMUSDT", &binance, &ticker("10", "5", 100)).unwrap();
        history.add_ticker("ATOMUSDT", &binance, &ticker("11", "5", 200)).unwrap();
        history.add_ticker("ATOMUSDT", &kraken, &ticker("12", "5", 150)).unwrap();
        history.add_ticker("OTHER", &binance, &ticker("99", "5", 150)).unwrap();

        let series = history.get_ticker_prices("ATOMUSDT", at(0), at(300)).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[&binance].len(), 2);
        assert_eq!(series[&binance][0].price, dec!(10));
        assert_eq!(series[&binance][1].price, dec!(11));
        assert_eq!(series[&kraken][0].price, dec!(12));

        // range bounds are inclusive
        let series = history.get_ticker_prices("ATOMUSDT", at(150), at(200)).unwrap();
        assert_eq!(series[&kraken].len(), 1);
        assert_eq!(series[&binance].len(), 1);
    }

    #[test]
    fn test_duplicate_insert_ignored() {
        let history = PriceHistory::in_memory().unwrap();
        let binance = ProviderName::from("binance");

        history.add_ticker("ATOMUSDT", &binance, &ticker("10", "5", 100)).unwrap();
        // same (symbol, provider, second) with a different price is a no-op
        history.add_ticker("ATOMUSDT", &binance, &ticker("77", "9", 100)).unwrap();

        let series = history.get_ticker_prices("ATOMUSDT", at(0), at(300)).unwrap();
        assert_eq!(series[&binance].len(), 1);
        assert_eq!(series[&binance][0].price, dec!(10));
    }

    #[test]
    fn test_missing_symbol_is_empty() {
        let history = PriceHistory::in_memory().unwrap();
        let series = history.get_ticker_prices("NOPE", at(0), at(100)).unwrap();
        assert!(series.is_empty());
    }

    #[test]
    fn test_prune_older_than() {
        let history = PriceHistory::in_memory().unwrap();
        let binance = ProviderName::from("binance");
        history.add_ticker("ATOMUSDT", &binance, &ticker("10", "5", 100)).unwrap();
        history.add_ticker("ATOMUSDT", &binance, &ticker("11", "5", 2000)).unwrap();

        let removed = history.prune_older_than(at(1000)).unwrap();
        assert_eq!(removed, 1);
        let series = history.get_ticker_prices("ATOMUSDT", at(0), at(3000)).unwrap();
        assert_eq!(series[&binance].len(), 1);
        assert_eq!(series[&binance][0].price, dec!(11));
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prices.db");
        let binance = ProviderName::from("binance");

        {
            let history = PriceHistory::open(&path).unwrap();
            history.add_ticker("ATOMUSDT", &binance, &ticker("10", "5", 100)).unwrap();
        }

        let history = PriceHistory::open(&path).unwrap();
        let series = history.get_ticker_prices("ATOMUSDT", at(0), at(300)).unwrap();
        assert_eq!(series[&binance][0].price, dec!(10));
        assert_eq!(series[&binance][0].volume, dec!(5));
    }
}
