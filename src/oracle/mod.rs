//! Tick scheduler and aggregation pipeline.
//!
//! One logical ticker task drives the pipeline serially on a fixed cadence:
//! read the chain height, decide whether this tick falls in a new vote
//! window, fan out provider queries with a per-call deadline, feed
//! derivative pairs into history and the rest into the cross-rate resolver,
//! then publish the per-base USD snapshot and hand the wire string to the
//! vote broadcaster.

pub mod convert;
pub mod derivative;
pub mod deviation;
pub mod vwap;

use crate::chain::{ChainClient, OracleParams};
use crate::config::{Config, DerivativeKind};
use crate::error::{FeederError, FeederResult};
use crate::history::PriceHistory;
use crate::provider::{Provider, ProviderCache};
use crate::telemetry;
use crate::types::{
    exchange_rates_string, AggregatedProviderPrices, ProviderName,
};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// On-chain params are reused for this many blocks before a refresh.
const PARAMS_CACHE_BLOCKS: i64 = 200;

/// History pruning runs once per this many aggregation cycles.
const HISTORY_PRUNE_INTERVAL_TICKS: u64 = 600;

/// Latest published per-base USD snapshot.
#[derive(Debug, Clone, Default)]
pub struct PublishedPrices {
    pub rates: BTreeMap<String, Decimal>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Handle to the published snapshot, shared with the status server. The
/// lock is held only for the swap or the copy, never across I/O.
#[derive(Clone, Default)]
pub struct PricePublisher {
    inner: Arc<RwLock<PublishedPrices>>,
}

impl PricePublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, rates: BTreeMap<String, Decimal>, at: DateTime<Utc>) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = PublishedPrices {
                rates,
                updated_at: Some(at),
            };
        }
    }

    pub fn snapshot(&self) -> PublishedPrices {
        self.inner
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Rates as canonical 18-fractional-digit strings for the JSON surface.
    pub fn canonical_rates(&self) -> BTreeMap<String, String> {
        self.snapshot()
            .rates
            .iter()
            .map(|(base, rate)| (base.clone(), crate::decimal::canonical(*rate)))
            .collect()
    }
}

/// A prevote held until its window's vote goes out.
struct PreVote {
    vote_period: i64,
    exchange_rates: String,
}

pub struct Oracle<C: ChainClient> {
    config: Config,
    chain: C,
    history: PriceHistory,
    providers: ProviderCache,
    publisher: PricePublisher,
    http: reqwest::Client,

    // lookups derived from config once at startup
    thresholds: HashMap<String, Decimal>,
    min_providers: HashMap<String, usize>,
    weights: HashMap<String, HashMap<ProviderName, Decimal>>,
    derivative_symbols: HashSet<String>,

    // vote window state
    previous_prevote: Option<PreVote>,
    previous_vote_period: Option<i64>,
    last_height: i64,
    params_cache: Option<(i64, OracleParams)>,
    ticks: u64,
}

impl<C: ChainClient> Oracle<C> {
    pub fn new(
        config: Config,
        chain: C,
        publisher: PricePublisher,
        history: PriceHistory,
    ) -> FeederResult<Self> {
        let http = reqwest::Client::new();
        let thresholds = config.deviation_thresholds_by_base();
        let min_providers = config.min_providers_by_base();
        let weights = config.provider_weights();
        let derivative_symbols = config.derivative_symbols();

        Ok(Self {
            config,
            chain,
            history,
            providers: ProviderCache::new(),
            publisher,
            http,
            thresholds,
            min_providers,
            weights,
            derivative_symbols,
            previous_prevote: None,
            previous_vote_period: None,
            last_height: 0,
            params_cache: None,
            ticks: 0,
        })
    }

    /// Pre-seed a provider client, bypassing lazy construction.
    pub fn seed_provider(&mut self, client: Arc<dyn Provider>) {
        self.providers.insert(client);
    }

    /// Drive ticks until shutdown. A tick in flight always finishes; the
    /// loop only exits between cycles.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        self.init_providers().await;
        info!(
            "oracle started: {} pairs, {} derivative",
            self.config.currency_pairs.len(),
            self.derivative_symbols.len()
        );

        let mut interval = tokio::time::interval(self.config.height_poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }
            if let Err(err) = self.tick().await {
                telemetry::tick_failure();
                error!("tick failed: {err}");
            }
        }

        info!("oracle stopped");
        Ok(())
    }

    /// One aggregation cycle.
    pub async fn tick(&mut self) -> FeederResult<()> {
        let height = self.chain.get_chain_height().await?;
        if height <= 0 {
            debug!("chain height not available yet");
            return Ok(());
        }
        if height == self.last_height {
            // block has not advanced; nothing to do
            return Ok(());
        }
        self.last_height = height;

        let params = self.oracle_params(height).await?;
        let vote_period = params.vote_period.max(1);
        let next_height = height + 1;
        let current_period = next_height / vote_period;
        let blocks_until_end = vote_period - (next_height % vote_period);

        if let Some(prevote) = &self.previous_prevote {
            if current_period > prevote.vote_period + 1 {
                warn!(
                    height,
                    stale_rates = %prevote.exchange_rates,
                    "{}",
                    FeederError::VoteWindowMissed { height }
                );
                telemetry::missed_vote_window();
                self.previous_prevote = None;
            }
        }

        if self.previous_vote_period == Some(current_period) && blocks_until_end > 1 {
            // still inside the window and not near its end
            return Ok(());
        }

        let now = Utc::now();
        let snapshot = self.fetch_provider_prices().await;

        // derivative pairs feed history; everything else feeds the resolver
        let mut spot = AggregatedProviderPrices::new();
        for (provider, tickers) in snapshot {
            for (symbol, ticker) in tickers {
                if self.derivative_symbols.contains(&symbol) {
                    if let Err(err) = self.history.add_ticker(&symbol, &provider, &ticker) {
                        warn!(symbol = %symbol, "history append failed: {err}");
                    }
                } else {
                    spot.entry(provider.clone())
                        .or_default()
                        .insert(symbol, ticker);
                }
            }
        }

        self.ticks += 1;
        if self.ticks % HISTORY_PRUNE_INTERVAL_TICKS == 0 {
            self.prune_history(now);
        }

        let spot_pairs = self.config.spot_pairs();
        let mut rates = convert::convert_tickers_to_usd(
            &spot,
            &spot_pairs,
            &self.thresholds,
            &self.min_providers,
            &self.weights,
        )?;

        let missing = self.missing_required_bases(&params, &rates);
        if !missing.is_empty() {
            return Err(FeederError::CrossRateUnresolvable { missing });
        }

        for pair_config in self.config.derivative_pairs() {
            let pair = pair_config.pair();
            let symbol = pair.symbol();
            let Ok(period) = chrono::Duration::from_std(pair_config.derivative_period) else {
                warn!(symbol = %symbol, "derivative period out of range");
                continue;
            };
            let start = now - period;

            let series = match self.history.get_ticker_prices(&symbol, start, now) {
                Ok(series) => series,
                Err(err) => {
                    warn!(symbol = %symbol, "history read failed: {err}");
                    continue;
                }
            };
            let result = match pair_config.derivative {
                Some(DerivativeKind::Twap) => derivative::twap(&symbol, &series, start, now),
                Some(DerivativeKind::Tvwap) => derivative::tvwap(&symbol, &series, start, now),
                None => continue,
            };
            let price = match result {
                Ok(price) => price,
                Err(err) => {
                    warn!(symbol = %symbol, "derivative base dropped: {err}");
                    continue;
                }
            };

            let usd_price = if pair.quote_is_usd() {
                price
            } else if let Some(quote_rate) = rates.get(&pair.quote) {
                price * *quote_rate
            } else {
                warn!(
                    base = %pair.base,
                    quote = %pair.quote,
                    "no usd rate for derivative quote; dropping base this cycle"
                );
                continue;
            };
            rates.insert(pair.base.clone(), usd_price);
        }

        let published: BTreeMap<String, Decimal> = rates.into_iter().collect();
        self.publisher.publish(published.clone(), now);
        let wire = exchange_rates_string(&published);
        debug!(rates = published.len(), "published snapshot: {wire}");

        if self.config.enable_voter {
            if let Err(err) = self
                .chain
                .broadcast_tx(next_height, blocks_until_end, wire.clone())
                .await
            {
                warn!("vote broadcast failed: {err}");
            }
            self.previous_prevote = Some(PreVote {
                vote_period: current_period,
                exchange_rates: wire,
            });
        }
        self.previous_vote_period = Some(current_period);
        self.run_healthchecks();
        Ok(())
    }

    /// Concurrent provider fan-out, each call bounded by the configured
    /// timeout. A failing or late provider is dropped for this tick only.
    async fn fetch_provider_prices(&mut self) -> AggregatedProviderPrices {
        let timeout = self.config.provider_timeout;
        let mut tasks = Vec::new();

        for (name, pairs) in self.config.pairs_by_provider() {
            let client = match self.providers.get_or_create(&name, &self.config) {
                Ok(client) => client,
                Err(err) => {
                    warn!(provider = %name, "provider unavailable: {err}");
                    telemetry::provider_failure(&name);
                    continue;
                }
            };
            tasks.push(async move {
                match tokio::time::timeout(timeout, client.get_ticker_prices(&pairs)).await {
                    Ok(Ok(tickers)) => Some((name, tickers)),
                    Ok(Err(err)) => {
                        warn!(provider = %name, "provider query failed: {err}");
                        telemetry::provider_failure(&name);
                        None
                    }
                    Err(_) => {
                        warn!(provider = %name, "provider query timed out after {timeout:?}");
                        telemetry::provider_timeout(&name);
                        None
                    }
                }
            });
        }

        join_all(tasks).await.into_iter().flatten().collect()
    }

    /// Spot bases that must resolve this cycle, minus what actually did.
    /// A non-empty chain whitelist narrows the requirement.
    fn missing_required_bases(
        &self,
        params: &OracleParams,
        rates: &HashMap<String, Decimal>,
    ) -> Vec<String> {
        let mut required: HashSet<String> = self
            .config
            .spot_pairs()
            .iter()
            .map(|pair| pair.base.clone())
            .collect();
        if !params.whitelist.is_empty() {
            let whitelist: HashSet<String> = params
                .whitelist
                .iter()
                .map(|denom| denom.to_uppercase())
                .collect();
            required.retain(|base| whitelist.contains(base));
        }

        let mut missing: Vec<String> = required
            .into_iter()
            .filter(|base| !rates.contains_key(base))
            .collect();
        missing.sort();
        missing
    }

    async fn oracle_params(&mut self, height: i64) -> FeederResult<OracleParams> {
        if let Some((fetched_at, params)) = &self.params_cache {
            if height < fetched_at + PARAMS_CACHE_BLOCKS {
                return Ok(params.clone());
            }
        }
        let params = self.chain.get_params().await?;
        self.params_cache = Some((height, params.clone()));
        Ok(params)
    }

    async fn init_providers(&mut self) {
        for (name, pairs) in self.config.pairs_by_provider() {
            match self.providers.get_or_create(&name, &self.config) {
                Ok(client) => {
                    if let Err(err) = client.subscribe_currency_pairs(&pairs).await {
                        warn!(provider = %name, "pair subscription failed: {err}");
                    }
                }
                Err(err) => warn!(provider = %name, "provider construction failed: {err}"),
            }
        }
    }

    fn prune_history(&self, now: DateTime<Utc>) {
        let Ok(retention) = chrono::Duration::from_std(self.config.max_derivative_period())
        else {
            return;
        };
        if let Err(err) = self.history.prune_older_than(now - retention) {
            warn!("history prune failed: {err}");
        }
    }

    /// Fire-and-forget liveness pings after a successful publish.
    fn run_healthchecks(&self) {
        for healthcheck in &self.config.healthchecks {
            let client = self.http.clone();
            let url = healthcheck.url.clone();
            let timeout = healthcheck.timeout;
            tokio::spawn(async move {
                if let Err(err) = client.get(&url).timeout(timeout).send().await {
                    debug!(url = %url, "healthcheck ping failed: {err}");
                }
            });
        }
    }
}
