//! Blockchain collaborator interface.
//!
//! The core only depends on these three signatures; keyring signing and the
//! actual RPC transport live behind them. `LocalChain` is a self-contained
//! implementation for standalone runs and tests: the height advances once
//! per poll and broadcasts are logged instead of submitted.

use crate::error::FeederResult;
use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::debug;

/// On-chain oracle module parameters, cached between refreshes.
#[derive(Debug, Clone)]
pub struct OracleParams {
    /// Blocks per vote window.
    pub vote_period: i64,
    /// Denoms the chain accepts votes for; empty means unrestricted.
    pub whitelist: Vec<String>,
}

impl Default for OracleParams {
    fn default() -> Self {
        Self {
            vote_period: 10,
            whitelist: Vec::new(),
        }
    }
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn get_chain_height(&self) -> FeederResult<i64>;

    async fn get_params(&self) -> FeederResult<OracleParams>;

    /// Submit a signed oracle message carrying the exchange-rates string,
    /// valid for `ttl_blocks` past `next_height`.
    async fn broadcast_tx(&self, next_height: i64, ttl_blocks: i64, msg: String)
        -> FeederResult<()>;
}

/// Chain stand-in for standalone operation (enable_voter off, tests).
pub struct LocalChain {
    height: AtomicI64,
    params: OracleParams,
}

impl LocalChain {
    pub fn new(params: OracleParams) -> Self {
        Self {
            height: AtomicI64::new(0),
            params,
        }
    }
}

impl Default for LocalChain {
    fn default() -> Self {
        Self::new(OracleParams::default())
    }
}

#[async_trait]
impl ChainClient for LocalChain {
    async fn get_chain_height(&self) -> FeederResult<i64> {
        Ok(self.height.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn get_params(&self) -> FeederResult<OracleParams> {
        Ok(self.params.clone())
    }

    async fn broadcast_tx(
        &self,
        next_height: i64,
        ttl_blocks: i64,
        msg: String,
    ) -> FeederResult<()> {
        debug!(next_height, ttl_blocks, "local broadcast: {msg}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_chain_height_advances() {
        let chain = LocalChain::default();
        assert_eq!(chain.get_chain_height().await.unwrap(), 1);
        assert_eq!(chain.get_chain_height().await.unwrap(), 2);
        assert_eq!(chain.get_params().await.unwrap().vote_period, 10);
    }
}
