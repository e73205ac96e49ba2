//! Chainlink aggregator reader.

use std::sync::Arc;

use alloy::primitives::{Address, I256, U256};
use alloy::sol;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use tracing::{debug, warn};

use super::{OraclePrice, PriceOracle, DEFAULT_ORACLE_DECIMALS};
use crate::error::ChainError;
use crate::provider::ConnectionManager;

sol! {
    /// Legacy aggregator surface: `latestAnswer` is all the bot needs.
    interface IAggregator {
        function latestAnswer() external view returns (int256);
        function decimals() external view returns (uint8);
    }
}

/// Chainlink price feed.
#[derive(Clone)]
pub struct ChainlinkOracle {
    aggregator: Address,
    decimals: u8,
    connections: Arc<ConnectionManager>,
}

impl std::fmt::Debug for ChainlinkOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainlinkOracle")
            .field("aggregator", &self.aggregator)
            .field("decimals", &self.decimals)
            .finish()
    }
}

impl ChainlinkOracle {
    /// Create an oracle with known precision.
    pub fn new(aggregator: Address, decimals: u8, connections: Arc<ConnectionManager>) -> Self {
        Self {
            aggregator,
            decimals,
            connections,
        }
    }

    /// Create an oracle, reading precision from the feed.
    ///
    /// Falls back to 8 decimals when the feed does not expose `decimals()`.
    pub async fn connect(
        aggregator: Address,
        connections: Arc<ConnectionManager>,
    ) -> Result<Self, ChainError> {
        let calldata = IAggregator::decimalsCall {}.abi_encode();
        let decimals = match connections.read_call(aggregator, calldata.into()).await {
            Ok(bytes) => IAggregator::decimalsCall::abi_decode_returns(&bytes, true)?._0,
            Err(e) if !e.is_retryable() => {
                warn!(
                    aggregator = %aggregator,
                    error = %e,
                    "decimals() unavailable, assuming {}",
                    DEFAULT_ORACLE_DECIMALS
                );
                DEFAULT_ORACLE_DECIMALS
            }
            Err(e) => return Err(e),
        };
        debug!(aggregator = %aggregator, decimals = decimals, "Oracle connected");
        Ok(Self::new(aggregator, decimals, connections))
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    fn to_price(&self, answer: I256) -> Result<OraclePrice, ChainError> {
        if answer <= I256::ZERO {
            return Err(ChainError::OracleRead(format!(
                "non-positive answer {answer} from {}",
                self.aggregator
            )));
        }
        // Two's complement: positive values share the unsigned bit pattern.
        OraclePrice::from_raw(U256::from_limbs(answer.into_raw().into_limbs()), self.decimals)
    }
}

#[async_trait]
impl PriceOracle for ChainlinkOracle {
    fn address(&self) -> Address {
        self.aggregator
    }

    async fn get_price(&self) -> Result<OraclePrice, ChainError> {
        let calldata = IAggregator::latestAnswerCall {}.abi_encode();
        let bytes = self
            .connections
            .read_call(self.aggregator, calldata.into())
            .await?;
        let answer = IAggregator::latestAnswerCall::abi_decode_returns(&bytes, true)?._0;
        let price = self.to_price(answer)?;
        debug!(
            aggregator = %self.aggregator,
            answer = %price.answer,
            price = price.price,
            "Oracle price read"
        );
        Ok(price)
    }
}
