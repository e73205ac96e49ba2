//! On-chain price oracle reader.
//!
//! Only Chainlink-style aggregators are supported. Reads go through the
//! [`ConnectionManager`](crate::ConnectionManager), so they inherit failover
//! and the retry policy.

mod chainlink;

pub use chainlink::{ChainlinkOracle, IAggregator};

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use std::fmt::Debug;

use crate::error::ChainError;

/// Default Chainlink USD feed precision.
pub const DEFAULT_ORACLE_DECIMALS: u8 = 8;

/// A validated oracle reading.
#[derive(Debug, Clone, PartialEq)]
pub struct OraclePrice {
    /// Raw fixed-point answer (always positive).
    pub answer: U256,
    /// Fixed-point precision of `answer`.
    pub decimals: u8,
    /// `answer / 10^decimals`.
    pub price: f64,
}

impl OraclePrice {
    /// Build from a raw positive answer.
    pub fn from_raw(answer: U256, decimals: u8) -> Result<Self, ChainError> {
        if answer.is_zero() {
            return Err(ChainError::OracleRead("oracle answered zero".into()));
        }
        let scaled: f64 = answer
            .to_string()
            .parse()
            .map_err(|e| ChainError::OracleRead(format!("unrepresentable answer: {e}")))?;
        Ok(Self {
            answer,
            decimals,
            price: scaled / 10_f64.powi(decimals as i32),
        })
    }
}

/// Source of the reference price that drives rebalancing.
#[async_trait]
pub trait PriceOracle: Send + Sync + Debug {
    /// Feed contract address.
    fn address(&self) -> Address;

    /// Latest price. Never a cached or synthetic value.
    async fn get_price(&self) -> Result<OraclePrice, ChainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_scaling() {
        let price = OraclePrice::from_raw(U256::from(300_012_345_678u64), 8).unwrap();
        assert!((price.price - 3000.12345678).abs() < 1e-9);
        assert_eq!(price.decimals, 8);
    }

    #[test]
    fn test_zero_rejected() {
        assert!(matches!(
            OraclePrice::from_raw(U256::ZERO, 8),
            Err(ChainError::OracleRead(_))
        ));
    }
}
