//! Legacy gas pricing.
//!
//! Every lifecycle transaction is priced from `eth_gasPrice` scaled by a
//! configured multiplier and optionally capped, and gets its gas limit from
//! `eth_estimateGas` plus a safety margin.

use alloy::network::TransactionBuilder;
use alloy::rpc::types::TransactionRequest;
use tracing::debug;

/// Gas pricing and limit policy.
#[derive(Debug, Clone)]
pub struct GasPolicy {
    /// Extra gas on top of the estimate, in percent.
    pub limit_margin_pct: u64,
    /// Multiplier applied to the node-reported gas price.
    pub price_multiplier: f64,
    /// Hard cap on the gas price in wei.
    pub max_gas_price: Option<u128>,
}

impl Default for GasPolicy {
    fn default() -> Self {
        Self {
            limit_margin_pct: 20,
            price_multiplier: 1.0,
            max_gas_price: None,
        }
    }
}

/// Gas fields resolved for one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasParams {
    pub gas_limit: u64,
    pub gas_price: u128,
}

impl GasPolicy {
    pub fn new(limit_margin_pct: u64, price_multiplier: f64, max_gas_price: Option<u128>) -> Self {
        Self {
            limit_margin_pct,
            price_multiplier,
            max_gas_price,
        }
    }

    /// Estimate plus margin, saturating.
    pub fn gas_limit(&self, estimate: u64) -> u64 {
        let padded = (estimate as u128) * (100 + self.limit_margin_pct as u128) / 100;
        padded.min(u64::MAX as u128) as u64
    }

    /// Node price times the multiplier, capped when configured.
    pub fn gas_price(&self, node_price: u128) -> u128 {
        let multiplier = if self.price_multiplier.is_finite() && self.price_multiplier > 0.0 {
            self.price_multiplier
        } else {
            1.0
        };
        let scaled = (node_price as f64 * multiplier).round() as u128;
        match self.max_gas_price {
            Some(cap) if scaled > cap => {
                debug!(scaled = scaled, cap = cap, "Gas price capped");
                cap
            }
            _ => scaled,
        }
    }

    pub fn resolve(&self, estimate: u64, node_price: u128) -> GasParams {
        GasParams {
            gas_limit: self.gas_limit(estimate),
            gas_price: self.gas_price(node_price),
        }
    }

    pub fn apply(&self, tx: &mut TransactionRequest, params: GasParams) {
        tx.set_gas_limit(params.gas_limit);
        tx.set_gas_price(params.gas_price);
    }
}
