//! Configuration for the rebalancer.
//!
//! This module provides:
//! - Bot runtime configuration (strategy, execution, RPC behaviour)
//! - Chain configuration (endpoints, contracts, pool tokens)
//! - Built-in presets for the supported networks

mod bot;
mod chain;

use thiserror::Error;

pub use bot::{
    BotConfig, DepositAmount, ExecutionConfig, FeeCollection, NoPositionPolicy, RpcSettings,
    StrategyConfig,
};
pub use chain::{expand_env, ChainConfig, ChainDetails, ContractsConfig, PoolConfig, TokenConfig};

/// Invalid configuration values, reported before anything touches the chain.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("rebalance threshold must be finite and in [0, 0.5), got {0}")]
    InvalidThreshold(f64),

    #[error("range width must be positive and finite, got {0}")]
    InvalidRangeWidth(f64),

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("no RPC endpoints configured")]
    NoEndpoints,

    #[error("unknown chain preset '{0}' (expected base or ethereum)")]
    UnknownPreset(String),
}
