//! Bot runtime configuration.
//!
//! Every field has a default so an empty TOML file (or no file at all) is a
//! valid configuration. Values are immutable for the process lifetime.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use rebalancer_chain::{FailoverConfig, GasPolicy, RetryPolicy};
use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::rebalance::RebalanceThreshold;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default)]
    pub strategy: StrategyConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub rpc: RpcSettings,
}

/// Whether accrued fees are collected before liquidity is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeCollection {
    #[default]
    Collect,
    Skip,
}

/// What to do for a wallet that holds no position NFT at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoPositionPolicy {
    /// Log a warning and leave the wallet alone.
    #[default]
    Skip,
    /// Mint a fresh position around the current price using `deposit`.
    MintDefault,
}

/// How much token0 goes into a new position.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DepositAmount {
    /// Fixed amount of token0, in whole tokens.
    Manual { amount0: f64 },
    /// Everything the wallet holds after withdrawal.
    #[default]
    WalletBalance,
}

/// Range strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Width of a new range in quote units (e.g. USDC per WETH).
    #[serde(default = "default_range_width")]
    pub range_width: f64,

    /// Fraction of the range width that counts as "too close to an edge".
    #[serde(default = "default_threshold")]
    pub rebalance_threshold: f64,

    /// Oracle poll interval (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default)]
    pub fee_collection: FeeCollection,

    #[serde(default)]
    pub no_position: NoPositionPolicy,

    #[serde(default)]
    pub deposit: DepositAmount,
}

fn default_range_width() -> f64 {
    100.0
}
fn default_threshold() -> f64 {
    0.10
}
fn default_poll_interval() -> u64 {
    60
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            range_width: default_range_width(),
            rebalance_threshold: default_threshold(),
            poll_interval_secs: default_poll_interval(),
            fee_collection: FeeCollection::default(),
            no_position: NoPositionPolicy::default(),
            deposit: DepositAmount::default(),
        }
    }
}

impl StrategyConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn threshold(&self) -> Result<RebalanceThreshold, ConfigError> {
        RebalanceThreshold::new(self.rebalance_threshold)
    }
}

/// Transaction execution parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Multiplier applied to `eth_gasPrice`.
    #[serde(default = "default_gas_multiplier")]
    pub gas_price_multiplier: f64,

    /// Extra gas on top of `eth_estimateGas` (percent).
    #[serde(default = "default_gas_margin")]
    pub gas_limit_margin_pct: u64,

    /// Maximum gas price willing to pay (gwei).
    #[serde(default)]
    pub max_gas_price_gwei: Option<f64>,

    /// Wallet pipelines run concurrently. 1 keeps them sequential.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_wallets: usize,

    /// Upper bound on one wallet's lifecycle (seconds).
    #[serde(default = "default_wallet_timeout")]
    pub wallet_timeout_secs: u64,

    /// Deadline passed to position manager calls (seconds from now).
    #[serde(default = "default_tx_deadline")]
    pub tx_deadline_secs: u64,
}

fn default_gas_multiplier() -> f64 {
    1.0
}
fn default_gas_margin() -> u64 {
    20
}
fn default_max_concurrent() -> usize {
    1
}
fn default_wallet_timeout() -> u64 {
    300
}
fn default_tx_deadline() -> u64 {
    600
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            gas_price_multiplier: default_gas_multiplier(),
            gas_limit_margin_pct: default_gas_margin(),
            max_gas_price_gwei: None,
            max_concurrent_wallets: default_max_concurrent(),
            wallet_timeout_secs: default_wallet_timeout(),
            tx_deadline_secs: default_tx_deadline(),
        }
    }
}

impl ExecutionConfig {
    pub fn wallet_timeout(&self) -> Duration {
        Duration::from_secs(self.wallet_timeout_secs)
    }

    pub fn tx_deadline(&self) -> Duration {
        Duration::from_secs(self.tx_deadline_secs)
    }

    pub fn gas_policy(&self) -> GasPolicy {
        GasPolicy::new(
            self.gas_limit_margin_pct,
            self.gas_price_multiplier,
            self.max_gas_price_gwei.map(|gwei| (gwei * 1e9) as u128),
        )
    }
}

/// RPC retry and failover behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcSettings {
    /// Attempts per chain operation, including the first.
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,

    #[serde(default = "default_min_wait")]
    pub retry_min_wait_ms: u64,

    #[serde(default = "default_max_wait")]
    pub retry_max_wait_ms: u64,

    /// Fraction of each delay that may be randomly shaved off.
    #[serde(default = "default_jitter")]
    pub retry_jitter: f64,

    /// Health-check attempts before declaring no endpoint healthy.
    #[serde(default = "default_failover_attempts")]
    pub failover_attempts: u32,

    #[serde(default = "default_failover_backoff")]
    pub failover_backoff_ms: u64,

    /// Per-request timeout (seconds).
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
}

fn default_retry_limit() -> u32 {
    3
}
fn default_min_wait() -> u64 {
    4_000
}
fn default_max_wait() -> u64 {
    11_000
}
fn default_jitter() -> f64 {
    0.2
}
fn default_failover_attempts() -> u32 {
    5
}
fn default_failover_backoff() -> u64 {
    2_000
}
fn default_call_timeout() -> u64 {
    10
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            retry_limit: default_retry_limit(),
            retry_min_wait_ms: default_min_wait(),
            retry_max_wait_ms: default_max_wait(),
            retry_jitter: default_jitter(),
            failover_attempts: default_failover_attempts(),
            failover_backoff_ms: default_failover_backoff(),
            call_timeout_secs: default_call_timeout(),
        }
    }
}

impl RpcSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_limit,
            Duration::from_millis(self.retry_min_wait_ms),
            Duration::from_millis(self.retry_max_wait_ms),
        )
        .with_jitter(self.retry_jitter)
    }

    pub fn failover(&self) -> FailoverConfig {
        FailoverConfig {
            max_attempts: self.failover_attempts,
            backoff: Duration::from_millis(self.failover_backoff_ms),
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

impl BotConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading bot config {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("parsing bot config {}", path.display()))?;
        Ok(config)
    }

    /// Reject values that would make the bot misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.strategy.threshold()?;

        let width = self.strategy.range_width;
        if !width.is_finite() || width <= 0.0 {
            return Err(ConfigError::InvalidRangeWidth(width));
        }
        if self.strategy.poll_interval_secs == 0 {
            return Err(ConfigError::Zero {
                field: "strategy.poll_interval_secs",
            });
        }
        if let DepositAmount::Manual { amount0 } = self.strategy.deposit {
            if !amount0.is_finite() || amount0 <= 0.0 {
                return Err(ConfigError::Invalid {
                    field: "strategy.deposit.amount0",
                    reason: format!("must be positive, got {amount0}"),
                });
            }
        }

        let multiplier = self.execution.gas_price_multiplier;
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "execution.gas_price_multiplier",
                reason: format!("must be positive, got {multiplier}"),
            });
        }
        if self.execution.max_concurrent_wallets == 0 {
            return Err(ConfigError::Zero {
                field: "execution.max_concurrent_wallets",
            });
        }
        if self.execution.wallet_timeout_secs == 0 {
            return Err(ConfigError::Zero {
                field: "execution.wallet_timeout_secs",
            });
        }

        if self.rpc.retry_limit == 0 {
            return Err(ConfigError::Zero {
                field: "rpc.retry_limit",
            });
        }
        if self.rpc.failover_attempts == 0 {
            return Err(ConfigError::Zero {
                field: "rpc.failover_attempts",
            });
        }
        if self.rpc.retry_min_wait_ms > self.rpc.retry_max_wait_ms {
            return Err(ConfigError::Invalid {
                field: "rpc.retry_min_wait_ms",
                reason: "exceeds retry_max_wait_ms".into(),
            });
        }
        Ok(())
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        tracing::info!(
            range_width = self.strategy.range_width,
            threshold = self.strategy.rebalance_threshold,
            poll_interval_secs = self.strategy.poll_interval_secs,
            fee_collection = ?self.strategy.fee_collection,
            no_position = ?self.strategy.no_position,
            deposit = ?self.strategy.deposit,
            "Strategy"
        );
        tracing::info!(
            gas_multiplier = self.execution.gas_price_multiplier,
            gas_margin_pct = self.execution.gas_limit_margin_pct,
            max_concurrent_wallets = self.execution.max_concurrent_wallets,
            wallet_timeout_secs = self.execution.wallet_timeout_secs,
            "Execution"
        );
        tracing::info!(
            retry_limit = self.rpc.retry_limit,
            min_wait_ms = self.rpc.retry_min_wait_ms,
            max_wait_ms = self.rpc.retry_max_wait_ms,
            failover_attempts = self.rpc.failover_attempts,
            "RPC"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = BotConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.strategy.poll_interval_secs, 60);
        assert_eq!(config.rpc.retry_limit, 3);
        assert_eq!(config.execution.max_concurrent_wallets, 1);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: BotConfig = toml::from_str("").unwrap();
        assert_eq!(config.strategy.range_width, 100.0);
        assert_eq!(config.strategy.deposit, DepositAmount::WalletBalance);
    }

    #[test]
    fn test_parse_tagged_variants() {
        let config: BotConfig = toml::from_str(
            r#"
            [strategy]
            rebalance_threshold = 0.2
            fee_collection = "skip"
            no_position = "mint_default"
            deposit = { mode = "manual", amount0 = 0.05 }

            [execution]
            gas_price_multiplier = 1.25
            max_concurrent_wallets = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.strategy.fee_collection, FeeCollection::Skip);
        assert_eq!(config.strategy.no_position, NoPositionPolicy::MintDefault);
        assert_eq!(config.strategy.deposit, DepositAmount::Manual { amount0: 0.05 });
        assert_eq!(config.execution.max_concurrent_wallets, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = BotConfig::default();
        config.strategy.rebalance_threshold = 0.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidThreshold(_))
        ));

        let mut config = BotConfig::default();
        config.strategy.range_width = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRangeWidth(_))
        ));

        let mut config = BotConfig::default();
        config.strategy.poll_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = BotConfig::default();
        config.rpc.retry_min_wait_ms = 20_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_chain_policies_follow_settings() {
        let config = BotConfig::default();
        let retry = config.rpc.retry_policy();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.backoff(1), Duration::from_secs(4));
        assert_eq!(config.execution.gas_policy().limit_margin_pct, 20);
    }

    #[test]
    fn test_serialization_round_trip() {
        let config = BotConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: BotConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.strategy.range_width, config.strategy.range_width);
    }
}
