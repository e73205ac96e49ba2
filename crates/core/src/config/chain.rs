//! Chain configuration: network, endpoints, contracts and the managed pool.

use alloy::primitives::{address, Address};
use serde::{Deserialize, Serialize};
use std::path::Path;

use anyhow::Context;

use super::ConfigError;
use crate::math::PoolParams;

/// Chain configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Chain details
    pub chain: ChainDetails,
    /// On-chain contracts the bot talks to
    pub contracts: ContractsConfig,
    /// The pool positions are minted into
    pub pool: PoolConfig,
}

/// Chain details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainDetails {
    /// Chain ID
    pub chain_id: u64,
    /// Human-readable name
    pub name: String,
    /// HTTP RPC endpoints in failover order
    pub rpc_endpoints: Vec<String>,
    /// Explorer URL for transaction links
    #[serde(default)]
    pub explorer_url: Option<String>,
}

/// Contract addresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractsConfig {
    /// Chainlink aggregator quoting token0 in token1
    pub oracle: Address,
    /// Nonfungible position manager
    pub position_manager: Address,
}

/// ERC-20 token in the pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
}

/// Pool parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub token0: TokenConfig,
    pub token1: TokenConfig,
    /// Fee tier in hundredths of a bip
    #[serde(default = "default_fee")]
    pub fee: u32,
    #[serde(default = "default_tick_spacing")]
    pub tick_spacing: i32,
}

fn default_fee() -> u32 {
    3000
}

fn default_tick_spacing() -> i32 {
    60
}

impl PoolConfig {
    /// Parameters the math library needs.
    pub fn params(&self) -> PoolParams {
        PoolParams {
            decimals0: self.token0.decimals,
            decimals1: self.token1.decimals,
            tick_spacing: self.tick_spacing,
        }
    }

    /// The pool orders tokens by address. When token0 sorts after token1 the
    /// on-chain ticks are the negation of ours.
    pub fn is_inverted(&self) -> bool {
        self.token0.address > self.token1.address
    }
}

impl ChainConfig {
    /// Load chain config from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading chain config {}", path.display()))?;
        let config: ChainConfig = toml::from_str(&content)
            .with_context(|| format!("parsing chain config {}", path.display()))?;
        Ok(config)
    }

    /// Built-in network by name (`base`, `ethereum`).
    pub fn preset(name: &str) -> Result<Self, ConfigError> {
        match name.trim().to_lowercase().as_str() {
            "base" => Ok(Self::base()),
            "ethereum" | "eth" | "mainnet" => Ok(Self::ethereum()),
            other => Err(ConfigError::UnknownPreset(other.to_string())),
        }
    }

    /// Base mainnet, WETH/USDC 0.3%.
    pub fn base() -> Self {
        Self {
            chain: ChainDetails {
                chain_id: 8453,
                name: "Base".into(),
                rpc_endpoints: vec![
                    "https://mainnet.base.org".into(),
                    "https://base.blockpi.network/v1/rpc/public".into(),
                    "https://rpc.ankr.com/base".into(),
                ],
                explorer_url: Some("https://basescan.org".into()),
            },
            contracts: ContractsConfig {
                oracle: address!("71041dddad3595F9CEd3DcCFBe3D1F4b0a16Bb70"),
                position_manager: address!("03a520b32C04BF3bEEf7BEb72E919cf822Ed34f1"),
            },
            pool: PoolConfig {
                token0: TokenConfig {
                    address: address!("4200000000000000000000000000000000000006"),
                    symbol: "WETH".into(),
                    decimals: 18,
                },
                token1: TokenConfig {
                    address: address!("833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"),
                    symbol: "USDC".into(),
                    decimals: 6,
                },
                fee: default_fee(),
                tick_spacing: default_tick_spacing(),
            },
        }
    }

    /// Ethereum mainnet, WETH/USDC 0.3%.
    pub fn ethereum() -> Self {
        Self {
            chain: ChainDetails {
                chain_id: 1,
                name: "Ethereum".into(),
                rpc_endpoints: vec!["https://rpc.ankr.com/eth".into()],
                explorer_url: Some("https://etherscan.io".into()),
            },
            contracts: ContractsConfig {
                oracle: address!("5f4ec3df9cbd43714fe2740f5e3616155c5b8419"),
                position_manager: address!("C36442b4a4522E871399CD717aBDD847Ab11FE88"),
            },
            pool: PoolConfig {
                token0: TokenConfig {
                    address: address!("C02aaa39b223FE8D0A0e5C4F27eAD9083C756Cc2"),
                    symbol: "WETH".into(),
                    decimals: 18,
                },
                token1: TokenConfig {
                    address: address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
                    symbol: "USDC".into(),
                    decimals: 6,
                },
                fee: default_fee(),
                tick_spacing: default_tick_spacing(),
            },
        }
    }

    /// Expand environment variables in RPC endpoints.
    ///
    /// Endpoints that still reference an unset variable are dropped.
    pub fn expand_env_vars(&mut self) {
        self.chain.rpc_endpoints = self
            .chain
            .rpc_endpoints
            .iter()
            .map(|url| expand_env(url))
            .filter(|url| {
                if url.contains("${") {
                    tracing::warn!(url = %url, "Dropping RPC endpoint with unset variable");
                    false
                } else {
                    true
                }
            })
            .collect();
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chain.rpc_endpoints.is_empty() {
            return Err(ConfigError::NoEndpoints);
        }
        if self.pool.tick_spacing <= 0 {
            return Err(ConfigError::Zero {
                field: "pool.tick_spacing",
            });
        }
        if self.pool.token0.address == self.pool.token1.address {
            return Err(ConfigError::Invalid {
                field: "pool.token1.address",
                reason: "token0 and token1 are the same".into(),
            });
        }
        if self.contracts.oracle == Address::ZERO {
            return Err(ConfigError::Zero {
                field: "contracts.oracle",
            });
        }
        if self.contracts.position_manager == Address::ZERO {
            return Err(ConfigError::Zero {
                field: "contracts.position_manager",
            });
        }
        Ok(())
    }
}

/// Expand ${VAR_NAME} patterns with environment variable values.
///
/// Unset variables are left in place.
pub fn expand_env(s: &str) -> String {
    let Ok(re) = regex_lite::Regex::new(r"\$\{([^}]+)\}") else {
        return s.to_string();
    };
    let mut result = s.to_string();

    for cap in re.captures_iter(s) {
        if let (Some(full_match), Some(var_match)) = (cap.get(0), cap.get(1)) {
            let var_name = var_match.as_str();
            if let Ok(value) = std::env::var(var_name) {
                result = result.replace(full_match.as_str(), &value);
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env() {
        // Use unique var name to avoid conflicts with parallel tests
        std::env::set_var("CHAIN_TEST_VAR", "test_value");
        assert_eq!(expand_env("${CHAIN_TEST_VAR}"), "test_value");
        assert_eq!(expand_env("prefix_${CHAIN_TEST_VAR}_suffix"), "prefix_test_value_suffix");
        assert_eq!(expand_env("no_vars"), "no_vars");
        std::env::remove_var("CHAIN_TEST_VAR");
    }

    #[test]
    fn test_unset_endpoint_is_dropped() {
        let mut config = ChainConfig::base();
        config.chain.rpc_endpoints = vec![
            "https://rpc.example/${CHAIN_TEST_UNSET_KEY}".into(),
            "https://mainnet.base.org".into(),
        ];
        config.expand_env_vars();
        assert_eq!(config.chain.rpc_endpoints, vec!["https://mainnet.base.org"]);
    }

    #[test]
    fn test_presets_are_valid() {
        for name in ["base", "Ethereum"] {
            let config = ChainConfig::preset(name).unwrap();
            assert!(config.validate().is_ok(), "{name}");
            assert_eq!(config.pool.tick_spacing, 60);
            assert_eq!(config.pool.token0.decimals, 18);
            assert_eq!(config.pool.token1.decimals, 6);
        }
        assert_eq!(ChainConfig::base().chain.chain_id, 8453);
        assert_eq!(ChainConfig::ethereum().chain.chain_id, 1);
        assert!(matches!(
            ChainConfig::preset("solana"),
            Err(ConfigError::UnknownPreset(_))
        ));
    }

    #[test]
    fn test_parse_chain_toml() {
        let config: ChainConfig = toml::from_str(
            r#"
            [chain]
            chain_id = 8453
            name = "Base"
            rpc_endpoints = ["https://mainnet.base.org"]

            [contracts]
            oracle = "0x71041dddad3595F9CEd3DcCFBe3D1F4b0a16Bb70"
            position_manager = "0x03a520b32C04BF3bEEf7BEb72E919cf822Ed34f1"

            [pool.token0]
            address = "0x4200000000000000000000000000000000000006"
            symbol = "WETH"
            decimals = 18

            [pool.token1]
            address = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"
            symbol = "USDC"
            decimals = 6
            "#,
        )
        .unwrap();
        assert_eq!(config.pool.fee, 3000);
        assert_eq!(config.pool.tick_spacing, 60);
        assert!(config.validate().is_ok());
        assert_eq!(
            config.contracts.oracle,
            ChainConfig::base().contracts.oracle
        );
    }

    #[test]
    fn test_validation_rejects_empty_endpoints() {
        let mut config = ChainConfig::ethereum();
        config.chain.rpc_endpoints.clear();
        assert_eq!(config.validate(), Err(ConfigError::NoEndpoints));
    }
}
