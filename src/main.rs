//! Concentrated-liquidity rebalancer.
//!
//! Keeps Uniswap V3 style positions centred on the oracle price for every
//! wallet in a credential file:
//! - Endpoint failover with typed retry
//! - Plain or AES-encrypted wallet files
//! - Chainlink price polling with hysteresis rebalancing
//! - Collect, withdraw and re-mint lifecycle per wallet

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use zeroize::Zeroizing;

use rebalancer_chain::{
    load_wallets, ChainlinkOracle, ConnectionManager, KeyStoreError, PassphraseProvider,
    PositionManagerClient, TransactionSender,
};
use rebalancer_core::{
    BotConfig, ChainConfig, Orchestrator, Scheduler, SchedulerConfig, WalletState,
};

/// Environment variable names.
mod env {
    pub const BOT_CONFIG: &str = "BOT_CONFIG";
    pub const CHAIN_CONFIG: &str = "CHAIN_CONFIG";
    pub const CHAIN: &str = "CHAIN";
    pub const WALLETS_FILE: &str = "WALLETS_FILE";
    pub const WALLET_PASSPHRASE: &str = "WALLET_PASSPHRASE";
    pub const LOG_FORMAT: &str = "LOG_FORMAT";
}

const DEFAULT_CHAIN: &str = "base";
const DEFAULT_WALLETS_FILE: &str = "wallets.txt";

#[tokio::main]
async fn main() -> Result<()> {
    // Print startup banner
    print_banner();

    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    let bot_config = load_bot_config()?;
    bot_config.log_config();

    let chain_config = load_chain_config()?;
    info!(
        chain = %chain_config.chain.name,
        chain_id = chain_config.chain.chain_id,
        endpoints = chain_config.chain.rpc_endpoints.len(),
        pair = format!("{}/{}", chain_config.pool.token0.symbol, chain_config.pool.token1.symbol),
        "Chain configuration loaded"
    );

    let wallets_path = std::env::var(env::WALLETS_FILE)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_WALLETS_FILE));
    let wallets = load_wallets(&wallets_path, &EnvOrPrompt)
        .with_context(|| format!("loading wallets from {}", wallets_path.display()))?;
    if wallets.is_empty() {
        anyhow::bail!("No usable wallets in {}", wallets_path.display());
    }
    info!(count = wallets.len(), "Wallets loaded");

    let mut scheduler = initialize_components(&bot_config, &chain_config, wallets).await?;

    info!("Ensuring token approvals...");
    scheduler.prepare().await;

    scheduler.run().await;
    info!("Rebalancer stopped");
    Ok(())
}

fn init_tracing() {
    let json = std::env::var(env::LOG_FORMAT)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let fmt_layer = if json {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("info,rebalancer_core=debug,rebalancer_chain=debug")
            }),
        )
        .init();
}

fn load_bot_config() -> Result<BotConfig> {
    let config = match std::env::var(env::BOT_CONFIG) {
        Ok(path) => BotConfig::from_file(&path)?,
        Err(_) => {
            info!("BOT_CONFIG not set, using defaults");
            BotConfig::default()
        }
    };
    config.validate().context("invalid bot configuration")?;
    Ok(config)
}

fn load_chain_config() -> Result<ChainConfig> {
    let mut config = match std::env::var(env::CHAIN_CONFIG) {
        Ok(path) => ChainConfig::from_file(&path)?,
        Err(_) => {
            let name = std::env::var(env::CHAIN).unwrap_or_else(|_| DEFAULT_CHAIN.to_string());
            ChainConfig::preset(&name)?
        }
    };
    config.expand_env_vars();
    config.validate().context("invalid chain configuration")?;
    Ok(config)
}

async fn initialize_components(
    bot: &BotConfig,
    chain: &ChainConfig,
    wallets: Vec<rebalancer_chain::Wallet>,
) -> Result<Scheduler> {
    info!("Initializing components...");

    // Endpoint pool
    let connections = Arc::new(ConnectionManager::from_urls(
        &chain.chain.rpc_endpoints,
        bot.rpc.call_timeout(),
        bot.rpc.failover(),
        bot.rpc.retry_policy(),
    )?);
    let connection = connections.acquire_connection().await?;
    info!(url = connection.url(), "Connected");

    connections.verify_chain(chain.chain.chain_id).await?;
    info!(chain_id = chain.chain.chain_id, "Chain id verified");

    // Oracle
    let oracle = Arc::new(ChainlinkOracle::connect(chain.contracts.oracle, connections.clone()).await?);
    info!(
        oracle = %chain.contracts.oracle,
        decimals = oracle.decimals(),
        "Oracle initialized"
    );

    // Signing and position manager
    let sender = Arc::new(TransactionSender::new(
        connections.clone(),
        chain.chain.chain_id,
        bot.execution.gas_policy(),
    ));
    let client = Arc::new(PositionManagerClient::new(
        chain.contracts.position_manager,
        connections.clone(),
        sender,
        bot.execution.tx_deadline(),
    ));
    info!(position_manager = %chain.contracts.position_manager, "Position manager initialized");

    let orchestrator = Arc::new(
        Orchestrator::new(client, chain.pool.clone(), bot.strategy.clone())
            .with_explorer(chain.chain.explorer_url.clone()),
    );

    let states = wallets.into_iter().map(WalletState::new).collect();
    let scheduler = Scheduler::new(oracle, orchestrator, states, SchedulerConfig::from_bot(bot)?);

    info!("All components initialized");
    Ok(scheduler)
}

/// Passphrase from `WALLET_PASSPHRASE` on the first attempt, otherwise
/// prompted on stdin.
struct EnvOrPrompt;

impl PassphraseProvider for EnvOrPrompt {
    fn passphrase(&self, attempt: u32) -> Result<Zeroizing<String>, KeyStoreError> {
        if attempt == 1 {
            if let Ok(value) = std::env::var(env::WALLET_PASSPHRASE) {
                return Ok(Zeroizing::new(value));
            }
        } else {
            warn!(attempt = attempt, "Wrong passphrase, asking again");
        }

        let mut stderr = std::io::stderr();
        write!(stderr, "Wallet passphrase (attempt {attempt}): ")
            .and_then(|_| stderr.flush())
            .map_err(|e| KeyStoreError::Passphrase(e.to_string()))?;

        let mut line = Zeroizing::new(String::new());
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|e| KeyStoreError::Passphrase(e.to_string()))?;
        Ok(Zeroizing::new(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

/// Print startup banner.
fn print_banner() {
    println!(r#"
    ╦═╗┌─┐┌┐ ┌─┐┬  ┌─┐┌┐┌┌─┐┌─┐┬─┐
    ╠╦╝├┤ ├┴┐├─┤│  ├─┤││││  ├┤ ├┬┘
    ╩╚═└─┘└─┘┴ ┴┴─┘┴ ┴┘└┘└─┘└─┘┴└─
    Liquidity Rebalancer v0.1.0
    "#);
}
