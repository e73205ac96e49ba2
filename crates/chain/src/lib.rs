//! Rebalancer chain interaction layer.
//!
//! This crate provides:
//! - The `Ledger` JSON-RPC boundary and its alloy HTTP implementation
//! - Endpoint pool with health checks and failover
//! - Generic retry policy over typed chain errors
//! - Wallet key loading (plain or AES-encrypted files)
//! - Chainlink oracle reader
//! - Position manager and ERC-20 bindings
//! - Transaction signing and sending with nonce tracking
//!
//! Uses legacy gas pricing with a configurable multiplier.

mod contracts;
mod error;
pub mod gas;
pub mod keystore;
mod ledger;
pub mod oracle;
mod position_manager;
mod provider;
mod retry;
mod signer;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use contracts::{
    encode_approve, encode_collect_all, encode_decrease_liquidity, encode_mint, IERC20,
    INonfungiblePositionManager, MintRequest,
};
pub use error::ChainError;
pub use gas::{GasParams, GasPolicy};
pub use keystore::{
    classify_credential, decrypt_key, load_wallets, load_wallets_with_attempts, Credential,
    FileFormat, KeyHandle, KeyStoreError, PassphraseProvider, Wallet,
    DEFAULT_PASSPHRASE_ATTEMPTS,
};
pub use ledger::{call_request, HttpLedger, Ledger, DEFAULT_CALL_TIMEOUT};
pub use oracle::{ChainlinkOracle, OraclePrice, PriceOracle, DEFAULT_ORACLE_DECIMALS};
pub use position_manager::{PositionManagerClient, PositionSnapshot};
pub use provider::{Connection, ConnectionManager, FailoverConfig};
pub use retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};
pub use signer::{NonceTracker, SentTransaction, TransactionSender};
