//! JSON-RPC ledger boundary.
//!
//! Everything the bot needs from a node fits in seven calls. They sit behind
//! the [`Ledger`] trait so the connectivity manager can hold one client per
//! endpoint and tests can swap in an in-memory ledger.

use std::time::Duration;

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use tracing::debug;

use crate::error::ChainError;

/// Default per-request timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Minimal JSON-RPC surface of an EVM node.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Latest block number (`eth_blockNumber`). Doubles as a health check.
    async fn block_number(&self) -> Result<u64, ChainError>;

    /// Chain id (`eth_chainId`).
    async fn chain_id(&self) -> Result<u64, ChainError>;

    /// Current legacy gas price in wei (`eth_gasPrice`).
    async fn gas_price(&self) -> Result<u128, ChainError>;

    /// Pending transaction count for `address` (`eth_getTransactionCount`).
    async fn transaction_count(&self, address: Address) -> Result<u64, ChainError>;

    /// Gas estimate for `tx` (`eth_estimateGas`).
    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64, ChainError>;

    /// Read-only contract call (`eth_call`) at the latest block.
    async fn call(&self, tx: &TransactionRequest) -> Result<Bytes, ChainError>;

    /// Submit a signed, EIP-2718 encoded transaction (`eth_sendRawTransaction`).
    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, ChainError>;
}

/// HTTP ledger backed by an alloy provider.
#[derive(Clone)]
pub struct HttpLedger {
    url: String,
    provider: DynProvider,
    timeout: Duration,
}

impl std::fmt::Debug for HttpLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpLedger")
            .field("url", &self.url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpLedger {
    /// Create a ledger client for `url`. No request is made here.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, ChainError> {
        let parsed = url
            .parse()
            .map_err(|e| ChainError::Transport(format!("invalid RPC url '{url}': {e}")))?;
        let provider = ProviderBuilder::new().on_http(parsed).erased();
        debug!(url = url, timeout_ms = timeout.as_millis() as u64, "HTTP ledger created");
        Ok(Self {
            url: url.to_string(),
            provider,
            timeout,
        })
    }

    async fn timed<T, F>(&self, fut: F) -> Result<T, ChainError>
    where
        F: std::future::Future<Output = Result<T, alloy::transports::TransportError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(ChainError::from),
            Err(_) => Err(ChainError::Timeout(self.timeout.as_millis() as u64)),
        }
    }
}

#[async_trait]
impl Ledger for HttpLedger {
    async fn block_number(&self) -> Result<u64, ChainError> {
        self.timed(self.provider.get_block_number()).await
    }

    async fn chain_id(&self) -> Result<u64, ChainError> {
        self.timed(self.provider.get_chain_id()).await
    }

    async fn gas_price(&self) -> Result<u128, ChainError> {
        self.timed(self.provider.get_gas_price()).await
    }

    async fn transaction_count(&self, address: Address) -> Result<u64, ChainError> {
        self.timed(async {
            self.provider
                .get_transaction_count(address)
                .pending()
                .await
        })
        .await
    }

    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64, ChainError> {
        self.timed(async { self.provider.estimate_gas(tx.clone()).await })
            .await
    }

    async fn call(&self, tx: &TransactionRequest) -> Result<Bytes, ChainError> {
        self.timed(async { self.provider.call(tx.clone()).await })
            .await
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, ChainError> {
        let pending = self
            .timed(async { self.provider.send_raw_transaction(raw).await })
            .await?;
        Ok(*pending.tx_hash())
    }
}

/// Build a read-only call request.
pub fn call_request(to: Address, calldata: impl Into<Bytes>) -> TransactionRequest {
    TransactionRequest::default()
        .with_to(to)
        .with_input(calldata.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_rejected() {
        let err = HttpLedger::new("not a url", DEFAULT_CALL_TIMEOUT).unwrap_err();
        assert!(matches!(err, ChainError::Transport(_)));
    }

    #[test]
    fn test_call_request_shape() {
        let to: Address = "0x5f4ec3df9cbd43714fe2740f5e3616155c5b8419".parse().unwrap();
        let tx = call_request(to, vec![0xde, 0xad]);
        assert_eq!(tx.input.input().map(|b| b.to_vec()), Some(vec![0xde, 0xad]));
    }

    #[tokio::test]
    #[ignore] // Requires network
    async fn test_public_endpoint_block_number() {
        let ledger = HttpLedger::new("https://mainnet.base.org", DEFAULT_CALL_TIMEOUT).unwrap();
        assert!(ledger.block_number().await.unwrap() > 0);
    }
}
