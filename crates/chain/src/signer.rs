//! Transaction signing and submission.
//!
//! Each submission attempt re-reads the pending nonce, estimates gas, prices
//! it, signs locally with a short-lived signer and broadcasts the raw bytes
//! through the connection pool. Receipts are not awaited: the lifecycle only
//! needs the hash before moving on to the next step.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, B256};
use alloy::rpc::types::TransactionRequest;
use tracing::{debug, info, warn};

use crate::error::ChainError;
use crate::gas::GasPolicy;
use crate::keystore::Wallet;
use crate::provider::ConnectionManager;

/// Gas price bump per account-level retry, in percent.
const UNDERPRICED_BUMP_PCT: u128 = 10;

/// Local view of a wallet's next nonce.
///
/// The nonce actually used is `max(chain_pending, local_next)`, so a node
/// that lags behind our own submissions cannot hand back a stale value.
#[derive(Debug, Default)]
pub struct NonceTracker {
    next: AtomicU64,
}

impl NonceTracker {
    pub fn new(initial: u64) -> Self {
        Self {
            next: AtomicU64::new(initial),
        }
    }

    /// Nonce to use given the chain's pending count.
    pub fn resolve(&self, chain_pending: u64) -> u64 {
        chain_pending.max(self.next.load(Ordering::SeqCst))
    }

    /// Record that `nonce` was accepted by the node.
    pub fn confirm(&self, nonce: u64) {
        self.next.fetch_max(nonce + 1, Ordering::SeqCst);
    }

    /// Next nonce we would use without asking the chain.
    pub fn current(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }
}

/// Outcome of one accepted submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentTransaction {
    pub hash: B256,
    pub nonce: u64,
    pub gas_limit: u64,
    pub gas_price: u128,
}

/// Signs and submits transactions for any loaded wallet.
pub struct TransactionSender {
    connections: Arc<ConnectionManager>,
    chain_id: u64,
    gas: GasPolicy,
}

impl std::fmt::Debug for TransactionSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionSender")
            .field("chain_id", &self.chain_id)
            .field("gas", &self.gas)
            .finish_non_exhaustive()
    }
}

fn is_account_retryable(err: &ChainError) -> bool {
    matches!(err, ChainError::NonceRace(_) | ChainError::Underpriced(_))
}

impl TransactionSender {
    pub fn new(connections: Arc<ConnectionManager>, chain_id: u64, gas: GasPolicy) -> Self {
        Self {
            connections,
            chain_id,
            gas,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Sign and broadcast a call to `to` from `wallet`.
    ///
    /// Endpoint faults are retried inside every pool call. Nonce races and
    /// underpriced rejections are retried here, re-reading the nonce and gas
    /// price on each attempt.
    pub async fn send(
        &self,
        wallet: &Wallet,
        nonces: &NonceTracker,
        to: Address,
        calldata: Bytes,
        label: &str,
    ) -> Result<SentTransaction, ChainError> {
        let calldata = &calldata;
        self.connections
            .retry_policy()
            .run_if(label, is_account_retryable, move |attempt| async move {
                self.submit_once(wallet, nonces, to, calldata.clone(), label, attempt)
                    .await
            })
            .await
    }

    async fn submit_once(
        &self,
        wallet: &Wallet,
        nonces: &NonceTracker,
        to: Address,
        calldata: Bytes,
        label: &str,
        attempt: u32,
    ) -> Result<SentTransaction, ChainError> {
        let from = wallet.address;
        let chain_pending = self.connections.pending_nonce(from).await?;
        let nonce = nonces.resolve(chain_pending);

        let mut tx = TransactionRequest::default()
            .with_from(from)
            .with_to(to)
            .with_input(calldata)
            .with_nonce(nonce)
            .with_chain_id(self.chain_id);

        let estimate = self.connections.estimate_gas(&tx).await?;
        let node_price = self.connections.gas_price().await?;
        let mut params = self.gas.resolve(estimate, node_price);
        if attempt > 1 {
            let bump = 100 + UNDERPRICED_BUMP_PCT * (attempt as u128 - 1);
            params.gas_price = params.gas_price * bump / 100;
        }
        self.gas.apply(&mut tx, params);

        debug!(
            wallet = %from,
            op = label,
            nonce = nonce,
            chain_pending = chain_pending,
            gas_limit = params.gas_limit,
            gas_price = params.gas_price,
            attempt = attempt,
            "Signing transaction"
        );

        let signer = wallet
            .key()
            .signer()
            .map_err(|e| ChainError::Signing(e.to_string()))?;
        let envelope = tx
            .build(&EthereumWallet::from(signer))
            .await
            .map_err(|e| ChainError::Signing(e.to_string()))?;
        let local_hash = *envelope.tx_hash();
        let raw = envelope.encoded_2718();

        let hash = match self.connections.send_raw(&raw).await {
            Ok(hash) => hash,
            // A retried broadcast that the node already holds was accepted.
            Err(ChainError::NonceRace(msg)) if msg.to_lowercase().contains("already known") => {
                warn!(wallet = %from, tx_hash = %local_hash, "Node already knows transaction");
                local_hash
            }
            Err(e) => return Err(e),
        };
        nonces.confirm(nonce);

        info!(
            wallet = %from,
            op = label,
            tx_hash = %hash,
            nonce = nonce,
            gas_limit = params.gas_limit,
            gas_price_gwei = params.gas_price as f64 / 1e9,
            "Transaction submitted"
        );

        Ok(SentTransaction {
            hash,
            nonce,
            gas_limit: params.gas_limit,
            gas_price: params.gas_price,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Ledger;
    use crate::provider::FailoverConfig;
    use crate::retry::RetryPolicy;
    use crate::testing::MockLedger;
    use std::time::Duration;

    const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn sender(ledger: Arc<MockLedger>) -> TransactionSender {
        let connections = ConnectionManager::new(
            vec![("mock".to_string(), ledger as Arc<dyn Ledger>)],
            FailoverConfig {
                max_attempts: 1,
                backoff: Duration::ZERO,
            },
            RetryPolicy::immediate(3),
        )
        .unwrap();
        TransactionSender::new(Arc::new(connections), 8453, GasPolicy::default())
    }

    #[test]
    fn test_nonce_tracker_takes_max() {
        let tracker = NonceTracker::new(0);
        assert_eq!(tracker.resolve(5), 5);
        tracker.confirm(5);
        // Lagging node still reports 5; local knows 6 is next.
        assert_eq!(tracker.resolve(5), 6);
        assert_eq!(tracker.resolve(9), 9);
        tracker.confirm(3);
        assert_eq!(tracker.current(), 6);
    }

    #[tokio::test]
    async fn test_send_signs_and_advances_nonce() {
        let ledger = Arc::new(MockLedger::new(8453));
        ledger.nonce.store(7, Ordering::SeqCst);
        let sender = sender(ledger.clone());
        let wallet = Wallet::from_hex(KEY).unwrap();
        let nonces = NonceTracker::default();

        let sent = sender
            .send(&wallet, &nonces, Address::repeat_byte(0x11), Bytes::from(vec![1, 2]), "test")
            .await
            .unwrap();

        assert_eq!(sent.nonce, 7);
        assert_eq!(sent.gas_limit, 120_000);
        assert_eq!(sent.gas_price, 1_000_000_000);
        assert_eq!(nonces.current(), 8);
        assert_eq!(ledger.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_nonce_race_is_retried_with_fresh_nonce() {
        let ledger = Arc::new(MockLedger::new(8453));
        ledger.fail_next_send(ChainError::NonceRace("nonce too low".into()));
        let sender = sender(ledger.clone());
        let wallet = Wallet::from_hex(KEY).unwrap();
        let nonces = NonceTracker::default();

        let sent = sender
            .send(&wallet, &nonces, Address::ZERO, Bytes::new(), "retry")
            .await
            .unwrap();

        assert_eq!(sent.nonce, 0);
        // Second attempt bumps the price.
        assert_eq!(sent.gas_price, 1_100_000_000);
        assert_eq!(ledger.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_already_known_counts_as_accepted() {
        let ledger = Arc::new(MockLedger::new(8453));
        ledger.fail_next_send(ChainError::NonceRace("already known".into()));
        let sender = sender(ledger.clone());
        let wallet = Wallet::from_hex(KEY).unwrap();
        let nonces = NonceTracker::default();

        let sent = sender
            .send(&wallet, &nonces, Address::ZERO, Bytes::new(), "dup")
            .await
            .unwrap();

        assert_eq!(sent.nonce, 0);
        assert_eq!(nonces.current(), 1);
        assert!(ledger.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_insufficient_funds_surfaces() {
        let ledger = Arc::new(MockLedger::new(8453));
        ledger.fail_next_send(ChainError::InsufficientFunds("0 wei".into()));
        let sender = sender(ledger.clone());
        let wallet = Wallet::from_hex(KEY).unwrap();
        let nonces = NonceTracker::default();

        let err = sender
            .send(&wallet, &nonces, Address::ZERO, Bytes::new(), "broke")
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::InsufficientFunds(_)));
        assert_eq!(nonces.current(), 0);
    }
}
