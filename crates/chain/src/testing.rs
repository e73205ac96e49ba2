//! In-memory ledger for unit tests, here and in dependent crates through
//! the `test-util` feature.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use alloy::consensus::TxEnvelope;
use alloy::eips::eip2718::Decodable2718;
use alloy::primitives::{keccak256, Address, Bytes, B256};
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::ChainError;
use crate::ledger::Ledger;

type CallHandler = Box<dyn Fn(&TransactionRequest) -> Result<Bytes, ChainError> + Send + Sync>;

/// Ledger that answers from memory. The pending nonce advances on every
/// accepted raw transaction.
pub struct MockLedger {
    pub healthy: AtomicBool,
    pub block_calls: AtomicU32,
    pub chain_id: u64,
    pub gas_price: u128,
    pub gas_estimate: u64,
    pub nonce: AtomicU64,
    pub call_handler: Mutex<Option<CallHandler>>,
    pub send_errors: Mutex<VecDeque<ChainError>>,
    /// Rejections keyed by how many sends were accepted before them.
    pub stale_nonce_at: Mutex<Vec<usize>>,
    pub sent: Mutex<Vec<Vec<u8>>>,
}

impl MockLedger {
    pub fn new(chain_id: u64) -> Self {
        Self {
            healthy: AtomicBool::new(true),
            block_calls: AtomicU32::new(0),
            chain_id,
            gas_price: 1_000_000_000,
            gas_estimate: 100_000,
            nonce: AtomicU64::new(0),
            call_handler: Mutex::new(None),
            send_errors: Mutex::new(VecDeque::new()),
            stale_nonce_at: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn unhealthy(chain_id: u64) -> Self {
        let ledger = Self::new(chain_id);
        ledger.healthy.store(false, Ordering::SeqCst);
        ledger
    }

    pub fn on_call<F>(&self, handler: F)
    where
        F: Fn(&TransactionRequest) -> Result<Bytes, ChainError> + Send + Sync + 'static,
    {
        *self.call_handler.lock() = Some(Box::new(handler));
    }

    pub fn fail_next_send(&self, err: ChainError) {
        self.send_errors.lock().push_back(err);
    }

    /// After `accepted` sends, another transaction from the same account
    /// lands first: the chain nonce moves on and the next send is rejected
    /// as too low.
    pub fn race_nonce_after(&self, accepted: usize) {
        self.stale_nonce_at.lock().push(accepted);
    }

    /// Accepted transactions, decoded, in submission order.
    pub fn sent_transactions(&self) -> Vec<TxEnvelope> {
        self.sent
            .lock()
            .iter()
            .filter_map(|raw| TxEnvelope::decode_2718(&mut raw.as_slice()).ok())
            .collect()
    }

    fn check(&self) -> Result<(), ChainError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ChainError::Transport("connection refused".into()))
        }
    }
}

#[async_trait]
impl Ledger for MockLedger {
    async fn block_number(&self) -> Result<u64, ChainError> {
        self.block_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(1_000)
    }

    async fn chain_id(&self) -> Result<u64, ChainError> {
        self.check()?;
        Ok(self.chain_id)
    }

    async fn gas_price(&self) -> Result<u128, ChainError> {
        self.check()?;
        Ok(self.gas_price)
    }

    async fn transaction_count(&self, _address: Address) -> Result<u64, ChainError> {
        self.check()?;
        Ok(self.nonce.load(Ordering::SeqCst))
    }

    async fn estimate_gas(&self, _tx: &TransactionRequest) -> Result<u64, ChainError> {
        self.check()?;
        Ok(self.gas_estimate)
    }

    async fn call(&self, tx: &TransactionRequest) -> Result<Bytes, ChainError> {
        self.check()?;
        match self.call_handler.lock().as_ref() {
            Some(handler) => handler(tx),
            None => Err(ChainError::Reverted("no handler".into())),
        }
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, ChainError> {
        self.check()?;
        if let Some(err) = self.send_errors.lock().pop_front() {
            return Err(err);
        }
        let accepted = self.sent.lock().len();
        {
            let mut races = self.stale_nonce_at.lock();
            if let Some(pos) = races.iter().position(|n| *n == accepted) {
                races.remove(pos);
                self.nonce.fetch_add(1, Ordering::SeqCst);
                return Err(ChainError::NonceRace("nonce too low".into()));
            }
        }
        self.sent.lock().push(raw.to_vec());
        self.nonce.fetch_add(1, Ordering::SeqCst);
        Ok(keccak256(raw))
    }
}
