//! Endpoint pool with health tracking and failover.
//!
//! One [`ConnectionManager`] is shared by every wallet pipeline. It owns an
//! ordered list of ledgers, a current index and per-endpoint health. All
//! chain reads and writes go through [`ConnectionManager::call`], which
//! layers the retry policy on top of failover.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256};
use alloy::rpc::types::TransactionRequest;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::ChainError;
use crate::ledger::{call_request, HttpLedger, Ledger};
use crate::retry::RetryPolicy;

/// Failover knobs.
#[derive(Debug, Clone)]
pub struct FailoverConfig {
    /// Health-check attempts before giving up with `NoHealthyEndpoint`.
    pub max_attempts: u32,
    /// Fixed sleep between failed health checks.
    pub backoff: Duration,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_secs(2),
        }
    }
}

/// A checked-out endpoint.
#[derive(Clone)]
pub struct Connection {
    index: usize,
    url: Arc<str>,
    ledger: Arc<dyn Ledger>,
}

impl Connection {
    /// Position of this endpoint in the pool.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn ledger(&self) -> &dyn Ledger {
        self.ledger.as_ref()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("index", &self.index)
            .field("url", &self.url)
            .finish()
    }
}

struct Endpoint {
    url: Arc<str>,
    ledger: Arc<dyn Ledger>,
}

struct PoolState {
    current: usize,
    healthy: Vec<bool>,
}

/// Shared RPC endpoint pool.
pub struct ConnectionManager {
    endpoints: Vec<Endpoint>,
    state: Mutex<PoolState>,
    failover: FailoverConfig,
    retry: RetryPolicy,
}

impl ConnectionManager {
    /// Build a pool over already-constructed ledgers, in priority order.
    pub fn new(
        endpoints: Vec<(String, Arc<dyn Ledger>)>,
        failover: FailoverConfig,
        retry: RetryPolicy,
    ) -> Result<Self, ChainError> {
        if endpoints.is_empty() {
            return Err(ChainError::NoHealthyEndpoint { attempts: 0 });
        }
        let count = endpoints.len();
        let endpoints = endpoints
            .into_iter()
            .map(|(url, ledger)| Endpoint {
                url: Arc::from(url),
                ledger,
            })
            .collect();

        Ok(Self {
            endpoints,
            state: Mutex::new(PoolState {
                current: 0,
                healthy: vec![true; count],
            }),
            failover,
            retry,
        })
    }

    /// Build a pool of HTTP ledgers from endpoint URLs.
    pub fn from_urls(
        urls: &[String],
        call_timeout: Duration,
        failover: FailoverConfig,
        retry: RetryPolicy,
    ) -> Result<Self, ChainError> {
        let mut endpoints = Vec::with_capacity(urls.len());
        for url in urls {
            let ledger: Arc<dyn Ledger> = Arc::new(HttpLedger::new(url, call_timeout)?);
            endpoints.push((url.clone(), ledger));
        }
        info!(
            endpoints = endpoints.len(),
            failover_attempts = failover.max_attempts,
            retry_attempts = retry.max_attempts,
            "Connection manager initialized"
        );
        Self::new(endpoints, failover, retry)
    }

    /// Health flags in pool order.
    pub fn health(&self) -> Vec<bool> {
        self.state.lock().healthy.clone()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn current(&self) -> Connection {
        let index = self.state.lock().current;
        self.connection_at(index)
    }

    fn connection_at(&self, index: usize) -> Connection {
        let endpoint = &self.endpoints[index];
        Connection {
            index,
            url: endpoint.url.clone(),
            ledger: endpoint.ledger.clone(),
        }
    }

    /// Mark `index` unhealthy and advance past it.
    ///
    /// Only advances when `index` is still current, so concurrent pipelines
    /// reporting the same dead endpoint do not skip a healthy one.
    fn report_failure(&self, index: usize) {
        let mut state = self.state.lock();
        state.healthy[index] = false;
        if state.current == index {
            state.current = (index + 1) % self.endpoints.len();
        }
    }

    fn report_success(&self, index: usize) {
        self.state.lock().healthy[index] = true;
    }

    /// Health-check the current endpoint, failing over until one answers.
    pub async fn acquire_connection(&self) -> Result<Connection, ChainError> {
        let limit = self.failover.max_attempts.max(1);

        for attempt in 1..=limit {
            let conn = self.current();
            match conn.ledger.block_number().await {
                Ok(block) => {
                    self.report_success(conn.index);
                    debug!(
                        endpoint = conn.url(),
                        block = block,
                        attempt = attempt,
                        "Endpoint healthy"
                    );
                    return Ok(conn);
                }
                Err(e) => {
                    warn!(
                        endpoint = conn.url(),
                        attempt = attempt,
                        max_attempts = limit,
                        error = %e,
                        "Endpoint health check failed, failing over"
                    );
                    self.report_failure(conn.index);
                    if attempt < limit && !self.failover.backoff.is_zero() {
                        tokio::time::sleep(self.failover.backoff).await;
                    }
                }
            }
        }

        error!(attempts = limit, "No healthy RPC endpoint");
        Err(ChainError::NoHealthyEndpoint { attempts: limit })
    }

    /// Current endpoint if it is believed healthy, otherwise fail over.
    async fn connection(&self) -> Result<Connection, ChainError> {
        let conn = {
            let state = self.state.lock();
            state.healthy[state.current].then_some(state.current)
        };
        match conn {
            Some(index) => Ok(self.connection_at(index)),
            None => self.acquire_connection().await,
        }
    }

    /// Run `op` against a connection under the default retry predicate.
    pub async fn call<T, F, Fut>(&self, op_name: &str, op: F) -> Result<T, ChainError>
    where
        F: Fn(Connection) -> Fut,
        Fut: Future<Output = Result<T, ChainError>>,
    {
        self.call_if(op_name, ChainError::is_retryable, op).await
    }

    /// Run `op` against a connection, retrying errors accepted by `retry_if`.
    ///
    /// Endpoint faults (transport, timeout, throttling) mark the endpoint
    /// unhealthy so the next attempt lands on the next one.
    pub async fn call_if<T, F, Fut, P>(
        &self,
        op_name: &str,
        retry_if: P,
        op: F,
    ) -> Result<T, ChainError>
    where
        F: Fn(Connection) -> Fut,
        Fut: Future<Output = Result<T, ChainError>>,
        P: Fn(&ChainError) -> bool,
    {
        let op = &op;
        self.retry
            .run_if(op_name, retry_if, move |_attempt| async move {
                let conn = self.connection().await?;
                let index = conn.index;
                match op(conn).await {
                    Err(err) if err.is_endpoint_fault() => {
                        self.report_failure(index);
                        Err(err)
                    }
                    other => other,
                }
            })
            .await
    }

    // ─── Typed wrappers ───

    pub async fn block_number(&self) -> Result<u64, ChainError> {
        self.call("block_number", |c| async move { c.ledger().block_number().await })
            .await
    }

    pub async fn chain_id(&self) -> Result<u64, ChainError> {
        self.call("chain_id", |c| async move { c.ledger().chain_id().await })
            .await
    }

    pub async fn gas_price(&self) -> Result<u128, ChainError> {
        self.call("gas_price", |c| async move { c.ledger().gas_price().await })
            .await
    }

    pub async fn pending_nonce(&self, address: Address) -> Result<u64, ChainError> {
        self.call("pending_nonce", |c| async move {
            c.ledger().transaction_count(address).await
        })
        .await
    }

    pub async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64, ChainError> {
        self.call("estimate_gas", |c| async move { c.ledger().estimate_gas(tx).await })
            .await
    }

    /// `eth_call` against `to` with raw calldata.
    pub async fn read_call(&self, to: Address, calldata: Bytes) -> Result<Bytes, ChainError> {
        let tx = call_request(to, calldata);
        let tx = &tx;
        self.call("read_call", |c| async move { c.ledger().call(tx).await })
            .await
    }

    /// Submit a signed transaction.
    ///
    /// Only endpoint faults are retried here. Nonce and fee rejections are
    /// returned to the signer, which owns the nonce and re-signs.
    pub async fn send_raw(&self, raw: &[u8]) -> Result<B256, ChainError> {
        self.call_if("send_raw_transaction", ChainError::is_endpoint_fault, |c| async move {
            c.ledger().send_raw_transaction(raw).await
        })
        .await
    }

    /// Fail unless the connected chain reports `expected`.
    pub async fn verify_chain(&self, expected: u64) -> Result<(), ChainError> {
        let actual = self.chain_id().await?;
        if actual != expected {
            error!(expected = expected, actual = actual, "Connected to wrong chain");
            return Err(ChainError::UnsupportedChain { expected, actual });
        }
        info!(chain_id = actual, "Chain id verified");
        Ok(())
    }
}
