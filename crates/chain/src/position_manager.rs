//! Position manager client.
//!
//! Reads go through the connection pool as raw `eth_call`s; writes are
//! encoded here and handed to the [`TransactionSender`]. Nothing is cached:
//! every lifecycle run starts from a fresh on-chain read.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use alloy::primitives::{Address, U256};
use alloy::sol_types::SolCall;
use tracing::{debug, info};

use crate::contracts::{
    encode_approve, encode_collect_all, encode_decrease_liquidity, encode_mint, IERC20,
    INonfungiblePositionManager, MintRequest,
};
use crate::error::ChainError;
use crate::keystore::Wallet;
use crate::provider::ConnectionManager;
use crate::signer::{NonceTracker, SentTransaction, TransactionSender};

/// Allowances at or above this are treated as unlimited.
const UNLIMITED_ALLOWANCE_FLOOR: U256 = U256::from_limbs([0, 0, 0, 1 << 63]);

/// On-chain state of one position NFT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionSnapshot {
    pub token_id: U256,
    pub token0: Address,
    pub token1: Address,
    pub fee: u32,
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub liquidity: u128,
    pub tokens_owed0: u128,
    pub tokens_owed1: u128,
}

impl PositionSnapshot {
    /// Whether `collect` would transfer anything.
    pub fn has_owed_tokens(&self) -> bool {
        self.tokens_owed0 > 0 || self.tokens_owed1 > 0
    }
}

/// Client for a NonfungiblePositionManager deployment.
pub struct PositionManagerClient {
    address: Address,
    connections: Arc<ConnectionManager>,
    sender: Arc<TransactionSender>,
    deadline: Duration,
}

impl std::fmt::Debug for PositionManagerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionManagerClient")
            .field("address", &self.address)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl PositionManagerClient {
    pub fn new(
        address: Address,
        connections: Arc<ConnectionManager>,
        sender: Arc<TransactionSender>,
        deadline: Duration,
    ) -> Self {
        Self {
            address,
            connections,
            sender,
            deadline,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    async fn read<C: SolCall>(&self, to: Address, call: C) -> Result<C::Return, ChainError> {
        let bytes = self
            .connections
            .read_call(to, call.abi_encode().into())
            .await?;
        Ok(C::abi_decode_returns(&bytes, true)?)
    }

    fn deadline_ts(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
            + self.deadline.as_secs()
    }

    /// Number of position NFTs held by `owner`.
    pub async fn position_count(&self, owner: Address) -> Result<U256, ChainError> {
        Ok(self
            .read(
                self.address,
                INonfungiblePositionManager::balanceOfCall { owner },
            )
            .await?
            ._0)
    }

    /// Snapshot of a single position.
    pub async fn position(&self, token_id: U256) -> Result<PositionSnapshot, ChainError> {
        let p = self
            .read(
                self.address,
                INonfungiblePositionManager::positionsCall { tokenId: token_id },
            )
            .await?;
        Ok(PositionSnapshot {
            token_id,
            token0: p.token0,
            token1: p.token1,
            fee: p.fee.to::<u32>(),
            tick_lower: i32::try_from(p.tickLower)
                .map_err(|e| ChainError::Decode(format!("tickLower: {e}")))?,
            tick_upper: i32::try_from(p.tickUpper)
                .map_err(|e| ChainError::Decode(format!("tickUpper: {e}")))?,
            liquidity: p.liquidity,
            tokens_owed0: p.tokensOwed0,
            tokens_owed1: p.tokensOwed1,
        })
    }

    /// Most recently minted position of `owner` (highest enumeration index).
    pub async fn latest_position(
        &self,
        owner: Address,
    ) -> Result<Option<PositionSnapshot>, ChainError> {
        let count = self.position_count(owner).await?;
        if count.is_zero() {
            debug!(wallet = %owner, "No position NFTs");
            return Ok(None);
        }
        let token_id = self
            .read(
                self.address,
                INonfungiblePositionManager::tokenOfOwnerByIndexCall {
                    owner,
                    index: count - U256::from(1u8),
                },
            )
            .await?
            ._0;
        let snapshot = self.position(token_id).await?;
        debug!(
            wallet = %owner,
            token_id = %token_id,
            liquidity = snapshot.liquidity,
            tick_lower = snapshot.tick_lower,
            tick_upper = snapshot.tick_upper,
            "Latest position read"
        );
        Ok(Some(snapshot))
    }

    pub async fn token_balance(&self, token: Address, owner: Address) -> Result<U256, ChainError> {
        Ok(self
            .read(token, IERC20::balanceOfCall { account: owner })
            .await?
            ._0)
    }

    pub async fn allowance(&self, token: Address, owner: Address) -> Result<U256, ChainError> {
        Ok(self
            .read(
                token,
                IERC20::allowanceCall {
                    owner,
                    spender: self.address,
                },
            )
            .await?
            ._0)
    }

    /// Approve the position manager for `U256::MAX` unless already unlimited.
    pub async fn ensure_approval(
        &self,
        wallet: &Wallet,
        nonces: &NonceTracker,
        token: Address,
    ) -> Result<Option<SentTransaction>, ChainError> {
        let current = self.allowance(token, wallet.address).await?;
        if current >= UNLIMITED_ALLOWANCE_FLOOR {
            debug!(wallet = %wallet.address, token = %token, "Allowance already unlimited");
            return Ok(None);
        }
        info!(wallet = %wallet.address, token = %token, "Approving position manager");
        let sent = self
            .sender
            .send(
                wallet,
                nonces,
                token,
                encode_approve(self.address, U256::MAX),
                "approve",
            )
            .await?;
        Ok(Some(sent))
    }

    /// Collect all owed tokens (fees, or principal after a decrease).
    pub async fn collect(
        &self,
        wallet: &Wallet,
        nonces: &NonceTracker,
        token_id: U256,
    ) -> Result<SentTransaction, ChainError> {
        self.sender
            .send(
                wallet,
                nonces,
                self.address,
                encode_collect_all(token_id, wallet.address),
                "collect",
            )
            .await
    }

    pub async fn decrease_liquidity(
        &self,
        wallet: &Wallet,
        nonces: &NonceTracker,
        token_id: U256,
        liquidity: u128,
    ) -> Result<SentTransaction, ChainError> {
        self.sender
            .send(
                wallet,
                nonces,
                self.address,
                encode_decrease_liquidity(token_id, liquidity, self.deadline_ts()),
                "decrease_liquidity",
            )
            .await
    }

    /// Mint a new position. `request.recipient` and `request.deadline` are
    /// overwritten with the wallet address and the configured deadline.
    pub async fn mint(
        &self,
        wallet: &Wallet,
        nonces: &NonceTracker,
        mut request: MintRequest,
    ) -> Result<SentTransaction, ChainError> {
        request.recipient = wallet.address;
        request.deadline = self.deadline_ts();
        let calldata = encode_mint(&request)?;
        self.sender
            .send(wallet, nonces, self.address, calldata, "mint")
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gas::GasPolicy;
    use crate::ledger::Ledger;
    use crate::provider::FailoverConfig;
    use crate::retry::RetryPolicy;
    use crate::testing::MockLedger;
    use alloy::primitives::aliases::{I24, U24};
    use alloy::primitives::{aliases::U96, Bytes};

    const PM: Address = Address::repeat_byte(0xAA);

    fn client(ledger: Arc<MockLedger>) -> PositionManagerClient {
        let connections = Arc::new(
            ConnectionManager::new(
                vec![("mock".to_string(), ledger as Arc<dyn Ledger>)],
                FailoverConfig {
                    max_attempts: 1,
                    backoff: Duration::ZERO,
                },
                RetryPolicy::immediate(2),
            )
            .unwrap(),
        );
        let sender = Arc::new(TransactionSender::new(
            connections.clone(),
            1,
            GasPolicy::default(),
        ));
        PositionManagerClient::new(PM, connections, sender, Duration::from_secs(600))
    }

    fn position_return(liquidity: u128) -> Bytes {
        INonfungiblePositionManager::positionsCall::abi_encode_returns(&(
            U96::ZERO,
            Address::ZERO,
            Address::repeat_byte(1),
            Address::repeat_byte(2),
            U24::from(3000u32),
            I24::try_from(-600).unwrap(),
            I24::try_from(600).unwrap(),
            liquidity,
            U256::ZERO,
            U256::ZERO,
            5u128,
            0u128,
        ))
        .into()
    }

    #[tokio::test]
    async fn test_latest_position_uses_highest_index() {
        let ledger = Arc::new(MockLedger::new(1));
        ledger.on_call(|tx| {
            let input = tx.input.input().cloned().unwrap_or_default();
            if input.starts_with(&INonfungiblePositionManager::balanceOfCall::SELECTOR) {
                Ok(INonfungiblePositionManager::balanceOfCall::abi_encode_returns(&(
                    U256::from(3u8),
                ))
                .into())
            } else if input
                .starts_with(&INonfungiblePositionManager::tokenOfOwnerByIndexCall::SELECTOR)
            {
                let call =
                    INonfungiblePositionManager::tokenOfOwnerByIndexCall::abi_decode(&input, true)
                        .unwrap();
                // Token id = 100 + index.
                Ok(INonfungiblePositionManager::tokenOfOwnerByIndexCall::abi_encode_returns(&(
                    U256::from(100u8) + call.index,
                ))
                .into())
            } else if input.starts_with(&INonfungiblePositionManager::positionsCall::SELECTOR) {
                Ok(position_return(77))
            } else {
                Err(ChainError::Reverted("unexpected".into()))
            }
        });

        let snapshot = client(ledger)
            .latest_position(Address::repeat_byte(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.token_id, U256::from(102u8));
        assert_eq!(snapshot.liquidity, 77);
        assert_eq!((snapshot.tick_lower, snapshot.tick_upper), (-600, 600));
        assert_eq!(snapshot.fee, 3000);
        assert!(snapshot.has_owed_tokens());
    }

    #[tokio::test]
    async fn test_no_nft_is_none() {
        let ledger = Arc::new(MockLedger::new(1));
        ledger.on_call(|_| {
            Ok(INonfungiblePositionManager::balanceOfCall::abi_encode_returns(&(U256::ZERO,)).into())
        });
        let result = client(ledger)
            .latest_position(Address::repeat_byte(5))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_unlimited_allowance_skips_approve() {
        let ledger = Arc::new(MockLedger::new(1));
        ledger.on_call(|_| Ok(IERC20::allowanceCall::abi_encode_returns(&(U256::MAX,)).into()));
        let wallet =
            Wallet::from_hex("ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80")
                .unwrap();
        let sent = client(ledger.clone())
            .ensure_approval(&wallet, &NonceTracker::default(), Address::repeat_byte(1))
            .await
            .unwrap();
        assert!(sent.is_none());
        assert!(ledger.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_zero_allowance_sends_approve() {
        let ledger = Arc::new(MockLedger::new(1));
        ledger.on_call(|_| Ok(IERC20::allowanceCall::abi_encode_returns(&(U256::ZERO,)).into()));
        let wallet =
            Wallet::from_hex("ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80")
                .unwrap();
        let sent = client(ledger.clone())
            .ensure_approval(&wallet, &NonceTracker::default(), Address::repeat_byte(1))
            .await
            .unwrap();
        assert!(sent.is_some());
        assert_eq!(ledger.sent.lock().len(), 1);
    }
}
