//! Position lifecycle: collect fees, remove liquidity, compute a new range
//! and mint it again.
//!
//! A run walks `Idle -> FeesCollected -> LiquidityRemoved -> RangeComputed
//! -> LiquidityMinted`. Any failure stops the run and reports the last state
//! reached. The wallet's range is only replaced after the mint is accepted,
//! and a failure after withdrawal flags the wallet for redeploy.

use std::fmt;
use std::sync::Arc;

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use rebalancer_chain::{
    ChainError, MintRequest, NonceTracker, PositionManagerClient, PositionSnapshot,
    SentTransaction, Wallet,
};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::{DepositAmount, FeeCollection, NoPositionPolicy, PoolConfig, StrategyConfig};
use crate::math::{
    amount0_for_liquidity, amount1_for_liquidity, calculate_counterpart_amount, raw_sqrt_price,
    sqrt_price_at_tick, MathError,
};
use crate::position::WalletState;
use crate::rebalance::{calculate_new_range, Range};
use crate::u256_math::{from_human, to_human};

/// Share of the estimated principal counted as incoming. The pool price can
/// drift from the oracle before the decrease executes.
const PRINCIPAL_ESTIMATE_MARGIN: f64 = 0.995;

/// Position manager operations the lifecycle needs.
#[async_trait]
pub trait PositionVenue: Send + Sync {
    async fn latest_position(&self, owner: Address)
        -> Result<Option<PositionSnapshot>, ChainError>;

    async fn token_balance(&self, token: Address, owner: Address) -> Result<U256, ChainError>;

    async fn ensure_approval(
        &self,
        wallet: &Wallet,
        nonces: &NonceTracker,
        token: Address,
    ) -> Result<Option<SentTransaction>, ChainError>;

    async fn collect(
        &self,
        wallet: &Wallet,
        nonces: &NonceTracker,
        token_id: U256,
    ) -> Result<SentTransaction, ChainError>;

    async fn decrease_liquidity(
        &self,
        wallet: &Wallet,
        nonces: &NonceTracker,
        token_id: U256,
        liquidity: u128,
    ) -> Result<SentTransaction, ChainError>;

    async fn mint(
        &self,
        wallet: &Wallet,
        nonces: &NonceTracker,
        request: MintRequest,
    ) -> Result<SentTransaction, ChainError>;
}

#[async_trait]
impl PositionVenue for PositionManagerClient {
    async fn latest_position(
        &self,
        owner: Address,
    ) -> Result<Option<PositionSnapshot>, ChainError> {
        PositionManagerClient::latest_position(self, owner).await
    }

    async fn token_balance(&self, token: Address, owner: Address) -> Result<U256, ChainError> {
        PositionManagerClient::token_balance(self, token, owner).await
    }

    async fn ensure_approval(
        &self,
        wallet: &Wallet,
        nonces: &NonceTracker,
        token: Address,
    ) -> Result<Option<SentTransaction>, ChainError> {
        PositionManagerClient::ensure_approval(self, wallet, nonces, token).await
    }

    async fn collect(
        &self,
        wallet: &Wallet,
        nonces: &NonceTracker,
        token_id: U256,
    ) -> Result<SentTransaction, ChainError> {
        PositionManagerClient::collect(self, wallet, nonces, token_id).await
    }

    async fn decrease_liquidity(
        &self,
        wallet: &Wallet,
        nonces: &NonceTracker,
        token_id: U256,
        liquidity: u128,
    ) -> Result<SentTransaction, ChainError> {
        PositionManagerClient::decrease_liquidity(self, wallet, nonces, token_id, liquidity).await
    }

    async fn mint(
        &self,
        wallet: &Wallet,
        nonces: &NonceTracker,
        request: MintRequest,
    ) -> Result<SentTransaction, ChainError> {
        PositionManagerClient::mint(self, wallet, nonces, request).await
    }
}

/// Lifecycle progress for one wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    Idle,
    FeesCollected,
    LiquidityRemoved,
    RangeComputed,
    LiquidityMinted,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::FeesCollected => "fees_collected",
            Self::LiquidityRemoved => "liquidity_removed",
            Self::RangeComputed => "range_computed",
            Self::LiquidityMinted => "liquidity_minted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("insufficient balance: amount0 {amount0}, amount1 {amount1}")]
    InsufficientBalance { amount0: U256, amount1: U256 },

    #[error("range computation failed: {0}")]
    Range(#[from] MathError),

    #[error("{step} failed: {source}")]
    Chain {
        step: &'static str,
        #[source]
        source: ChainError,
    },
}

impl LifecycleError {
    fn chain(step: &'static str) -> impl FnOnce(ChainError) -> Self {
        move |source| Self::Chain { step, source }
    }
}

/// A run that stopped early. `reached` is the last state completed.
#[derive(Debug, Error)]
#[error("lifecycle stopped at {reached}: {error}")]
pub struct LifecycleFailure {
    pub reached: LifecycleState,
    /// Liquidity left the pool during this run (or an earlier one).
    pub withdrawn: bool,
    #[source]
    pub error: LifecycleError,
}

/// What a completed (or skipped) run did.
#[derive(Debug, Clone, Default)]
pub struct LifecycleReport {
    pub token_id: Option<U256>,
    pub fees_tx: Option<B256>,
    pub decrease_tx: Option<B256>,
    pub withdraw_tx: Option<B256>,
    pub mint_tx: Option<B256>,
    pub range: Option<Range>,
    pub amount0: U256,
    pub amount1: U256,
    /// Set when the run did nothing on purpose.
    pub skipped: Option<&'static str>,
}

impl LifecycleReport {
    fn skipped(reason: &'static str) -> Self {
        Self {
            skipped: Some(reason),
            ..Default::default()
        }
    }

    pub fn minted(&self) -> bool {
        self.mint_tx.is_some()
    }
}

/// Tokens a run's collects will move into the wallet. Receipts are not
/// awaited, so a balance read after them may not include these yet.
#[derive(Debug, Clone, Copy)]
struct Incoming {
    before: (U256, U256),
    expected: (U256, U256),
}

/// Tracks where a run got to.
struct Progress {
    reached: LifecycleState,
    withdrawn: bool,
}

impl Progress {
    fn advance(&mut self, state: LifecycleState) {
        debug!(from = %self.reached, to = %state, "Lifecycle step");
        self.reached = state;
    }

    fn fail(&self, error: LifecycleError) -> LifecycleFailure {
        LifecycleFailure {
            reached: self.reached,
            withdrawn: self.withdrawn,
            error,
        }
    }
}

/// Drives the lifecycle for any wallet against one pool.
pub struct Orchestrator {
    venue: Arc<dyn PositionVenue>,
    pool: PoolConfig,
    strategy: StrategyConfig,
    explorer: Option<String>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("pool", &self.pool)
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(venue: Arc<dyn PositionVenue>, pool: PoolConfig, strategy: StrategyConfig) -> Self {
        Self {
            venue,
            pool,
            strategy,
            explorer: None,
        }
    }

    /// Log explorer links for minted positions.
    pub fn with_explorer(mut self, explorer_url: Option<String>) -> Self {
        self.explorer = explorer_url.map(|url| url.trim_end_matches('/').to_string());
        self
    }

    pub fn pool(&self) -> &PoolConfig {
        &self.pool
    }

    fn tx_link(&self, hash: B256) -> Option<String> {
        self.explorer.as_ref().map(|base| format!("{base}/tx/{hash}"))
    }

    /// Max-approve both pool tokens to the position manager.
    pub async fn approve_tokens(&self, state: &WalletState) -> Result<(), LifecycleError> {
        for token in [self.pool.token0.address, self.pool.token1.address] {
            if let Some(sent) = self
                .venue
                .ensure_approval(&state.wallet, &state.nonces, token)
                .await
                .map_err(LifecycleError::chain("approve"))?
            {
                info!(wallet = %state.address(), token = %token, tx_hash = %sent.hash, "Approval submitted");
            }
        }
        Ok(())
    }

    /// Seed an unknown range from the wallet's live position.
    ///
    /// Returns `false` when there is no position with liquidity to adopt.
    pub async fn adopt_position(&self, state: &mut WalletState) -> Result<bool, ChainError> {
        let Some(position) = self.venue.latest_position(state.address()).await? else {
            return Ok(false);
        };
        if position.liquidity == 0 {
            return Ok(false);
        }
        let range = self.range_from_position(&position);
        info!(
            wallet = %state.address(),
            token_id = %position.token_id,
            range = %range,
            "Adopted existing position"
        );
        state.range = Some(range);
        Ok(true)
    }

    /// Run the full lifecycle for one wallet at `price`.
    ///
    /// On success with a mint the wallet's range is replaced. On failure it
    /// is left as it was, and the redeploy flag is raised if liquidity had
    /// already been withdrawn.
    #[instrument(skip(self, state), fields(wallet = %state.address()))]
    pub async fn run(
        &self,
        state: &mut WalletState,
        price: f64,
    ) -> Result<LifecycleReport, LifecycleFailure> {
        match self.execute(state, price).await {
            Ok(report) => {
                if let Some(range) = report.range.filter(|_| report.minted()) {
                    state.record_mint(range);
                }
                Ok(report)
            }
            Err(failure) => {
                state.record_failure(failure.withdrawn);
                warn!(
                    reached = %failure.reached,
                    withdrawn = failure.withdrawn,
                    needs_redeploy = state.needs_redeploy,
                    error = %failure.error,
                    "Lifecycle failed"
                );
                Err(failure)
            }
        }
    }

    async fn execute(
        &self,
        state: &WalletState,
        price: f64,
    ) -> Result<LifecycleReport, LifecycleFailure> {
        let owner = state.address();
        let wallet = &state.wallet;
        let nonces = &state.nonces;
        let mut progress = Progress {
            reached: LifecycleState::Idle,
            withdrawn: state.needs_redeploy,
        };
        let mut report = LifecycleReport::default();

        let position = self
            .venue
            .latest_position(owner)
            .await
            .map_err(|e| progress.fail(LifecycleError::chain("read position")(e)))?;

        // Taken before any transaction so pending collects are not counted twice.
        let before = if position.is_some() {
            Some(self.balances(owner).await.map_err(|e| progress.fail(e))?)
        } else {
            None
        };
        let mut expected = (U256::ZERO, U256::ZERO);

        match position {
            None => match self.strategy.no_position {
                NoPositionPolicy::Skip => {
                    warn!(wallet = %owner, "No position found, skipping wallet");
                    return Ok(LifecycleReport::skipped("no position"));
                }
                NoPositionPolicy::MintDefault => {
                    info!(wallet = %owner, "No position found, minting a new one");
                }
            },
            Some(position) if position.liquidity > 0 => {
                report.token_id = Some(position.token_id);
                expected = self.withdrawal_estimate(&position, price);
                info!(
                    wallet = %owner,
                    token_id = %position.token_id,
                    liquidity = position.liquidity,
                    "Withdrawing position"
                );

                if self.strategy.fee_collection == FeeCollection::Collect {
                    let sent = self
                        .venue
                        .collect(wallet, nonces, position.token_id)
                        .await
                        .map_err(|e| progress.fail(LifecycleError::chain("collect fees")(e)))?;
                    report.fees_tx = Some(sent.hash);
                }
                progress.advance(LifecycleState::FeesCollected);

                let sent = self
                    .venue
                    .decrease_liquidity(wallet, nonces, position.token_id, position.liquidity)
                    .await
                    .map_err(|e| progress.fail(LifecycleError::chain("decrease liquidity")(e)))?;
                report.decrease_tx = Some(sent.hash);
                progress.withdrawn = true;

                // Decreased liquidity is credited as owed tokens.
                let sent = self
                    .venue
                    .collect(wallet, nonces, position.token_id)
                    .await
                    .map_err(|e| progress.fail(LifecycleError::chain("collect principal")(e)))?;
                report.withdraw_tx = Some(sent.hash);
                progress.advance(LifecycleState::LiquidityRemoved);
            }
            Some(position) => {
                // Withdrawn earlier but never re-minted.
                report.token_id = Some(position.token_id);
                progress.withdrawn = true;
                info!(
                    wallet = %owner,
                    token_id = %position.token_id,
                    "Position already empty, skipping decrease"
                );
                if position.has_owed_tokens() {
                    expected = self.withdrawal_estimate(&position, price);
                    let sent = self
                        .venue
                        .collect(wallet, nonces, position.token_id)
                        .await
                        .map_err(|e| progress.fail(LifecycleError::chain("collect owed")(e)))?;
                    report.withdraw_tx = Some(sent.hash);
                }
                progress.advance(LifecycleState::LiquidityRemoved);
            }
        }

        let range = calculate_new_range(price, self.strategy.range_width, &self.pool.params())
            .map_err(|e| progress.fail(e.into()))?;
        report.range = Some(range);
        progress.advance(LifecycleState::RangeComputed);

        let incoming = before.map(|before| Incoming { before, expected });
        let (amount0, amount1) = self
            .deposit_amounts(owner, &range, price, incoming)
            .await
            .map_err(|e| progress.fail(e))?;
        report.amount0 = amount0;
        report.amount1 = amount1;

        info!(
            wallet = %owner,
            price = price,
            range = %range,
            amount0 = to_human(amount0, self.pool.token0.decimals),
            amount1 = to_human(amount1, self.pool.token1.decimals),
            "Minting position"
        );
        let request = self.mint_request(&range, amount0, amount1);
        let sent = self
            .venue
            .mint(wallet, nonces, request)
            .await
            .map_err(|e| progress.fail(LifecycleError::chain("mint")(e)))?;
        report.mint_tx = Some(sent.hash);
        progress.advance(LifecycleState::LiquidityMinted);

        info!(
            wallet = %owner,
            tx_hash = %sent.hash,
            range = %range,
            explorer = self.tx_link(sent.hash).as_deref().unwrap_or("-"),
            "Position rebalanced"
        );
        Ok(report)
    }

    async fn balances(&self, owner: Address) -> Result<(U256, U256), LifecycleError> {
        let balance0 = self
            .venue
            .token_balance(self.pool.token0.address, owner)
            .await
            .map_err(LifecycleError::chain("read balance0"))?;
        let balance1 = self
            .venue
            .token_balance(self.pool.token1.address, owner)
            .await
            .map_err(LifecycleError::chain("read balance1"))?;
        Ok((balance0, balance1))
    }

    /// Tokens `position` releases when fully withdrawn and collected at
    /// `price`, in config token order. Principal is estimated and shaded by
    /// [`PRINCIPAL_ESTIMATE_MARGIN`]; owed tokens are exact.
    fn withdrawal_estimate(&self, position: &PositionSnapshot, price: f64) -> (U256, U256) {
        let sqrt_price = raw_sqrt_price(price, &self.pool.params());
        // On-chain order: the pool quotes the inverse price.
        let sp = if self.pool.is_inverted() {
            sqrt_price.recip()
        } else {
            sqrt_price
        };
        let sa = sqrt_price_at_tick(position.tick_lower);
        let sb = sqrt_price_at_tick(position.tick_upper);
        let liquidity = position.liquidity as f64;

        let principal0 = amount0_for_liquidity(liquidity, sp, sa, sb) * PRINCIPAL_ESTIMATE_MARGIN;
        let principal1 = amount1_for_liquidity(liquidity, sp, sa, sb) * PRINCIPAL_ESTIMATE_MARGIN;
        let pool0 = from_human(principal0, 0) + U256::from(position.tokens_owed0);
        let pool1 = from_human(principal1, 0) + U256::from(position.tokens_owed1);

        if self.pool.is_inverted() {
            (pool1, pool0)
        } else {
            (pool0, pool1)
        }
    }

    /// Raw token amounts to deposit into `range`.
    ///
    /// With `incoming`, each token is the larger of the live balance and the
    /// pre-run balance plus what this run withdrew, so an unsettled
    /// withdrawal is still redeployed.
    async fn deposit_amounts(
        &self,
        owner: Address,
        range: &Range,
        price: f64,
        incoming: Option<Incoming>,
    ) -> Result<(U256, U256), LifecycleError> {
        let token0 = &self.pool.token0;
        let token1 = &self.pool.token1;
        let (live0, live1) = self.balances(owner).await?;
        let (balance0, balance1) = match incoming {
            Some(Incoming { before, expected }) => (
                live0.max(before.0.saturating_add(expected.0)),
                live1.max(before.1.saturating_add(expected.1)),
            ),
            None => (live0, live1),
        };

        let amount0 = match self.strategy.deposit {
            DepositAmount::WalletBalance => balance0,
            DepositAmount::Manual { amount0 } => {
                let wanted = from_human(amount0, token0.decimals);
                if wanted > balance0 {
                    warn!(
                        wallet = %owner,
                        wanted = amount0,
                        available = to_human(balance0, token0.decimals),
                        "Deposit exceeds balance, using balance"
                    );
                }
                wanted.min(balance0)
            }
        };

        let counterpart = calculate_counterpart_amount(
            range.lower_price,
            range.upper_price,
            price,
            to_human(amount0, token0.decimals),
        );
        let amount1 = from_human(counterpart, token1.decimals).min(balance1);

        debug!(
            wallet = %owner,
            live0 = %live0,
            live1 = %live1,
            balance0 = %balance0,
            balance1 = %balance1,
            counterpart = counterpart,
            "Deposit amounts"
        );

        if amount0.is_zero() || amount1.is_zero() {
            return Err(LifecycleError::InsufficientBalance { amount0, amount1 });
        }
        Ok((amount0, amount1))
    }

    /// Mint parameters in the pool's on-chain token order.
    fn mint_request(&self, range: &Range, amount0: U256, amount1: U256) -> MintRequest {
        let (token0, token1) = (&self.pool.token0, &self.pool.token1);
        let base = MintRequest {
            token0: token0.address,
            token1: token1.address,
            fee: self.pool.fee,
            tick_lower: range.lower_tick,
            tick_upper: range.upper_tick,
            amount0_desired: amount0,
            amount1_desired: amount1,
            recipient: Address::ZERO,
            deadline: 0,
        };
        if !self.pool.is_inverted() {
            return base;
        }
        // Pool sorts tokens by address; ticks flip sign with the price.
        MintRequest {
            token0: token1.address,
            token1: token0.address,
            tick_lower: -range.upper_tick,
            tick_upper: -range.lower_tick,
            amount0_desired: amount1,
            amount1_desired: amount0,
            ..base
        }
    }

    fn range_from_position(&self, position: &PositionSnapshot) -> Range {
        let params = self.pool.params();
        if self.pool.is_inverted() {
            Range::from_ticks(-position.tick_upper, -position.tick_lower, &params)
        } else {
            Range::from_ticks(position.tick_lower, position.tick_upper, &params)
        }
    }
}
