//! Polling loop: read the oracle, decide per wallet, run the lifecycle.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use rebalancer_chain::PriceOracle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{BotConfig, ConfigError};
use crate::lifecycle::Orchestrator;
use crate::position::WalletState;
use crate::rebalance::{evaluate, Decision, RebalanceThreshold};

/// Scheduler settings, resolved from [`BotConfig`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    pub threshold: RebalanceThreshold,
    pub max_concurrent_wallets: usize,
    pub wallet_timeout: Duration,
}

impl SchedulerConfig {
    pub fn from_bot(config: &BotConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            poll_interval: config.strategy.poll_interval(),
            threshold: config.strategy.threshold()?,
            max_concurrent_wallets: config.execution.max_concurrent_wallets.max(1),
            wallet_timeout: config.execution.wallet_timeout(),
        })
    }
}

/// Counts for one poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub evaluated: usize,
    pub rebalanced: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WalletOutcome {
    Held,
    Rebalanced,
    Skipped,
    Failed,
}

impl PollSummary {
    fn record(&mut self, outcome: WalletOutcome) {
        self.evaluated += 1;
        match outcome {
            WalletOutcome::Held => {}
            WalletOutcome::Rebalanced => self.rebalanced += 1,
            WalletOutcome::Skipped => self.skipped += 1,
            WalletOutcome::Failed => self.failed += 1,
        }
    }
}

/// Owns every wallet's state and drives them on a fixed interval.
pub struct Scheduler {
    oracle: Arc<dyn PriceOracle>,
    orchestrator: Arc<Orchestrator>,
    wallets: Vec<WalletState>,
    config: SchedulerConfig,
    polls: u64,
}

impl Scheduler {
    pub fn new(
        oracle: Arc<dyn PriceOracle>,
        orchestrator: Arc<Orchestrator>,
        wallets: Vec<WalletState>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            oracle,
            orchestrator,
            wallets,
            config,
            polls: 0,
        }
    }

    pub fn wallets(&self) -> &[WalletState] {
        &self.wallets
    }

    /// Completed polls, including ones skipped for a failed oracle read.
    pub fn polls(&self) -> u64 {
        self.polls
    }

    /// Approve pool tokens for every wallet. Failures are logged; the wallet
    /// stays in rotation.
    pub async fn prepare(&mut self) {
        for state in &self.wallets {
            if let Err(e) = self.orchestrator.approve_tokens(state).await {
                warn!(wallet = %state.address(), error = %e, "Token approval failed");
            }
        }
    }

    /// Poll until Ctrl-C.
    pub async fn run(&mut self) {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Poll until `shutdown` resolves. A poll in progress always finishes.
    pub async fn run_until(&mut self, shutdown: impl Future<Output = ()>) {
        info!(
            wallets = self.wallets.len(),
            interval_secs = self.config.poll_interval.as_secs_f64(),
            threshold = %self.config.threshold,
            oracle = %self.oracle.address(),
            "Starting rebalance loop"
        );

        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(polls = self.polls, "Shutdown requested, stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        }
    }

    /// One poll. Returns `None` when the price could not be read.
    pub async fn poll_once(&mut self) -> Option<PollSummary> {
        self.polls += 1;

        let price = match self.oracle.get_price().await {
            Ok(reading) => reading.price,
            Err(e) => {
                warn!(error = %e, "Oracle read failed, skipping poll");
                return None;
            }
        };
        debug!(price = price, "Oracle price");

        let orchestrator = &self.orchestrator;
        let threshold = self.config.threshold;
        let limit = self.config.wallet_timeout;

        let outcomes: Vec<WalletOutcome> = futures::stream::iter(
            self.wallets
                .iter_mut()
                .map(|state| process_wallet(orchestrator, threshold, limit, state, price)),
        )
        .buffer_unordered(self.config.max_concurrent_wallets)
        .collect()
        .await;

        let mut summary = PollSummary::default();
        for outcome in outcomes {
            summary.record(outcome);
        }

        info!(
            price = price,
            evaluated = summary.evaluated,
            rebalanced = summary.rebalanced,
            skipped = summary.skipped,
            failed = summary.failed,
            "Poll complete"
        );
        Some(summary)
    }
}

async fn process_wallet(
    orchestrator: &Orchestrator,
    threshold: RebalanceThreshold,
    limit: Duration,
    state: &mut WalletState,
    price: f64,
) -> WalletOutcome {
    let address = state.address();
    match tokio::time::timeout(limit, evaluate_wallet(orchestrator, threshold, state, price)).await
    {
        Ok(outcome) => outcome,
        Err(_) => {
            warn!(
                wallet = %address,
                timeout_ms = limit.as_millis() as u64,
                "Wallet pipeline timed out, re-reading position next poll"
            );
            state.record_timeout();
            WalletOutcome::Failed
        }
    }
}

async fn evaluate_wallet(
    orchestrator: &Orchestrator,
    threshold: RebalanceThreshold,
    state: &mut WalletState,
    price: f64,
) -> WalletOutcome {
    let address = state.address();

    let reason = if state.needs_redeploy {
        "redeploy"
    } else {
        if state.range.is_none() {
            if let Err(e) = orchestrator.adopt_position(state).await {
                warn!(wallet = %address, error = %e, "Failed to read position");
                return WalletOutcome::Failed;
            }
        }
        match state.range {
            None => "no_range",
            Some(range) => match evaluate(price, range.lower_price, range.upper_price, threshold) {
                Decision::Hold => {
                    debug!(wallet = %address, price = price, range = %range, "In range, holding");
                    return WalletOutcome::Held;
                }
                Decision::NearUpper => "near_upper",
                Decision::NearLower => "near_lower",
            },
        }
    };

    info!(wallet = %address, price = price, reason = reason, "Rebalancing");
    match orchestrator.run(state, price).await {
        Ok(report) if report.skipped.is_some() => WalletOutcome::Skipped,
        Ok(_) => WalletOutcome::Rebalanced,
        Err(failure) => {
            error!(wallet = %address, error = %failure, "Rebalance failed");
            WalletOutcome::Failed
        }
    }
}
