//! Per-wallet state owned by the scheduler.

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use rebalancer_chain::{NonceTracker, Wallet};

use crate::rebalance::Range;

/// Everything the bot remembers about one wallet between polls.
///
/// On-chain position data is never cached here; the lifecycle re-reads it
/// every run. `range` is replaced only after a mint is accepted.
#[derive(Debug)]
pub struct WalletState {
    pub wallet: Wallet,

    /// Authoritative window of the position we last minted.
    pub range: Option<Range>,

    /// Liquidity was withdrawn but not re-deployed.
    pub needs_redeploy: bool,

    pub nonces: NonceTracker,

    pub last_rebalanced: Option<DateTime<Utc>>,

    /// Consecutive failed lifecycle runs.
    pub failures: u32,
}

impl WalletState {
    pub fn new(wallet: Wallet) -> Self {
        Self {
            wallet,
            range: None,
            needs_redeploy: false,
            nonces: NonceTracker::default(),
            last_rebalanced: None,
            failures: 0,
        }
    }

    pub fn address(&self) -> Address {
        self.wallet.address
    }

    /// Record an accepted mint.
    pub fn record_mint(&mut self, range: Range) {
        self.range = Some(range);
        self.needs_redeploy = false;
        self.last_rebalanced = Some(Utc::now());
        self.failures = 0;
    }

    /// Record a pipeline that was cut off at an unknown step.
    ///
    /// The range is dropped so the next poll re-reads the live position:
    /// a healthy one is adopted and evaluated, an emptied one is redeployed.
    pub fn record_timeout(&mut self) {
        self.failures = self.failures.saturating_add(1);
        self.range = None;
    }

    /// Record a failed run. `withdrawn` means liquidity left the pool.
    pub fn record_failure(&mut self, withdrawn: bool) {
        self.failures = self.failures.saturating_add(1);
        if withdrawn {
            self.needs_redeploy = true;
        }
    }
}
