//! Rebalancer core logic.
//!
//! This crate provides the concentrated-liquidity rebalancing loop:
//! - Tick, price and liquidity math
//! - Hysteresis rebalance decision and range computation
//! - Per-wallet position lifecycle (collect, withdraw, re-mint)
//! - Polling scheduler with bounded wallet concurrency
//! - Bot and chain configuration
//!
//! All chain I/O goes through `rebalancer-chain`.

pub mod config;
mod lifecycle;
pub mod math;
mod position;
mod rebalance;
mod scheduler;
pub mod u256_math;

pub use config::{
    BotConfig, ChainConfig, ConfigError, DepositAmount, FeeCollection, NoPositionPolicy,
    PoolConfig, StrategyConfig,
};
pub use lifecycle::{
    LifecycleError, LifecycleFailure, LifecycleReport, LifecycleState, Orchestrator,
    PositionVenue,
};
pub use math::{MathError, PoolParams};
pub use position::WalletState;
pub use rebalance::{
    calculate_new_range, evaluate, should_rebalance, Decision, Range, RebalanceThreshold,
};
pub use scheduler::{PollSummary, Scheduler, SchedulerConfig};
