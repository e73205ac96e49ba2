//! Concentrated-liquidity math.
//!
//! Prices are human prices: units of token1 per one token0 (e.g. USDC per
//! WETH). Ticks are pool ticks, so a human price is scaled by
//! 10^(decimals1 - decimals0) before taking log base 1.0001.
//!
//! Sqrt-price arguments to the liquidity functions are square roots of human
//! prices, and amounts are human amounts. Fed raw sqrt prices and on-chain
//! liquidity, the same functions give raw token amounts. Everything here is
//! pure.

use thiserror::Error;

/// Lowest tick a pool supports.
pub const MIN_TICK: i32 = -887_272;
/// Highest tick a pool supports.
pub const MAX_TICK: i32 = 887_272;

/// Values closer than this to an integer tick snap to it.
const TICK_SNAP_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MathError {
    #[error("price must be positive and finite, got {0}")]
    InvalidPrice(f64),

    #[error("range width must be positive and finite, got {0}")]
    InvalidWidth(f64),

    #[error("tick {0} outside [{MIN_TICK}, {MAX_TICK}]")]
    TickOutOfRange(i64),
}

/// Per-pool constants the math depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolParams {
    pub decimals0: u8,
    pub decimals1: u8,
    pub tick_spacing: i32,
}

impl PoolParams {
    /// 18/6 decimals, spacing 60 (WETH/USDC 0.3%).
    pub const WETH_USDC: Self = Self {
        decimals0: 18,
        decimals1: 6,
        tick_spacing: 60,
    };

    /// Human price to raw pool price multiplier.
    fn decimal_scale(&self) -> f64 {
        10f64.powi(self.decimals1 as i32 - self.decimals0 as i32)
    }
}

#[inline]
fn ln_base() -> f64 {
    // ln(1.0001) without the cancellation of ln(1 + small).
    0.0001f64.ln_1p()
}

fn raw_tick(price: f64, pool: &PoolParams) -> Result<f64, MathError> {
    if !price.is_finite() || price <= 0.0 {
        return Err(MathError::InvalidPrice(price));
    }
    Ok((price * pool.decimal_scale()).ln() / ln_base())
}

fn checked_tick(value: f64) -> Result<i32, MathError> {
    let tick = value as i64;
    if tick < MIN_TICK as i64 || tick > MAX_TICK as i64 {
        return Err(MathError::TickOutOfRange(tick));
    }
    Ok(tick as i32)
}

/// Largest tick whose price does not exceed `price`.
pub fn price_to_tick(price: f64, pool: &PoolParams) -> Result<i32, MathError> {
    let t = raw_tick(price, pool)?;
    let nearest = t.round();
    if (t - nearest).abs() < TICK_SNAP_EPSILON {
        return checked_tick(nearest);
    }
    checked_tick(t.floor())
}

/// Smallest tick whose price is not below `price`.
pub fn price_to_tick_ceil(price: f64, pool: &PoolParams) -> Result<i32, MathError> {
    let t = raw_tick(price, pool)?;
    let nearest = t.round();
    if (t - nearest).abs() < TICK_SNAP_EPSILON {
        return checked_tick(nearest);
    }
    checked_tick(t.ceil())
}

/// Human price at `tick`.
pub fn tick_to_price(tick: i32, pool: &PoolParams) -> f64 {
    (tick as f64 * ln_base()).exp() / pool.decimal_scale()
}

/// Raw pool sqrt price at `tick`.
pub fn sqrt_price_at_tick(tick: i32) -> f64 {
    (tick as f64 * ln_base() / 2.0).exp()
}

/// Raw pool sqrt price for a human price.
pub fn raw_sqrt_price(price: f64, pool: &PoolParams) -> f64 {
    (price * pool.decimal_scale()).sqrt()
}

/// Lowest tick that is a multiple of `spacing`.
pub fn min_usable_tick(spacing: i32) -> i32 {
    -(MAX_TICK / spacing) * spacing
}

/// Highest tick that is a multiple of `spacing`.
pub fn max_usable_tick(spacing: i32) -> i32 {
    (MAX_TICK / spacing) * spacing
}

/// Round down to a multiple of `spacing` (toward negative infinity).
pub fn align_tick_down(tick: i32, spacing: i32) -> i32 {
    let aligned = tick.div_euclid(spacing) * spacing;
    aligned.clamp(min_usable_tick(spacing), max_usable_tick(spacing))
}

/// Round up to a multiple of `spacing`.
pub fn align_tick_up(tick: i32, spacing: i32) -> i32 {
    let down = tick.div_euclid(spacing) * spacing;
    let aligned = if down == tick { down } else { down + spacing };
    aligned.clamp(min_usable_tick(spacing), max_usable_tick(spacing))
}

/// Liquidity supplied by `amount0` of token0 between `sa` and `sb`.
pub fn liquidity_for_amount0(amount0: f64, sa: f64, sb: f64) -> f64 {
    let (sa, sb) = ordered(sa, sb);
    if sb <= sa {
        return 0.0;
    }
    amount0 * sa * sb / (sb - sa)
}

/// Liquidity supplied by `amount1` of token1 between `sa` and `sb`.
pub fn liquidity_for_amount1(amount1: f64, sa: f64, sb: f64) -> f64 {
    let (sa, sb) = ordered(sa, sb);
    if sb <= sa {
        return 0.0;
    }
    amount1 / (sb - sa)
}

/// Liquidity deployable from both amounts at current sqrt price `sp`.
///
/// At or below `sa` only token0 counts; at or above `sb` only token1. In
/// between, whichever asset runs out first bounds the result.
pub fn get_liquidity(amount0: f64, amount1: f64, sp: f64, sa: f64, sb: f64) -> f64 {
    let (sa, sb) = ordered(sa, sb);
    if sp <= sa {
        liquidity_for_amount0(amount0, sa, sb)
    } else if sp >= sb {
        liquidity_for_amount1(amount1, sa, sb)
    } else {
        let l0 = liquidity_for_amount0(amount0, sp, sb);
        let l1 = liquidity_for_amount1(amount1, sa, sp);
        l0.min(l1)
    }
}

/// Token0 held by `liquidity` at sqrt price `sp`.
pub fn amount0_for_liquidity(liquidity: f64, sp: f64, sa: f64, sb: f64) -> f64 {
    let (sa, sb) = ordered(sa, sb);
    let sp = sp.clamp(sa, sb);
    if sp >= sb {
        return 0.0;
    }
    liquidity * (sb - sp) / (sp * sb)
}

/// Token1 held by `liquidity` at sqrt price `sp`.
pub fn amount1_for_liquidity(liquidity: f64, sp: f64, sa: f64, sb: f64) -> f64 {
    let (sa, sb) = ordered(sa, sb);
    let sp = sp.clamp(sa, sb);
    liquidity * (sp - sa)
}

/// Token1 to pair with `amount0` of token0 for a range `[lower, upper]` at
/// `price` (all human prices).
///
/// The price is clamped into the range first. Above the range a position
/// holds no token0, so the result is 0.
pub fn calculate_counterpart_amount(lower: f64, upper: f64, price: f64, amount0: f64) -> f64 {
    if !(lower > 0.0 && upper > lower && price > 0.0 && amount0 > 0.0) {
        return 0.0;
    }
    let sa = lower.sqrt();
    let sb = upper.sqrt();
    let sp = price.sqrt().clamp(sa, sb);
    if sp >= sb {
        return 0.0;
    }
    let liquidity = liquidity_for_amount0(amount0, sp, sb);
    amount1_for_liquidity(liquidity, sp, sa, sb)
}

#[inline]
fn ordered(a: f64, b: f64) -> (f64, f64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}
