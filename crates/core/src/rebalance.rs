//! Rebalance decision and range computation.

use std::fmt;

use crate::config::ConfigError;
use crate::math::{
    align_tick_down, align_tick_up, price_to_tick, price_to_tick_ceil, tick_to_price, MathError,
    PoolParams,
};

/// Fraction of the range width that counts as "too close to an edge".
///
/// Always in `[0, 0.5)`: at 0.5 the two edge bands cover the whole range and
/// every price would trigger a rebalance.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct RebalanceThreshold(f64);

impl RebalanceThreshold {
    pub fn new(fraction: f64) -> Result<Self, ConfigError> {
        if !fraction.is_finite() || !(0.0..0.5).contains(&fraction) {
            return Err(ConfigError::InvalidThreshold(fraction));
        }
        Ok(Self(fraction))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl fmt::Display for RebalanceThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}%", self.0 * 100.0)
    }
}

/// A position's price window. `lower_tick < upper_tick`, both aligned to the
/// pool's tick spacing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range {
    pub lower_tick: i32,
    pub upper_tick: i32,
    pub lower_price: f64,
    pub upper_price: f64,
}

impl Range {
    pub fn width(&self) -> f64 {
        self.upper_price - self.lower_price
    }

    pub fn contains(&self, price: f64) -> bool {
        price >= self.lower_price && price <= self.upper_price
    }

    /// Build from on-chain ticks.
    pub fn from_ticks(lower_tick: i32, upper_tick: i32, pool: &PoolParams) -> Self {
        Self {
            lower_tick,
            upper_tick,
            lower_price: tick_to_price(lower_tick, pool),
            upper_price: tick_to_price(upper_tick, pool),
        }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.2}, {:.2}] ticks [{}, {}]",
            self.lower_price, self.upper_price, self.lower_tick, self.upper_tick
        )
    }
}

/// Outcome of evaluating a price against a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Hold,
    NearUpper,
    NearLower,
}

impl Decision {
    pub fn should_rebalance(&self) -> bool {
        !matches!(self, Decision::Hold)
    }
}

/// Which edge band, if any, `price` has entered.
pub fn evaluate(price: f64, lower: f64, upper: f64, threshold: RebalanceThreshold) -> Decision {
    let distance = (upper - lower) * threshold.value();
    if price > upper - distance {
        Decision::NearUpper
    } else if price < lower + distance {
        Decision::NearLower
    } else {
        Decision::Hold
    }
}

/// True iff `price` is within `threshold * (upper - lower)` of either bound
/// (or outside the range altogether).
pub fn should_rebalance(price: f64, lower: f64, upper: f64, threshold: RebalanceThreshold) -> bool {
    evaluate(price, lower, upper, threshold).should_rebalance()
}

/// New range of `width` centred on `price`, widened to tick spacing.
pub fn calculate_new_range(price: f64, width: f64, pool: &PoolParams) -> Result<Range, MathError> {
    if !price.is_finite() || price <= 0.0 {
        return Err(MathError::InvalidPrice(price));
    }
    if !width.is_finite() || width <= 0.0 {
        return Err(MathError::InvalidWidth(width));
    }
    let lower_price = price - width / 2.0;
    let upper_price = price + width / 2.0;
    if lower_price <= 0.0 {
        return Err(MathError::InvalidPrice(lower_price));
    }

    let spacing = pool.tick_spacing;
    let lower_tick = align_tick_down(price_to_tick(lower_price, pool)?, spacing);
    let mut upper_tick = align_tick_up(price_to_tick_ceil(upper_price, pool)?, spacing);
    if upper_tick <= lower_tick {
        upper_tick = lower_tick + spacing;
    }

    Ok(Range::from_ticks(lower_tick, upper_tick, pool))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const POOL: PoolParams = PoolParams::WETH_USDC;

    fn threshold(f: f64) -> RebalanceThreshold {
        RebalanceThreshold::new(f).unwrap()
    }

    #[test]
    fn test_threshold_validation() {
        assert!(RebalanceThreshold::new(0.0).is_ok());
        assert!(RebalanceThreshold::new(0.49).is_ok());
        assert_eq!(
            RebalanceThreshold::new(0.5),
            Err(ConfigError::InvalidThreshold(0.5))
        );
        assert!(RebalanceThreshold::new(0.75).is_err());
        assert!(RebalanceThreshold::new(-0.1).is_err());
        assert!(RebalanceThreshold::new(f64::NAN).is_err());
    }

    #[test]
    fn test_reference_examples() {
        assert!(!should_rebalance(3000.0, 2950.0, 3050.0, threshold(0.10)));
        assert!(should_rebalance(2955.0, 2950.0, 3050.0, threshold(0.10)));
    }

    #[test]
    fn test_evaluate_reports_edge() {
        let t = threshold(0.10);
        assert_eq!(evaluate(3045.0, 2950.0, 3050.0, t), Decision::NearUpper);
        assert_eq!(evaluate(3100.0, 2950.0, 3050.0, t), Decision::NearUpper);
        assert_eq!(evaluate(2955.0, 2950.0, 3050.0, t), Decision::NearLower);
        assert_eq!(evaluate(3040.0, 2950.0, 3050.0, t), Decision::Hold);
    }

    #[test]
    fn test_new_range_reference_example() {
        let range = calculate_new_range(3025.0, 100.0, &POOL).unwrap();
        assert!(range.lower_price <= 2975.0);
        assert!(range.upper_price >= 3075.0);
        assert_eq!(range.lower_tick % 60, 0);
        assert_eq!(range.upper_tick % 60, 0);
        // Widening is bounded by one spacing step (~0.6%) on each side.
        assert!(range.lower_price > 2975.0 * 0.993);
        assert!(range.upper_price < 3075.0 * 1.007);
    }

    #[test]
    fn test_new_range_rejects_bad_input() {
        assert_eq!(
            calculate_new_range(3000.0, 0.0, &POOL),
            Err(MathError::InvalidWidth(0.0))
        );
        assert!(calculate_new_range(3000.0, -10.0, &POOL).is_err());
        assert!(calculate_new_range(40.0, 100.0, &POOL).is_err());
        assert!(calculate_new_range(f64::NAN, 100.0, &POOL).is_err());
    }

    #[test]
    fn test_range_display() {
        let range = Range::from_ticks(-196_320, -196_200, &POOL);
        assert!(range.to_string().contains("ticks [-196320, -196200]"));
        assert!(range.contains(range.lower_price));
    }

    proptest! {
        #[test]
        fn prop_should_rebalance_matches_band(
            lower in 100.0f64..10_000.0,
            width in 1.0f64..2_000.0,
            frac in 0.0f64..0.49,
            pos in -0.5f64..1.5,
        ) {
            let upper = lower + width;
            let price = lower + pos * width;
            let band = width * frac;
            let expected = price > upper - band || price < lower + band;
            prop_assert_eq!(should_rebalance(price, lower, upper, threshold(frac)), expected);
        }

        #[test]
        fn prop_new_range_never_narrower(price in 500.0f64..20_000.0, width in 1.0f64..400.0) {
            let range = calculate_new_range(price, width, &POOL).unwrap();
            prop_assert!(range.lower_tick < range.upper_tick);
            prop_assert_eq!(range.lower_tick % POOL.tick_spacing, 0);
            prop_assert_eq!(range.upper_tick % POOL.tick_spacing, 0);
            prop_assert!(range.upper_price - range.lower_price >= width * (1.0 - 1e-9));
            prop_assert!(range.lower_price <= (price - width / 2.0) * (1.0 + 1e-12));
            prop_assert!(range.upper_price >= (price + width / 2.0) * (1.0 - 1e-12));
        }
    }
}
