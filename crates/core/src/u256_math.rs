//! Conversions between raw token amounts and human-readable values.
//!
//! Raw amounts are `U256` integers in the token's smallest unit. The range
//! math works on `f64` human amounts, so every transaction boundary passes
//! through these helpers.

use alloy::primitives::U256;

/// 10^exp as U256.
#[inline]
pub fn pow10(exp: u8) -> U256 {
    U256::from(10u64).pow(U256::from(exp))
}

/// Raw amount to f64 without decimal scaling.
#[inline]
pub fn u256_to_f64(value: U256) -> f64 {
    if value <= U256::from(u128::MAX) {
        value.to::<u128>() as f64
    } else {
        // Sum limbs from most to least significant.
        value
            .as_limbs()
            .iter()
            .rev()
            .fold(0.0, |acc, limb| acc * 18_446_744_073_709_551_616.0 + *limb as f64)
    }
}

/// Raw token amount to whole tokens.
///
/// `to_human(1_500_000, 6) == 1.5`
#[inline]
pub fn to_human(raw: U256, decimals: u8) -> f64 {
    u256_to_f64(raw) / 10f64.powi(decimals as i32)
}

/// Whole tokens to raw amount, truncated toward zero.
///
/// Negative and non-finite inputs give zero.
pub fn from_human(amount: f64, decimals: u8) -> U256 {
    if !amount.is_finite() || amount <= 0.0 {
        return U256::ZERO;
    }
    let scaled = amount * 10f64.powi(decimals as i32);
    if scaled < u128::MAX as f64 {
        U256::from(scaled.trunc() as u128)
    } else {
        // Split off the integer part above 10^18 to keep precision sane.
        let whole = (amount.trunc()) as u128;
        let frac = amount - amount.trunc();
        U256::from(whole) * pow10(decimals)
            + U256::from((frac * 10f64.powi(decimals as i32)).trunc() as u128)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pow10() {
        assert_eq!(pow10(0), U256::from(1u64));
        assert_eq!(pow10(6), U256::from(1_000_000u64));
        assert_eq!(pow10(18), U256::from(1_000_000_000_000_000_000u128));
    }

    #[test]
    fn test_to_human() {
        assert_eq!(to_human(U256::from(1_500_000u64), 6), 1.5);
        let one_eth = U256::from(10u64).pow(U256::from(18u64));
        assert!((to_human(one_eth, 18) - 1.0).abs() < 1e-12);
        assert_eq!(to_human(U256::ZERO, 18), 0.0);
    }

    #[test]
    fn test_from_human() {
        assert_eq!(from_human(1.5, 6), U256::from(1_500_000u64));
        assert_eq!(from_human(0.25, 18), U256::from(250_000_000_000_000_000u128));
        assert_eq!(from_human(-1.0, 6), U256::ZERO);
        assert_eq!(from_human(f64::NAN, 6), U256::ZERO);
    }

    #[test]
    fn test_large_values() {
        let big = U256::MAX;
        assert!(u256_to_f64(big) > 1e77);
    }
}
