//! Fixed-point decimal adjustment for on-chain token amounts (spec §3
//! "economics: ... scaled by token decimals").
//!
//! The original Python decoder divides every raw flow by `10^decimals`
//! using arbitrary-precision `Decimal` (`uniswap_v2_decoder.py`: `base_in
//! / d0`). This crate has no arbitrary-precision decimal type in its
//! dependency stack, so the same adjustment is done as fixed-point integer
//! math at a common scale, the same way [`crate::v3::price`] converts
//! `sqrtPriceX96` to a scaled integer price.

use alloy::primitives::U256;

/// Decimal places of fixed-point precision kept for decimal-adjusted
/// volumes. Matches the price scale used throughout the decoders so a
/// volume ratio (VWAP) lands directly in the price domain once multiplied
/// by `10^PRICE_SCALE` (see `ingest_data::store::upsert_minute_buckets`).
pub const VOLUME_SCALE: u8 = 8;

/// Converts a raw token amount with `from_decimals` on-chain decimals into
/// a fixed-point value with [`VOLUME_SCALE`] decimal places, via U256
/// multiply-then-divide so the result doesn't truncate to zero the way a
/// naive `raw / 10^from_decimals` integer division would for sub-unit
/// amounts.
pub fn decimal_adjust(raw: u128, from_decimals: u8) -> u128 {
    let raw = U256::from(raw);
    let exp = VOLUME_SCALE as i32 - from_decimals as i32;
    let scaled = if exp >= 0 {
        raw * U256::from(10u64).pow(U256::from(exp as u32))
    } else {
        raw / U256::from(10u64).pow(U256::from((-exp) as u32))
    };
    scaled.try_into().unwrap_or(u128::MAX)
}

/// Signed variant of [`decimal_adjust`], preserving the pool-perspective
/// sign on `base_delta`/`quote_delta`.
pub fn decimal_adjust_signed(raw: i128, from_decimals: u8) -> i128 {
    let magnitude = decimal_adjust(raw.unsigned_abs(), from_decimals) as i128;
    if raw < 0 {
        -magnitude
    } else {
        magnitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjusts_18_decimals_down_to_volume_scale() {
        // 0.5 WETH (18 decimals) -> 50_000_000 at VOLUME_SCALE=8.
        assert_eq!(decimal_adjust(500_000_000_000_000_000, 18), 50_000_000);
    }

    #[test]
    fn adjusts_6_decimals_up_to_volume_scale() {
        // 1.0 USDC (6 decimals) -> 100_000_000 at VOLUME_SCALE=8.
        assert_eq!(decimal_adjust(1_000_000, 6), 100_000_000);
    }

    #[test]
    fn sub_unit_amount_does_not_truncate_to_zero() {
        // 0.0000001 WETH (18 decimals, 1e11 raw) -> 10 at VOLUME_SCALE=8,
        // whereas a naive `raw / 10^18` integer division would give 0.
        assert_eq!(decimal_adjust(100_000_000_000, 18), 10);
    }

    #[test]
    fn signed_preserves_sign() {
        assert_eq!(decimal_adjust_signed(-500_000_000_000_000_000, 18), -50_000_000);
        assert_eq!(decimal_adjust_signed(1_000_000, 6), 100_000_000);
    }
}
