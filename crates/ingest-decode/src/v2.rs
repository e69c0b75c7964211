//! Uniswap V2-family decoder: constant-product AMM, reserve-delta `Swap`
//! event. Reused verbatim by any V2-family fork (§4.3).
//!
//! All economics are computed in `U256`; `f64` never appears in the
//! computation path (only `price.rs`'s display formatting uses it, and
//! this module doesn't call that).

use alloy::primitives::U256;
use alloy::sol;
use alloy::sol_types::SolEvent;
use eyre::{eyre, Result};
use ingest_data::types::SwapRecord;
use ingest_data::RawLog;

use crate::raw::to_alloy_log;
use crate::scale::{decimal_adjust_signed, VOLUME_SCALE};

sol! {
    #[derive(Debug)]
    event Swap(
        address indexed sender,
        uint256 amount0In,
        uint256 amount1In,
        uint256 amount0Out,
        uint256 amount1Out,
        address indexed to
    );
}

/// `keccak256("Swap(address,uint256,uint256,uint256,uint256,address)")`.
pub const TOPIC0: &str = "0xd78ad95fa46c994b6551d0da85fc275fe613ce37657fb8d5e3d130840159d822";

/// Decimal places kept in [`SwapRecord::price_scaled`].
const PRICE_SCALE: u8 = 8;

/// Decodes one V2-family `Swap` log into a normalized [`SwapRecord`].
///
/// `timestamp` must already be resolved by the block index (C2); decoders
/// are pure functions over already-timestamped input (§4.3).
pub fn decode_swap(
    log: &RawLog,
    timestamp: u64,
    base_decimals: u8,
    quote_decimals: u8,
    base_is_token0: bool,
) -> Result<SwapRecord> {
    let alloy_log = to_alloy_log(log)?;
    let decoded = Swap::decode_log(&alloy_log).map_err(|e| eyre!("v2 swap decode failed: {e}"))?;

    let token0_delta_raw = signed_delta(decoded.amount0In, decoded.amount0Out)?;
    let token1_delta_raw = signed_delta(decoded.amount1In, decoded.amount1Out)?;
    let (base_delta_raw, quote_delta_raw, quote_in) = if base_is_token0 {
        (token0_delta_raw, token1_delta_raw, decoded.amount1In)
    } else {
        (token1_delta_raw, token0_delta_raw, decoded.amount0In)
    };

    // Decimal-adjust to a common fixed-point scale (§3 "scaled by token
    // decimals"), matching `uniswap_v2_decoder.py`'s `amount / 10^dec`
    // step, so base and quote flows of differently-decimaled tokens are
    // directly comparable (VWAP, trade imbalance).
    let base_delta = decimal_adjust_signed(base_delta_raw, base_decimals);
    let quote_delta = decimal_adjust_signed(quote_delta_raw, quote_decimals);

    let base_vol = base_delta.unsigned_abs();
    let quote_vol = quote_delta.unsigned_abs();
    let price_scaled = price_scaled_u128(base_vol, quote_vol);
    let is_buy = !quote_in.is_zero();

    Ok(SwapRecord {
        block_number: log.block_number,
        tx_hash: log.tx_hash.clone(),
        log_index: log.log_index,
        timestamp,
        sender: format!("{:#x}", decoded.sender),
        recipient: format!("{:#x}", decoded.to),
        caller: None,
        router_tag: None,
        base_delta,
        quote_delta,
        base_vol,
        quote_vol,
        price_scaled,
        price_scale: PRICE_SCALE,
        is_buy,
        liquidity: None,
        tick: None,
    })
}

/// `in - out`, pool-perspective (positive = pool received).
fn signed_delta(in_amt: U256, out_amt: U256) -> Result<i128> {
    let in_i: i128 = in_amt
        .try_into()
        .map_err(|_| eyre!("swap amount exceeds i128 range"))?;
    let out_i: i128 = out_amt
        .try_into()
        .map_err(|_| eyre!("swap amount exceeds i128 range"))?;
    Ok(in_i - out_i)
}

/// `|quote_vol| / |base_vol|` scaled by `10^PRICE_SCALE` (§4.3 v2-family
/// price rule). `base_vol`/`quote_vol` are already decimal-adjusted to the
/// common [`VOLUME_SCALE`], so that factor cancels in the ratio and only
/// the `PRICE_SCALE` multiplier needs to be applied here.
fn price_scaled_u128(base_vol: u128, quote_vol: u128) -> u128 {
    if base_vol == 0 {
        return 0;
    }
    debug_assert_eq!(VOLUME_SCALE, PRICE_SCALE, "scale mismatch would require a conversion factor here");
    let base_vol = U256::from(base_vol);
    let quote_vol = U256::from(quote_vol);
    let scale = U256::from(10u64).pow(U256::from(PRICE_SCALE));
    ((quote_vol * scale) / base_vol).try_into().unwrap_or(u128::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address_topic(last_byte: u8) -> String {
        let mut bytes = [0u8; 32];
        bytes[31] = last_byte;
        format!("0x{}", hex_encode(&bytes))
    }

    fn sample_log() -> RawLog {
        // Swap(sender, amount0In=0, amount1In=1_000_000, amount0Out=5e17, amount1Out=0, to)
        let mut data_bytes = Vec::new();
        data_bytes.extend_from_slice(&U256::from(0u64).to_be_bytes::<32>());
        data_bytes.extend_from_slice(&U256::from(1_000_000u64).to_be_bytes::<32>());
        data_bytes.extend_from_slice(&U256::from(500_000_000_000_000_000u128).to_be_bytes::<32>());
        data_bytes.extend_from_slice(&U256::from(0u64).to_be_bytes::<32>());

        RawLog {
            address: "0x0000000000000000000000000000000000000001".to_string(),
            topics: vec![TOPIC0.to_string(), address_topic(0x11), address_topic(0x22)],
            data: format!("0x{}", hex_encode(&data_bytes)),
            block_number: 1,
            tx_hash: "0xabc".to_string(),
            log_index: 0,
        }
    }

    fn hex_encode(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn decode_swap_computes_buy_direction() {
        let log = sample_log();
        // quote = token1 (USDC, 6 decimals), base = token0 (WETH, 18 decimals).
        // Deltas come back decimal-adjusted to VOLUME_SCALE (8): 0.5 WETH ->
        // 50_000_000, 1.0 USDC -> 100_000_000.
        let swap = decode_swap(&log, 1_700_000_000, 18, 6, true).expect("should decode");
        assert!(swap.is_buy, "wallet paid quote (token1 in), should be a buy");
        assert_eq!(swap.base_delta, -50_000_000);
        assert_eq!(swap.quote_delta, 100_000_000);
        assert_eq!(swap.base_vol, 50_000_000);
        assert_eq!(swap.quote_vol, 100_000_000);
        assert!(swap.price_scaled > 0);
    }

    #[test]
    fn decode_swap_rejects_bad_topic0() {
        let mut log = sample_log();
        log.topics[0] = "0x0".repeat(1);
        assert!(decode_swap(&log, 0, 18, 6, true).is_err());
    }
}
