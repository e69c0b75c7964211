//! Uniswap V3-family `Swap` event decoder. Reused verbatim by any
//! V3-family fork that emits the same event layout (Camelot, PancakeSwap
//! on Base — §4.3).
//!
//! The event's non-indexed data words are parsed directly, the same way
//! [`super::slot0`] parses `eth_call`/storage return data, rather than
//! through a generated ABI binding — keeping the tick/liquidity extraction
//! consistent across both sources of V3 pool data in this crate.

use alloy::primitives::{Address, U256};
use eyre::{eyre, Result};
use ingest_data::types::SwapRecord;
use ingest_data::RawLog;

use super::price::sqrt_price_x96_to_price;
use crate::scale::decimal_adjust_signed;

/// `keccak256("Swap(address,address,int256,int256,uint160,uint128,int24)")`.
pub const TOPIC0: &str = "0xc42079f94a6350d7e6235f29174924f928cc2ac818eb64fed8004e115fbcca67";

const WORD: usize = 64; // hex chars per 32-byte ABI word

/// Decodes one V3-family `Swap` log into a normalized [`SwapRecord`].
pub fn decode_swap(
    log: &RawLog,
    timestamp: u64,
    base_decimals: u8,
    quote_decimals: u8,
    base_is_token0: bool,
) -> Result<SwapRecord> {
    if log.topics.first().map(String::as_str) != Some(TOPIC0) {
        return Err(eyre!("log topic0 does not match V3 Swap signature"));
    }
    let sender = topic_to_address(log.topics.get(1))?;
    let recipient = topic_to_address(log.topics.get(2))?;

    let data = log.data.trim_start_matches("0x");
    if data.len() < WORD * 5 {
        return Err(eyre!("V3 swap data too short: {} hex chars", data.len()));
    }

    let amount0 = parse_word(data, 0)?;
    let amount1 = parse_word(data, 1)?;
    let sqrt_price_x96 = parse_word(data, 2)?;
    let liquidity = parse_word(data, 3)?;
    let tick_raw = parse_word(data, 4)?;

    let amount0 = signed_word_to_i128(amount0)?;
    let amount1 = signed_word_to_i128(amount1)?;
    let tick = sign_extend_int256_to_i32(tick_raw);
    let liquidity: u128 = liquidity
        .try_into()
        .map_err(|_| eyre!("liquidity exceeds u128 range"))?;

    let (base_delta_raw, quote_delta_raw) = if base_is_token0 {
        (amount0, amount1)
    } else {
        (amount1, amount0)
    };

    let (token0_decimals, token1_decimals) = if base_is_token0 {
        (base_decimals, quote_decimals)
    } else {
        (quote_decimals, base_decimals)
    };
    let is_token0_quote = !base_is_token0;
    let price = sqrt_price_x96_to_price(sqrt_price_x96, token0_decimals, token1_decimals, is_token0_quote);

    // Decimal-adjust to a common fixed-point scale (§3 "scaled by token
    // decimals"), the same step `uniswap_v2_decoder.py` applies, so base
    // and quote flows of differently-decimaled tokens are directly
    // comparable (VWAP, trade imbalance).
    let base_delta = decimal_adjust_signed(base_delta_raw, base_decimals);
    let quote_delta = decimal_adjust_signed(quote_delta_raw, quote_decimals);

    Ok(SwapRecord {
        block_number: log.block_number,
        tx_hash: log.tx_hash.clone(),
        log_index: log.log_index,
        timestamp,
        sender: format!("{sender:#x}"),
        recipient: format!("{recipient:#x}"),
        caller: None,
        router_tag: None,
        base_delta,
        quote_delta,
        base_vol: base_delta.unsigned_abs(),
        quote_vol: quote_delta.unsigned_abs(),
        price_scaled: price.price_scaled.try_into().unwrap_or(u128::MAX),
        price_scale: price.precision_decimals,
        is_buy: quote_delta > 0,
        liquidity: Some(liquidity),
        tick: Some(tick),
    })
}

fn topic_to_address(topic: Option<&String>) -> Result<Address> {
    let topic = topic.ok_or_else(|| eyre!("V3 swap log missing an indexed topic"))?;
    let hex = topic.trim_start_matches("0x");
    if hex.len() != 64 {
        return Err(eyre!("indexed topic '{topic}' is not a 32-byte word"));
    }
    let addr_hex = &hex[24..];
    addr_hex
        .parse::<Address>()
        .map_err(|e| eyre!("invalid address in topic '{topic}': {e}"))
}

fn parse_word(data: &str, index: usize) -> Result<U256> {
    let start = index * WORD;
    let word = data
        .get(start..start + WORD)
        .ok_or_else(|| eyre!("missing ABI word at index {index}"))?;
    U256::from_str_radix(word, 16).map_err(|e| eyre!("invalid hex word at index {index}: {e}"))
}

/// Interprets a 256-bit two's-complement word as `i128`.
fn signed_word_to_i128(val: U256) -> Result<i128> {
    let high_bit = U256::from(1u64) << 255;
    if val & high_bit != U256::ZERO {
        let magnitude = !val + U256::from(1u64);
        let magnitude: i128 = magnitude
            .try_into()
            .map_err(|_| eyre!("signed amount magnitude exceeds i128 range"))?;
        Ok(-magnitude)
    } else {
        val.try_into()
            .map_err(|_| eyre!("signed amount exceeds i128 range"))
    }
}

/// Sign-extends a Solidity `int24`, ABI-encoded as a 256-bit word, to `i32`.
fn sign_extend_int256_to_i32(val: U256) -> i32 {
    let low_32 = (val & U256::from(u32::MAX)).to::<u32>();
    low_32 as i32
}
