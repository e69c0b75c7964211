//! Shared test helpers and utilities.
//!
//! Provides factory functions for building synthetic raw logs and an
//! in-memory store, so scenarios can be expressed without a live RPC
//! endpoint.

#![allow(dead_code)]

use alloy::primitives::U256;
use ingest_data::types::RawLog;
use ingest_data::Store;

pub fn test_store() -> Store {
    Store::new(":memory:").expect("in-memory store should always open")
}

fn word(v: U256) -> String {
    format!("{v:064x}")
}

fn address_topic(byte: u8) -> String {
    let mut bytes = [0u8; 32];
    bytes[31] = byte;
    format!("0x{}", bytes.iter().map(|b| format!("{b:02x}")).collect::<String>())
}

/// Builds a synthetic Uniswap-V2-family `Swap` log for a pool that
/// received `quote_in` of the quote token and paid out `base_out` of the
/// base token (i.e. a buy of base, pool-perspective).
pub fn v2_buy_log(block_number: u64, log_index: u64, quote_in: u128, base_out: u128) -> RawLog {
    let mut data = String::new();
    data.push_str(&word(U256::ZERO)); // amount0In
    data.push_str(&word(U256::from(quote_in))); // amount1In
    data.push_str(&word(U256::from(base_out))); // amount0Out
    data.push_str(&word(U256::ZERO)); // amount1Out

    RawLog {
        address: "0x0000000000000000000000000000000000000001".to_string(),
        topics: vec![
            ingest_decode::v2::TOPIC0.to_string(),
            address_topic(0x11),
            address_topic(0x22),
        ],
        data: format!("0x{data}"),
        block_number,
        tx_hash: format!("0x{block_number:x}{log_index:x}"),
        log_index,
    }
}

/// Builds a synthetic Uniswap-V3-family `Swap` log with the given
/// post-swap `sqrt_price_x96`, `liquidity`, and `tick`.
pub fn v3_log(
    block_number: u64,
    log_index: u64,
    amount0: i128,
    amount1: i128,
    sqrt_price_x96: U256,
    liquidity: u128,
    tick: i32,
) -> RawLog {
    let mut data = String::new();
    data.push_str(&word(to_u256(amount0)));
    data.push_str(&word(to_u256(amount1)));
    data.push_str(&word(sqrt_price_x96));
    data.push_str(&word(U256::from(liquidity)));
    data.push_str(&word(to_u256(tick as i128)));

    RawLog {
        address: "0x0000000000000000000000000000000000000002".to_string(),
        topics: vec![
            ingest_decode::v3::TOPIC0.to_string(),
            address_topic(0x33),
            address_topic(0x44),
        ],
        data: format!("0x{data}"),
        block_number,
        tx_hash: format!("0x{block_number:x}{log_index:x}"),
        log_index,
    }
}

fn to_u256(v: i128) -> U256 {
    if v >= 0 {
        U256::from(v as u128)
    } else {
        U256::MAX - U256::from((-v - 1) as u128)
    }
}
