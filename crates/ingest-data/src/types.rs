//! Type definitions shared by the chain client, decoder registry, and
//! aggregation/upsert layers.

use serde::{Deserialize, Serialize};

/// A pool row read from the externally-populated `pools` table.
///
/// `address` is globally unique; `pair` is an oriented base/quote label
/// (`"ARB/USDC"`). `last_started` is updated by the scheduler after each
/// enqueue and is read back to order the next firing's dispatch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pool {
    pub id: i64,
    pub chain: String,
    pub dex: String,
    pub pair: String,
    pub address: String,
    pub active: bool,
    pub last_started: Option<f64>,
}

/// A raw EVM log as returned by `eth_getLogs`, prior to any decoding.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: u64,
}

/// Minimal block header data needed by the block index (C2).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: u64,
    pub timestamp: u64,
}

/// A normalized swap record, produced by decoders (C3) and consumed by
/// aggregation (C4). See spec §3 "Swap record (normalized)".
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SwapRecord {
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: u64,

    /// Seconds since epoch, assigned via the block→timestamp resolver.
    pub timestamp: u64,

    pub sender: String,
    pub recipient: String,
    pub caller: Option<String>,
    pub router_tag: Option<String>,

    /// Pool-perspective signed deltas, scaled by token decimals.
    /// Negative means the pool paid the wallet (wallet received).
    pub base_delta: i128,
    pub quote_delta: i128,
    pub base_vol: u128,
    pub quote_vol: u128,

    /// Quote-per-base price, scaled by `price_scale` decimal places.
    pub price_scaled: u128,
    pub price_scale: u8,

    pub is_buy: bool,

    pub liquidity: Option<u128>,
    pub tick: Option<i32>,
}

/// A single pool-scoped minute bucket, as accumulated in memory by the
/// `SwapAggregator` (C4) before being upserted.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct MinuteBucket {
    pub minute_start: i64,
    pub open_price_scaled: u128,
    pub open_ts: i64,
    pub close_price_scaled: u128,
    pub close_ts: i64,
    pub high_price_scaled: u128,
    pub low_price_scaled: u128,
    pub swap_count: u64,
    pub total_base_volume: u128,
    pub total_quote_volume: u128,
    /// VWAP = `Σquote_vol / Σbase_vol`, scaled by `10^price_scale` like the
    /// OHLC columns, computed once folding is complete (§4.4.1). The
    /// durable upsert layer seeds this on first insert and recomputes the
    /// same ratio server-side on conflict.
    pub avg_price_scaled: u128,
    pub price_scale: u8,
}

/// Per-pool trade-size histogram counts, keyed by
/// `floor(log10(quote_vol_usd))` clamped to `[-2, 6]` (9 buckets).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct TradeSizeHistogram {
    pub buckets: [u64; 9],
}

impl TradeSizeHistogram {
    /// Bucket index for exponent `e` in `[-2, 6]`, or `None` if out of range.
    pub fn index_for_exponent(e: i32) -> Option<usize> {
        if (-2..=6).contains(&e) {
            Some((e + 2) as usize)
        } else {
            None
        }
    }
}

/// Identifies an EVM chain this engine ingests from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Chain {
    Arbitrum,
    Base,
}

impl Chain {
    pub fn as_str(self) -> &'static str {
        match self {
            Chain::Arbitrum => "arbitrum",
            Chain::Base => "base",
        }
    }

    pub fn parse(s: &str) -> eyre::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "arbitrum" | "arb" => Ok(Chain::Arbitrum),
            "base" => Ok(Chain::Base),
            other => Err(eyre::eyre!("unsupported chain '{other}'")),
        }
    }

    /// Default block chunk size per §4.5.2 / §6 Tunables.
    pub fn default_chunk_size(self) -> u64 {
        match self {
            Chain::Arbitrum => 10_000,
            Chain::Base => 1_500,
        }
    }
}

/// Identifies a DEX family this engine decodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dex {
    UniswapV3,
    Camelot,
    PancakeSwap,
    UniswapV2,
}

impl Dex {
    pub fn as_str(self) -> &'static str {
        match self {
            Dex::UniswapV3 => "uniswap_v3",
            Dex::Camelot => "camelot",
            Dex::PancakeSwap => "pancakeswap",
            Dex::UniswapV2 => "uniswap_v2",
        }
    }

    pub fn parse(s: &str) -> eyre::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "uniswap_v3" | "uniswapv3" => Ok(Dex::UniswapV3),
            "camelot" => Ok(Dex::Camelot),
            "pancakeswap" | "pancake" => Ok(Dex::PancakeSwap),
            "uniswap_v2" | "uniswapv2" => Ok(Dex::UniswapV2),
            other => Err(eyre::eyre!("unsupported dex '{other}'")),
        }
    }
}
